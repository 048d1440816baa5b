// Lemma noise filter shared by every lexical stage.
//
// Upstream lemmas still carry newsroom noise: weekday and month names,
// generic reporting verbs, scraped markup residue, numbers. A lemma survives
// when, after trimming and lowercasing, it is at least three characters long,
// contains no digit, starts with a letter, and is not a stopword.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex_lite::Regex;
use stop_words::{get, LANGUAGE};

/// Latin-1 letters, the French ligatures and the Arabic block. Digits are
/// deliberately absent.
static TOKEN_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^[A-Za-zÀ-ÖØ-öø-ÿœŒ\u{0600}-\u{06FF}][A-Za-zÀ-ÖØ-öø-ÿœŒ\u{0600}-\u{06FF}_'-]*$")
        .expect("token shape regex is valid")
});

const MIN_LEMMA_CHARS: usize = 3;

/// Newsroom vocabulary that carries no agenda signal.
const NEWSROOM_STOPWORDS: &[&str] = &[
    // calendar
    "lundi", "mardi", "mercredi", "jeudi", "vendredi", "samedi", "dimanche",
    "janvier", "février", "fevrier", "mars", "avril", "mai", "juin", "juillet",
    "août", "aout", "septembre", "octobre", "novembre", "décembre", "decembre",
    "aujourd'hui", "hier", "demain", "matin", "soir", "semaine", "année", "annee",
    // generic reporting verbs and fillers
    "être", "avoir", "faire", "dire", "pouvoir", "aller", "voir", "savoir",
    "vouloir", "venir", "devoir", "prendre", "falloir", "mettre", "passer",
    "donner", "annoncer", "expliquer", "indiquer", "déclarer", "affirmer",
    "selon", "cela", "celui", "celle", "chose", "faut", "très", "plus", "moins",
    "aussi", "encore", "déjà", "toujours", "jamais", "alors", "ainsi", "comme",
    "tout", "tous", "toute", "toutes", "autre", "autres", "même", "mêmes",
    // country self-references
    "france", "français", "française", "francais", "francaise",
    // scraped markup residue
    "http", "https", "www", "html", "amp", "nbsp", "quot", "via", "lire",
    "article", "abonné", "abonnés", "newsletter", "cookies", "javascript",
];

/// Validates and normalizes lemmas.
#[derive(Debug, Clone)]
pub struct LemmaFilter {
    stopwords: HashSet<String>,
}

impl Default for LemmaFilter {
    fn default() -> Self {
        let mut stopwords: HashSet<String> = get(LANGUAGE::French)
            .into_iter()
            .map(|w| w.to_lowercase())
            .collect();
        stopwords.extend(get(LANGUAGE::English).into_iter().map(|w| w.to_lowercase()));
        stopwords.extend(NEWSROOM_STOPWORDS.iter().map(|w| w.to_string()));
        Self { stopwords }
    }
}

impl LemmaFilter {
    /// Add extra stopwords on top of the defaults.
    pub fn with_extra<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stopwords
            .extend(extra.into_iter().map(|w| w.as_ref().trim().to_lowercase()));
        self
    }

    /// Return the normalized lemma, or `None` when it is noise.
    pub fn normalize(&self, lemma: &str) -> Option<String> {
        let lemma = lemma.trim().to_lowercase();
        if lemma.chars().count() < MIN_LEMMA_CHARS {
            return None;
        }
        if lemma.chars().any(|c| c.is_ascii_digit()) {
            return None;
        }
        if !TOKEN_SHAPE.is_match(&lemma) {
            return None;
        }
        if self.stopwords.contains(&lemma) {
            return None;
        }
        Some(lemma)
    }

    /// Apply [`normalize`](Self::normalize) to a whole lemma list, keeping order.
    pub fn filter<'a, I>(&self, lemmas: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        lemmas
            .into_iter()
            .filter_map(|l| self.normalize(l))
            .collect()
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.contains(&word.trim().to_lowercase())
    }
}
