// Cluster keywords and labels from member lemmas.
//
// A lemma carrying at least `dominant_ratio` of a cluster's lemma mass says
// more about the document boilerplate than the story, so it is dropped before
// ranking.

use std::collections::HashMap;

use crate::corpus::{CleanedDocument, LemmaFilter};

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    /// Empty when no lemma survives; the store then names the cluster by id.
    pub label: String,
    pub top_keywords: Vec<String>,
}

pub fn summarize(
    members: &[&CleanedDocument],
    filter: &LemmaFilter,
    top_keywords: usize,
    label_terms: usize,
    dominant_ratio: f64,
) -> ClusterSummary {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;
    for doc in members {
        for lemma in filter.filter(&doc.lemmas) {
            *counts.entry(lemma).or_insert(0) += 1;
            total += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, c)| (*c as f64) / (total.max(1) as f64) < dominant_ratio)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let top_keywords: Vec<String> = ranked.into_iter().take(top_keywords).map(|(w, _)| w).collect();
    let label = top_keywords
        .iter()
        .take(label_terms)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");

    ClusterSummary { label, top_keywords }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::MediaType;
    use chrono::NaiveDate;

    fn doc(id: i64, lemmas: &[&str]) -> CleanedDocument {
        CleanedDocument {
            article_id: id,
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            source: "franceinfo".into(),
            media_type: MediaType::Tv,
            cleaned_text: String::new(),
            lemmas: lemmas.iter().map(|s| s.to_string()).collect(),
            entities: Default::default(),
        }
    }

    #[test]
    fn test_ranks_by_frequency_then_alphabetically() {
        let a = doc(1, &["agriculteur", "colère", "tracteur", "salon"]);
        let b = doc(2, &["agriculteur", "colère", "paille", "salon"]);
        let c = doc(3, &["agriculteur", "tracteur", "préfecture", "blocage"]);
        let s = summarize(&[&a, &b, &c], &LemmaFilter::default(), 12, 4, 0.40);
        assert_eq!(s.top_keywords[0], "agriculteur");
        assert_eq!(&s.top_keywords[1..4], ["colère", "salon", "tracteur"]);
        assert_eq!(s.label, "agriculteur, colère, salon, tracteur");
    }

    #[test]
    fn test_drops_dominant_lemma() {
        let a = doc(1, &["incendie", "incendie", "incendie", "forêt"]);
        let b = doc(2, &["incendie", "incendie", "pompier"]);
        let s = summarize(&[&a, &b], &LemmaFilter::default(), 12, 4, 0.40);
        assert!(!s.top_keywords.contains(&"incendie".to_string()));
        assert_eq!(s.top_keywords, vec!["forêt", "pompier"]);
    }

    #[test]
    fn test_empty_when_nothing_survives() {
        let a = doc(1, &["le", "de"]);
        let s = summarize(&[&a], &LemmaFilter::default(), 12, 4, 0.40);
        assert!(s.label.is_empty());
        assert!(s.top_keywords.is_empty());
    }
}
