// Theme taxonomy: canonical themes defined by keyword lists.
//
// Loaded from a JSON object mapping a theme name to its keywords, e.g.
// {"économie": ["budget", "inflation"], "social": ["grève", "retraite"]}.
// A topic maps to the theme sharing the most keywords with it; with no
// overlap (or no taxonomy at all) the topic label itself is the theme.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};

use crate::db::models::DailyTopic;

#[derive(Debug, Clone, Default)]
pub struct ThemeTaxonomy {
    themes: BTreeMap<String, HashSet<String>>,
}

impl ThemeTaxonomy {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read theme taxonomy {}", path.display()))?;
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid theme taxonomy in {}", path.display()))?;
        Ok(Self::from_map(raw))
    }

    pub fn from_map(raw: BTreeMap<String, Vec<String>>) -> Self {
        let themes = raw
            .into_iter()
            .map(|(theme, keywords)| {
                let set = keywords
                    .into_iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
                (theme, set)
            })
            .collect();
        Self { themes }
    }

    pub fn is_empty(&self) -> bool {
        self.themes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.themes.len()
    }

    /// Canonical theme for a topic.
    pub fn theme_for(&self, topic: &DailyTopic) -> String {
        let mut best: Option<(&str, usize)> = None;
        for (theme, keywords) in &self.themes {
            let hits = topic
                .keywords
                .iter()
                .filter(|k| keywords.contains(k.as_str()))
                .count();
            if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
                best = Some((theme, hits));
            }
        }
        match best {
            Some((theme, _)) => theme.to_string(),
            None => topic.topic_label.clone(),
        }
    }
}
