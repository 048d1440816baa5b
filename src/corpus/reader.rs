// CorpusReader: where the stages get their cleaned documents from.
//
// The analytics core only reads the corpus. In production the documents live
// in the `documents_clean` table written by the upstream NLP stage (or by
// `agenda import`); tests feed a fixed in-memory list.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use super::document::CleanedDocument;
use crate::db::Database;

#[async_trait]
pub trait CorpusReader: Send + Sync {
    /// Documents dated within `[from, to]` inclusive, ordered by date then id.
    async fn read_window(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<CleanedDocument>>;
}

/// Reads from the `documents_clean` table of the analytics store.
pub struct StoreCorpus {
    db: Arc<dyn Database>,
}

impl StoreCorpus {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CorpusReader for StoreCorpus {
    async fn read_window(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<CleanedDocument>> {
        self.db.get_documents(from, to).await
    }
}

/// A fixed document list. Used by tests and one-off runs over a file.
pub struct MemoryCorpus {
    docs: Vec<CleanedDocument>,
}

impl MemoryCorpus {
    pub fn new(mut docs: Vec<CleanedDocument>) -> Self {
        docs.sort_by(|a, b| (a.date, a.article_id).cmp(&(b.date, b.article_id)));
        Self { docs }
    }
}

#[async_trait]
impl CorpusReader for MemoryCorpus {
    async fn read_window(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<CleanedDocument>> {
        Ok(self
            .docs
            .iter()
            .filter(|d| d.date >= from && d.date <= to)
            .cloned()
            .collect())
    }
}

/// Parse a JSON-lines file of cleaned documents, one object per line.
///
/// Blank lines are ignored. A malformed line fails the whole import with its
/// line number so a partial file never lands in the store.
pub fn read_jsonl(path: &Path) -> Result<Vec<CleanedDocument>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_jsonl(&content)
}

pub fn parse_jsonl(content: &str) -> Result<Vec<CleanedDocument>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<CleanedDocument>(line)
                .with_context(|| format!("Invalid document on line {}", i + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jsonl_skips_blank_lines() {
        let input = concat!(
            r#"{"article_id":1,"date":"2024-01-10","source":"bfmtv","media_type":"tv","cleaned_text":"a","lemmas":["budget"]}"#,
            "\n\n",
            r#"{"article_id":2,"date":"2024-01-10","source":"lemonde","media_type":"press","cleaned_text":"b"}"#,
            "\n",
        );
        let docs = parse_jsonl(input).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].lemmas, vec!["budget"]);
    }

    #[test]
    fn test_parse_jsonl_reports_line_number() {
        let input = "{\"article_id\":1}\n";
        let err = parse_jsonl(input).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[tokio::test]
    async fn test_memory_corpus_window_is_inclusive() {
        let mk = |id: i64, day: u32| CleanedDocument {
            article_id: id,
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            source: "s".into(),
            media_type: super::super::MediaType::Press,
            cleaned_text: String::new(),
            lemmas: vec![],
            entities: Default::default(),
        };
        let corpus = MemoryCorpus::new(vec![mk(1, 9), mk(2, 10), mk(3, 11), mk(4, 12)]);
        let docs = corpus
            .read_window(
                NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 11).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(docs.iter().map(|d| d.article_id).collect::<Vec<_>>(), vec![2, 3]);
    }
}
