// CleanedDocument and the partition key it is analysed under.
//
// Documents arrive from the upstream NLP stage already cleaned and
// lemmatized. The core never mutates them; it only groups them into
// (date, source, media_type) partitions, including the synthetic `ALL`
// partitions that pool every source.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source name used by the synthetic cross-source partitions.
pub const ALL_SOURCES: &str = "ALL";

/// Media families a document can belong to. `All` only appears on synthetic
/// partitions, never on an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MediaType {
    #[serde(rename = "tv")]
    Tv,
    #[serde(rename = "press")]
    Press,
    #[serde(rename = "social")]
    Social,
    #[serde(rename = "ALL")]
    All,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Tv => "tv",
            MediaType::Press => "press",
            MediaType::Social => "social",
            MediaType::All => "ALL",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown media type: {0}")]
pub struct UnknownMediaType(pub String);

impl FromStr for MediaType {
    type Err = UnknownMediaType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tv" => Ok(MediaType::Tv),
            "press" => Ok(MediaType::Press),
            "social" => Ok(MediaType::Social),
            "ALL" | "all" => Ok(MediaType::All),
            other => Err(UnknownMediaType(other.to_string())),
        }
    }
}

#[cfg(feature = "sqlite")]
impl rusqlite::types::ToSql for MediaType {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
    }
}

#[cfg(feature = "sqlite")]
impl rusqlite::types::FromSql for MediaType {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse()
            .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
    }
}

/// A cleaned, lemmatized article or post handed over by the NLP stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedDocument {
    pub article_id: i64,
    pub date: NaiveDate,
    pub source: String,
    pub media_type: MediaType,
    pub cleaned_text: String,
    #[serde(default)]
    pub lemmas: Vec<String>,
    /// Entity type (PER, ORG, LOC, ...) to surface forms.
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<String>>,
}

/// The unit of daily analysis.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub date: NaiveDate,
    pub source: String,
    pub media_type: MediaType,
}

impl Partition {
    pub fn new(date: NaiveDate, source: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            date,
            source: source.into(),
            media_type,
        }
    }

    /// True for the pooled `ALL` partitions.
    pub fn is_synthetic(&self) -> bool {
        self.source == ALL_SOURCES
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.date, self.source, self.media_type)
    }
}

/// Group documents into every partition they contribute to.
///
/// Each document lands in its own `(date, source, media_type)` partition, in
/// `(date, ALL, media_type)` and in `(date, ALL, ALL)`. The synthetic
/// partitions are built from the documents directly, never by merging the
/// per-source results, so nothing is counted twice. Within a partition the
/// documents are ordered by `article_id` so downstream fits see a stable order.
pub fn partition_documents(docs: &[CleanedDocument]) -> BTreeMap<Partition, Vec<&CleanedDocument>> {
    let mut groups: BTreeMap<Partition, Vec<&CleanedDocument>> = BTreeMap::new();

    for doc in docs {
        if doc.media_type == MediaType::All || doc.source == ALL_SOURCES {
            // Upstream must never hand us synthetic rows; ignore them rather
            // than double count.
            continue;
        }
        groups
            .entry(Partition::new(doc.date, doc.source.clone(), doc.media_type))
            .or_default()
            .push(doc);
        groups
            .entry(Partition::new(doc.date, ALL_SOURCES, doc.media_type))
            .or_default()
            .push(doc);
        groups
            .entry(Partition::new(doc.date, ALL_SOURCES, MediaType::All))
            .or_default()
            .push(doc);
    }

    for members in groups.values_mut() {
        members.sort_by_key(|d| d.article_id);
        members.dedup_by_key(|d| d.article_id);
    }

    groups
}
