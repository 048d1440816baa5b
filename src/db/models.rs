// Data models: Rust structs that map to database rows.
//
// These are the types that flow between the stages and the store. They're
// separate from the queries so stage code can use them without depending on
// rusqlite or sqlx directly.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::corpus::{MediaType, Partition};

/// One ranked term of a partition. Rank is 1-based and unique per partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyKeyword {
    pub date: NaiveDate,
    pub source: String,
    pub media_type: MediaType,
    pub word: String,
    pub count: i64,
    pub weight: f64,
    pub rank: i64,
}

impl DailyKeyword {
    pub fn partition(&self) -> Partition {
        Partition::new(self.date, self.source.clone(), self.media_type)
    }
}

/// One topic of a partition's factorization. `topic_id` is local to the fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTopic {
    pub date: NaiveDate,
    pub source: String,
    pub media_type: MediaType,
    pub topic_id: i64,
    pub topic_label: String,
    pub keywords: Vec<String>,
    pub articles_count: i64,
}

impl DailyTopic {
    pub fn partition(&self) -> Partition {
        Partition::new(self.date, self.source.clone(), self.media_type)
    }
}

/// A long-lived narrative. `cluster_id` is global and never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeCluster {
    pub cluster_id: i64,
    pub label: String,
    pub top_keywords: Vec<String>,
    pub size: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeAssignment {
    pub cluster_id: i64,
    pub article_id: i64,
    /// Cosine distance to the cluster centroid.
    pub distance: f64,
}

/// A cluster opened by this run. Ids are allocated by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNarrativeCluster {
    pub label: String,
    pub top_keywords: Vec<String>,
    /// (article_id, distance)
    pub members: Vec<(i64, f64)>,
}

/// Everything one clustering run writes, applied in a single transaction.
///
/// Prior assignments of every article in `window_article_ids` are replaced by
/// `assignments` plus the members of `new_clusters`; cluster sizes are then
/// recomputed from the live assignment counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NarrativeUpdate {
    pub window_article_ids: Vec<i64>,
    pub assignments: Vec<NarrativeAssignment>,
    pub new_clusters: Vec<NewNarrativeCluster>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaBiasScore {
    pub date: NaiveDate,
    pub source: String,
    pub theme: String,
    pub bias_score: f64,
    pub methodology: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spike {
    pub date: NaiveDate,
    pub source: String,
    pub media_type: MediaType,
    pub topic_id: i64,
    pub spike_score: f64,
    pub baseline_window: i64,
    pub details: serde_json::Value,
}

/// Lifetime granularity. Each kind has its own table of identical shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifetimeKind {
    Keyword,
    Topic,
    Theme,
}

impl LifetimeKind {
    pub const ALL: [LifetimeKind; 3] = [LifetimeKind::Keyword, LifetimeKind::Topic, LifetimeKind::Theme];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifetimeKind::Keyword => "keyword",
            LifetimeKind::Topic => "topic",
            LifetimeKind::Theme => "theme",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            LifetimeKind::Keyword => "keyword_lifetime",
            LifetimeKind::Topic => "topic_lifetime",
            LifetimeKind::Theme => "theme_lifetime",
        }
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            LifetimeKind::Keyword => "word",
            LifetimeKind::Topic => "topic_label",
            LifetimeKind::Theme => "theme",
        }
    }

    /// Daily table feeding this kind, with its mention column.
    pub fn source_table(&self) -> (&'static str, &'static str) {
        match self {
            LifetimeKind::Keyword => ("keywords_daily", "count"),
            LifetimeKind::Topic | LifetimeKind::Theme => ("topics_daily", "articles_count"),
        }
    }
}

impl fmt::Display for LifetimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifetimeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword" | "keywords" => Ok(LifetimeKind::Keyword),
            "topic" | "topics" => Ok(LifetimeKind::Topic),
            "theme" | "themes" => Ok(LifetimeKind::Theme),
            other => anyhow::bail!("unknown lifetime kind '{other}' (expected keyword, topic or theme)"),
        }
    }
}

/// Shape of one day's per-source rows feeding a lifetime kind: how many rows
/// and how many mentions. A merged day whose digest later differs was
/// rewritten after it was merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayDigest {
    pub date: NaiveDate,
    pub rows: i64,
    pub mentions: i64,
}

/// Running first/last/peak/total record for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifetimeRecord {
    pub entity: String,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
    pub peak_date: NaiveDate,
    pub peak_mentions: i64,
    pub total_mentions: i64,
    pub sources_covered: BTreeSet<String>,
}
