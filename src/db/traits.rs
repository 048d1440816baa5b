// Database trait: backend-agnostic async interface for all DB operations.
//
// Implementors: SqliteDatabase (wraps rusqlite), PgDatabase (wraps sqlx).
// All methods are async so both sync (rusqlite via Mutex) and native async
// (sqlx) backends fit behind a single interface.
//
// Every `replace_*` method swaps the rows of one partition (or one date)
// inside a single transaction, so a crash mid-write leaves either the old
// rows or the new ones, never a mix.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use super::models::{
    DailyKeyword, DailyTopic, DayDigest, LifetimeKind, LifetimeRecord, MediaBiasScore, NarrativeAssignment,
    NarrativeCluster, NarrativeUpdate, Spike,
};
use crate::corpus::{CleanedDocument, Partition};

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    /// Row count for each analytics table, in a fixed order.
    async fn row_counts(&self) -> Result<Vec<(String, i64)>>;

    // --- Run state ---

    /// Get a run state value by key (e.g., "narratives_window").
    async fn get_run_state(&self, key: &str) -> Result<Option<String>>;

    /// Set a run state value (upsert).
    async fn set_run_state(&self, key: &str, value: &str) -> Result<()>;

    /// All run state rows, ordered by key.
    async fn get_all_run_state(&self) -> Result<Vec<(String, String)>>;

    // --- Corpus ---

    /// Insert or replace cleaned documents keyed by article_id. Returns the
    /// number of documents written.
    async fn upsert_documents(&self, docs: &[CleanedDocument]) -> Result<usize>;

    /// Documents dated within `[from, to]`, ordered by date then article_id.
    async fn get_documents(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<CleanedDocument>>;

    // --- Keywords ---

    /// Replace every keyword row of a partition.
    async fn replace_keywords(&self, partition: &Partition, rows: &[DailyKeyword]) -> Result<()>;

    /// Delete the keyword rows of `date` whose partition is not in `keep`.
    /// Returns the number of partitions removed.
    async fn prune_keywords(&self, date: NaiveDate, keep: &[Partition]) -> Result<usize>;

    /// Keyword rows of one partition ordered by rank.
    async fn get_keywords(&self, partition: &Partition) -> Result<Vec<DailyKeyword>>;

    /// Keyword rows dated within `[from, to]`, ordered by date, source, media_type, rank.
    async fn get_keywords_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyKeyword>>;

    // --- Topics ---

    /// Replace every topic row of a partition.
    async fn replace_topics(&self, partition: &Partition, rows: &[DailyTopic]) -> Result<()>;

    /// Delete the topic rows of `date` whose partition is not in `keep`.
    /// Returns the number of partitions removed.
    async fn prune_topics(&self, date: NaiveDate, keep: &[Partition]) -> Result<usize>;

    /// Topic rows dated within `[from, to]`, ordered by date, source, media_type, topic_id.
    async fn get_topics_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyTopic>>;

    // --- Narratives ---

    /// All clusters ordered by cluster_id.
    async fn get_narrative_clusters(&self) -> Result<Vec<NarrativeCluster>>;

    /// Current assignments of the given articles.
    async fn get_assignments(&self, article_ids: &[i64]) -> Result<Vec<NarrativeAssignment>>;

    /// Apply one clustering run atomically. Returns the ids given to the new
    /// clusters, in the order they were supplied.
    async fn apply_narrative_update(&self, update: &NarrativeUpdate) -> Result<Vec<i64>>;

    // --- Bias ---

    /// Replace every bias score of a date.
    async fn replace_bias_scores(&self, date: NaiveDate, rows: &[MediaBiasScore]) -> Result<()>;

    async fn get_bias_scores(&self, date: NaiveDate) -> Result<Vec<MediaBiasScore>>;

    // --- Spikes ---

    /// Replace every spike of a date.
    async fn replace_spikes(&self, date: NaiveDate, rows: &[Spike]) -> Result<()>;

    async fn get_spikes(&self, date: NaiveDate) -> Result<Vec<Spike>>;

    // --- Lifetimes ---

    /// Existing records for the given entities.
    async fn get_lifetimes(&self, kind: LifetimeKind, entities: &[String]) -> Result<Vec<LifetimeRecord>>;

    /// Every record of a kind, ordered by entity.
    async fn get_all_lifetimes(&self, kind: LifetimeKind) -> Result<Vec<LifetimeRecord>>;

    /// Digest of every day up to `through` that has per-source rows feeding
    /// this kind, ordered by date.
    async fn lifetime_digests(&self, kind: LifetimeKind, through: NaiveDate) -> Result<Vec<DayDigest>>;

    /// Days already merged into this kind, with the digest they had then.
    async fn get_merged_days(&self, kind: LifetimeKind) -> Result<Vec<DayDigest>>;

    /// Upsert merged records and record `days` as merged, in one
    /// transaction. The store never moves a record backwards even if handed
    /// a stale one.
    async fn merge_lifetimes(
        &self,
        kind: LifetimeKind,
        records: &[LifetimeRecord],
        days: &[DayDigest],
    ) -> Result<()>;

    /// Swap every record and merged day of a kind for the given ones, in one
    /// transaction.
    async fn replace_lifetimes(
        &self,
        kind: LifetimeKind,
        records: &[LifetimeRecord],
        days: &[DayDigest],
    ) -> Result<()>;

    /// Drop every record and merged day of a kind.
    async fn reset_lifetimes(&self, kind: LifetimeKind) -> Result<()> {
        self.replace_lifetimes(kind, &[], &[]).await
    }
}
