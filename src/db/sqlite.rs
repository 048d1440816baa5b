// SqliteDatabase: rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Send.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{
    DailyKeyword, DailyTopic, DayDigest, LifetimeKind, LifetimeRecord, MediaBiasScore, NarrativeAssignment,
    NarrativeCluster, NarrativeUpdate, Spike,
};
use super::queries;
use super::traits::Database;
use crate::corpus::{CleanedDocument, Partition};

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn row_counts(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn.lock().await;
        queries::row_counts(&conn)
    }

    async fn get_run_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        queries::get_run_state(&conn, key)
    }

    async fn set_run_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::set_run_state(&conn, key, value)
    }

    async fn get_all_run_state(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().await;
        queries::get_all_run_state(&conn)
    }

    async fn upsert_documents(&self, docs: &[CleanedDocument]) -> Result<usize> {
        let conn = self.conn.lock().await;
        queries::upsert_documents(&conn, docs)
    }

    async fn get_documents(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<CleanedDocument>> {
        let conn = self.conn.lock().await;
        queries::get_documents(&conn, from, to)
    }

    async fn replace_keywords(&self, partition: &Partition, rows: &[DailyKeyword]) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::replace_keywords(&conn, partition, rows)
    }

    async fn prune_keywords(&self, date: NaiveDate, keep: &[Partition]) -> Result<usize> {
        let conn = self.conn.lock().await;
        queries::prune_keywords(&conn, date, keep)
    }

    async fn get_keywords(&self, partition: &Partition) -> Result<Vec<DailyKeyword>> {
        let conn = self.conn.lock().await;
        queries::get_keywords(&conn, partition)
    }

    async fn get_keywords_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyKeyword>> {
        let conn = self.conn.lock().await;
        queries::get_keywords_between(&conn, from, to)
    }

    async fn replace_topics(&self, partition: &Partition, rows: &[DailyTopic]) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::replace_topics(&conn, partition, rows)
    }

    async fn prune_topics(&self, date: NaiveDate, keep: &[Partition]) -> Result<usize> {
        let conn = self.conn.lock().await;
        queries::prune_topics(&conn, date, keep)
    }

    async fn get_topics_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyTopic>> {
        let conn = self.conn.lock().await;
        queries::get_topics_between(&conn, from, to)
    }

    async fn get_narrative_clusters(&self) -> Result<Vec<NarrativeCluster>> {
        let conn = self.conn.lock().await;
        queries::get_narrative_clusters(&conn)
    }

    async fn get_assignments(&self, article_ids: &[i64]) -> Result<Vec<NarrativeAssignment>> {
        let conn = self.conn.lock().await;
        queries::get_assignments(&conn, article_ids)
    }

    async fn apply_narrative_update(&self, update: &NarrativeUpdate) -> Result<Vec<i64>> {
        let conn = self.conn.lock().await;
        queries::apply_narrative_update(&conn, update)
    }

    async fn replace_bias_scores(&self, date: NaiveDate, rows: &[MediaBiasScore]) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::replace_bias_scores(&conn, date, rows)
    }

    async fn get_bias_scores(&self, date: NaiveDate) -> Result<Vec<MediaBiasScore>> {
        let conn = self.conn.lock().await;
        queries::get_bias_scores(&conn, date)
    }

    async fn replace_spikes(&self, date: NaiveDate, rows: &[Spike]) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::replace_spikes(&conn, date, rows)
    }

    async fn get_spikes(&self, date: NaiveDate) -> Result<Vec<Spike>> {
        let conn = self.conn.lock().await;
        queries::get_spikes(&conn, date)
    }

    async fn get_lifetimes(&self, kind: LifetimeKind, entities: &[String]) -> Result<Vec<LifetimeRecord>> {
        let conn = self.conn.lock().await;
        queries::get_lifetimes(&conn, kind, entities)
    }

    async fn get_all_lifetimes(&self, kind: LifetimeKind) -> Result<Vec<LifetimeRecord>> {
        let conn = self.conn.lock().await;
        queries::get_all_lifetimes(&conn, kind)
    }

    async fn lifetime_digests(&self, kind: LifetimeKind, through: NaiveDate) -> Result<Vec<DayDigest>> {
        let conn = self.conn.lock().await;
        queries::lifetime_digests(&conn, kind, through)
    }

    async fn get_merged_days(&self, kind: LifetimeKind) -> Result<Vec<DayDigest>> {
        let conn = self.conn.lock().await;
        queries::get_merged_days(&conn, kind)
    }

    async fn merge_lifetimes(
        &self,
        kind: LifetimeKind,
        records: &[LifetimeRecord],
        days: &[DayDigest],
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::merge_lifetimes(&conn, kind, records, days)
    }

    async fn replace_lifetimes(
        &self,
        kind: LifetimeKind,
        records: &[LifetimeRecord],
        days: &[DayDigest],
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::replace_lifetimes(&conn, kind, records, days)
    }
}
