// PgDatabase: PostgreSQL backend implementing the Database trait.
//
// Uses sqlx PgPool for native async queries. All queries use runtime
// parameter binding (not compile-time macros) to avoid requiring
// DATABASE_URL at compile time.
//
// Key differences from SQLite:
// - DATE for calendar days, TIMESTAMPTZ for audit stamps
// - JSONB instead of TEXT for structured data
// - GREATEST() instead of two-argument MAX() in monotonic upserts
// - GENERATED ALWAYS AS IDENTITY for auto-increment

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx_core::pool::Pool;
use sqlx_core::row::Row;
use sqlx_postgres::{PgRow, Postgres};

use super::models::{
    DailyKeyword, DailyTopic, DayDigest, LifetimeKind, LifetimeRecord, MediaBiasScore, NarrativeAssignment,
    NarrativeCluster, NarrativeUpdate, Spike,
};
use super::traits::Database;
use super::ANALYTICS_TABLES;
use crate::corpus::{CleanedDocument, MediaType, Partition, ALL_SOURCES};
use crate::error::StageError;

/// Type alias for the PostgreSQL connection pool.
pub type PgPool = Pool<Postgres>;

pub struct PgDatabase {
    pool: PgPool,
}

/// Map a unique/check violation to StoreConflict, anything else to anyhow.
fn conflict_or(err: sqlx_core::Error, scope: &str) -> anyhow::Error {
    if let sqlx_core::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() || db_err.is_check_violation() {
            return StageError::conflict(scope, db_err.message().to_string()).into();
        }
    }
    err.into()
}

fn media_type(row: &PgRow, idx: usize) -> Result<MediaType> {
    let raw: String = row.try_get(idx)?;
    Ok(raw.parse()?)
}

fn json<T: serde::de::DeserializeOwned>(row: &PgRow, idx: usize) -> Result<T> {
    let value: serde_json::Value = row.try_get(idx)?;
    Ok(serde_json::from_value(value)?)
}

impl PgDatabase {
    /// Connect to PostgreSQL and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    ///
    /// Holds a session-level advisory lock on a dedicated connection for the
    /// whole sequence so two processes starting together don't race. The
    /// unlock always runs, even when a migration fails.
    async fn run_migrations(&self) -> Result<()> {
        // ASCII "AGENDA" as a big-endian i64.
        const MIGRATION_LOCK_KEY: i64 = 0x4147_454E_4441;

        let mut lock_conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for migration advisory lock")?;

        sqlx_core::query::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to acquire migration advisory lock")?;

        let migration_result: Result<()> = async {
            sqlx_core::query::query(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .execute(&self.pool)
            .await?;

            let migrations = [
                (1, include_str!("../../migrations/postgres/0001_initial.sql")),
                (
                    2,
                    include_str!("../../migrations/postgres/0002_lifetime_merged_days.sql"),
                ),
            ];

            for (version, sql) in migrations {
                let applied: bool = sqlx_core::query::query(
                    "SELECT COUNT(*) > 0 FROM schema_version WHERE version = $1",
                )
                .bind(version)
                .fetch_one(&self.pool)
                .await
                .map(|row| row.get::<bool, _>(0))
                .unwrap_or(false);

                if !applied {
                    let mut tx = self.pool.begin().await?;
                    sqlx_core::raw_sql::raw_sql(sql).execute(&mut *tx).await?;
                    tx.commit().await?;
                }
            }

            Ok(())
        }
        .await;

        let unlock_result = sqlx_core::query::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to release migration advisory lock");

        migration_result?;
        unlock_result?;

        Ok(())
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn table_count(&self) -> Result<i64> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*)::bigint FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn row_counts(&self) -> Result<Vec<(String, i64)>> {
        let mut counts = Vec::with_capacity(ANALYTICS_TABLES.len());
        for table in ANALYTICS_TABLES {
            let row = sqlx_core::query::query(&format!("SELECT COUNT(*)::bigint FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
            counts.push((table.to_string(), row.get::<i64, _>(0)));
        }
        Ok(counts)
    }

    async fn get_run_state(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx_core::query::query("SELECT value FROM run_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn set_run_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx_core::query::query(
            "INSERT INTO run_state (key, value, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT(key) DO UPDATE SET value = $2, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_all_run_state(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx_core::query::query("SELECT key, value FROM run_state ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>(0), r.get::<String, _>(1)))
            .collect())
    }

    async fn upsert_documents(&self, docs: &[CleanedDocument]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for doc in docs {
            sqlx_core::query::query(
                "INSERT INTO documents_clean (article_id, date, source, media_type, cleaned_text, lemmas, entities)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT(article_id) DO UPDATE SET
                    date = $2, source = $3, media_type = $4,
                    cleaned_text = $5, lemmas = $6, entities = $7",
            )
            .bind(doc.article_id)
            .bind(doc.date)
            .bind(&doc.source)
            .bind(doc.media_type.as_str())
            .bind(&doc.cleaned_text)
            .bind(serde_json::to_value(&doc.lemmas)?)
            .bind(serde_json::to_value(&doc.entities)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(docs.len())
    }

    async fn get_documents(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<CleanedDocument>> {
        let rows = sqlx_core::query::query(
            "SELECT article_id, date, source, media_type, cleaned_text, lemmas, entities
             FROM documents_clean
             WHERE date >= $1 AND date <= $2
             ORDER BY date, article_id",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(CleanedDocument {
                    article_id: r.try_get(0)?,
                    date: r.try_get(1)?,
                    source: r.try_get(2)?,
                    media_type: media_type(r, 3)?,
                    cleaned_text: r.try_get(4)?,
                    lemmas: json(r, 5)?,
                    entities: json(r, 6)?,
                })
            })
            .collect()
    }

    async fn replace_keywords(&self, partition: &Partition, rows: &[DailyKeyword]) -> Result<()> {
        let scope = format!("keywords {partition}");
        let mut tx = self.pool.begin().await?;
        sqlx_core::query::query(
            "DELETE FROM keywords_daily WHERE date = $1 AND source = $2 AND media_type = $3",
        )
        .bind(partition.date)
        .bind(&partition.source)
        .bind(partition.media_type.as_str())
        .execute(&mut *tx)
        .await?;

        for kw in rows {
            sqlx_core::query::query(
                "INSERT INTO keywords_daily (date, source, media_type, word, count, weight, rank)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(kw.date)
            .bind(&kw.source)
            .bind(kw.media_type.as_str())
            .bind(&kw.word)
            .bind(kw.count)
            .bind(kw.weight)
            .bind(kw.rank)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_or(e, &scope))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_keywords(&self, partition: &Partition) -> Result<Vec<DailyKeyword>> {
        let rows = sqlx_core::query::query(
            "SELECT date, source, media_type, word, count, weight, rank
             FROM keywords_daily
             WHERE date = $1 AND source = $2 AND media_type = $3
             ORDER BY rank",
        )
        .bind(partition.date)
        .bind(&partition.source)
        .bind(partition.media_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(keyword_from_row).collect()
    }

    async fn get_keywords_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyKeyword>> {
        let rows = sqlx_core::query::query(
            "SELECT date, source, media_type, word, count, weight, rank
             FROM keywords_daily
             WHERE date >= $1 AND date <= $2
             ORDER BY date, source, media_type, rank",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(keyword_from_row).collect()
    }

    async fn replace_topics(&self, partition: &Partition, rows: &[DailyTopic]) -> Result<()> {
        let scope = format!("topics {partition}");
        let mut tx = self.pool.begin().await?;
        sqlx_core::query::query(
            "DELETE FROM topics_daily WHERE date = $1 AND source = $2 AND media_type = $3",
        )
        .bind(partition.date)
        .bind(&partition.source)
        .bind(partition.media_type.as_str())
        .execute(&mut *tx)
        .await?;

        for topic in rows {
            sqlx_core::query::query(
                "INSERT INTO topics_daily (date, source, media_type, topic_id, topic_label, keywords, articles_count)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(topic.date)
            .bind(&topic.source)
            .bind(topic.media_type.as_str())
            .bind(topic.topic_id)
            .bind(&topic.topic_label)
            .bind(serde_json::to_value(&topic.keywords)?)
            .bind(topic.articles_count)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_or(e, &scope))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_topics_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyTopic>> {
        let rows = sqlx_core::query::query(
            "SELECT date, source, media_type, topic_id, topic_label, keywords, articles_count
             FROM topics_daily
             WHERE date >= $1 AND date <= $2
             ORDER BY date, source, media_type, topic_id",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(DailyTopic {
                    date: r.try_get(0)?,
                    source: r.try_get(1)?,
                    media_type: media_type(r, 2)?,
                    topic_id: r.try_get(3)?,
                    topic_label: r.try_get(4)?,
                    keywords: json(r, 5)?,
                    articles_count: r.try_get(6)?,
                })
            })
            .collect()
    }

    async fn get_narrative_clusters(&self) -> Result<Vec<NarrativeCluster>> {
        let rows = sqlx_core::query::query(
            "SELECT cluster_id, label, top_keywords, size, created_at::text
             FROM narratives_clusters
             ORDER BY cluster_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(NarrativeCluster {
                    cluster_id: r.try_get(0)?,
                    label: r.try_get(1)?,
                    top_keywords: json(r, 2)?,
                    size: r.try_get(3)?,
                    created_at: r.try_get(4)?,
                })
            })
            .collect()
    }

    async fn get_assignments(&self, article_ids: &[i64]) -> Result<Vec<NarrativeAssignment>> {
        let rows = sqlx_core::query::query(
            "SELECT cluster_id, article_id, distance
             FROM narratives_assignments
             WHERE article_id = ANY($1)
             ORDER BY article_id",
        )
        .bind(article_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(NarrativeAssignment {
                    cluster_id: r.try_get(0)?,
                    article_id: r.try_get(1)?,
                    distance: r.try_get(2)?,
                })
            })
            .collect()
    }

    async fn apply_narrative_update(&self, update: &NarrativeUpdate) -> Result<Vec<i64>> {
        let scope = "narratives";
        let mut tx = self.pool.begin().await?;

        sqlx_core::query::query("DELETE FROM narratives_assignments WHERE article_id = ANY($1)")
            .bind(&update.window_article_ids)
            .execute(&mut *tx)
            .await?;

        let mut created = Vec::with_capacity(update.new_clusters.len());
        for cluster in &update.new_clusters {
            let row = sqlx_core::query::query(
                "INSERT INTO narratives_clusters (label, top_keywords, size)
                 VALUES ($1, $2, 0)
                 RETURNING cluster_id",
            )
            .bind(&cluster.label)
            .bind(serde_json::to_value(&cluster.top_keywords)?)
            .fetch_one(&mut *tx)
            .await?;
            let id: i64 = row.try_get(0)?;

            if cluster.label.is_empty() {
                sqlx_core::query::query(
                    "UPDATE narratives_clusters SET label = $1 WHERE cluster_id = $2",
                )
                .bind(format!("Cluster {id}"))
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }

            for (article_id, distance) in &cluster.members {
                insert_assignment(&mut tx, *article_id, id, *distance)
                    .await
                    .map_err(|e| conflict_or(e, scope))?;
            }
            created.push(id);
        }

        for a in &update.assignments {
            insert_assignment(&mut tx, a.article_id, a.cluster_id, a.distance)
                .await
                .map_err(|e| conflict_or(e, scope))?;
        }

        sqlx_core::query::query(
            "UPDATE narratives_clusters c SET size = (
                SELECT COUNT(*) FROM narratives_assignments a WHERE a.cluster_id = c.cluster_id
             )",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn replace_bias_scores(&self, date: NaiveDate, rows: &[MediaBiasScore]) -> Result<()> {
        let scope = format!("bias {date}");
        let mut tx = self.pool.begin().await?;
        sqlx_core::query::query("DELETE FROM media_bias_scores WHERE date = $1")
            .bind(date)
            .execute(&mut *tx)
            .await?;

        for score in rows {
            sqlx_core::query::query(
                "INSERT INTO media_bias_scores (date, source, theme, bias_score, methodology, details)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(score.date)
            .bind(&score.source)
            .bind(&score.theme)
            .bind(score.bias_score)
            .bind(&score.methodology)
            .bind(&score.details)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_or(e, &scope))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_bias_scores(&self, date: NaiveDate) -> Result<Vec<MediaBiasScore>> {
        let rows = sqlx_core::query::query(
            "SELECT date, source, theme, bias_score, methodology, details
             FROM media_bias_scores
             WHERE date = $1
             ORDER BY theme, source",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(MediaBiasScore {
                    date: r.try_get(0)?,
                    source: r.try_get(1)?,
                    theme: r.try_get(2)?,
                    bias_score: r.try_get(3)?,
                    methodology: r.try_get(4)?,
                    details: r.try_get(5)?,
                })
            })
            .collect()
    }

    async fn replace_spikes(&self, date: NaiveDate, rows: &[Spike]) -> Result<()> {
        let scope = format!("spikes {date}");
        let mut tx = self.pool.begin().await?;
        sqlx_core::query::query("DELETE FROM spikes WHERE date = $1")
            .bind(date)
            .execute(&mut *tx)
            .await?;

        for spike in rows {
            sqlx_core::query::query(
                "INSERT INTO spikes (date, source, media_type, topic_id, spike_score, baseline_window, details)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(spike.date)
            .bind(&spike.source)
            .bind(spike.media_type.as_str())
            .bind(spike.topic_id)
            .bind(spike.spike_score)
            .bind(spike.baseline_window)
            .bind(&spike.details)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_or(e, &scope))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_spikes(&self, date: NaiveDate) -> Result<Vec<Spike>> {
        let rows = sqlx_core::query::query(
            "SELECT date, source, media_type, topic_id, spike_score, baseline_window, details
             FROM spikes
             WHERE date = $1
             ORDER BY spike_score DESC, source, media_type, topic_id",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(Spike {
                    date: r.try_get(0)?,
                    source: r.try_get(1)?,
                    media_type: media_type(r, 2)?,
                    topic_id: r.try_get(3)?,
                    spike_score: r.try_get(4)?,
                    baseline_window: r.try_get(5)?,
                    details: r.try_get(6)?,
                })
            })
            .collect()
    }

    async fn get_lifetimes(&self, kind: LifetimeKind, entities: &[String]) -> Result<Vec<LifetimeRecord>> {
        let sql = format!(
            "{} WHERE {} = ANY($1)",
            lifetime_select(kind),
            kind.key_column()
        );
        let rows = sqlx_core::query::query(&sql)
            .bind(entities)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(lifetime_from_row).collect()
    }

    async fn get_all_lifetimes(&self, kind: LifetimeKind) -> Result<Vec<LifetimeRecord>> {
        let sql = format!("{} ORDER BY {}", lifetime_select(kind), kind.key_column());
        let rows = sqlx_core::query::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(lifetime_from_row).collect()
    }

    async fn lifetime_digests(&self, kind: LifetimeKind, through: NaiveDate) -> Result<Vec<DayDigest>> {
        let (table, mentions) = kind.source_table();
        let sql = format!(
            "SELECT date, COUNT(*)::bigint, SUM({mentions})::bigint
             FROM {table}
             WHERE date <= $1 AND source <> $2
             GROUP BY date
             ORDER BY date"
        );
        let rows = sqlx_core::query::query(&sql)
            .bind(through)
            .bind(ALL_SOURCES)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(digest_from_row).collect()
    }

    async fn get_merged_days(&self, kind: LifetimeKind) -> Result<Vec<DayDigest>> {
        let rows = sqlx_core::query::query(
            "SELECT date, row_count, mention_count FROM lifetime_merged_days WHERE kind = $1 ORDER BY date",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(digest_from_row).collect()
    }

    async fn merge_lifetimes(
        &self,
        kind: LifetimeKind,
        records: &[LifetimeRecord],
        days: &[DayDigest],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_lifetimes(&mut tx, kind, records, days).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_lifetimes(
        &self,
        kind: LifetimeKind,
        records: &[LifetimeRecord],
        days: &[DayDigest],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx_core::query::query(&format!("DELETE FROM {}", kind.table()))
            .execute(&mut *tx)
            .await?;
        sqlx_core::query::query("DELETE FROM lifetime_merged_days WHERE kind = $1")
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await?;
        write_lifetimes(&mut tx, kind, records, days).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn prune_keywords(&self, date: NaiveDate, keep: &[Partition]) -> Result<usize> {
        self.prune_partitions("keywords_daily", date, keep).await
    }

    async fn prune_topics(&self, date: NaiveDate, keep: &[Partition]) -> Result<usize> {
        self.prune_partitions("topics_daily", date, keep).await
    }
}

impl PgDatabase {
    /// Delete the rows of `date` in `table` whose (source, media_type) is not
    /// one of `keep`.
    async fn prune_partitions(&self, table: &str, date: NaiveDate, keep: &[Partition]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx_core::query::query(&format!(
            "SELECT DISTINCT source, media_type FROM {table} WHERE date = $1"
        ))
        .bind(date)
        .fetch_all(&mut *tx)
        .await?;

        let mut removed = 0;
        for row in &rows {
            let stale = Partition {
                date,
                source: row.try_get(0)?,
                media_type: media_type(row, 1)?,
            };
            if keep.contains(&stale) {
                continue;
            }
            sqlx_core::query::query(&format!(
                "DELETE FROM {table} WHERE date = $1 AND source = $2 AND media_type = $3"
            ))
            .bind(date)
            .bind(&stale.source)
            .bind(stale.media_type.as_str())
            .execute(&mut *tx)
            .await?;
            removed += 1;
        }
        tx.commit().await?;
        Ok(removed)
    }
}

/// Upsert records and merged days inside an open transaction. Conflicts
/// only widen a record.
async fn write_lifetimes(
    tx: &mut sqlx_core::transaction::Transaction<'_, Postgres>,
    kind: LifetimeKind,
    records: &[LifetimeRecord],
    days: &[DayDigest],
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {table} AS t ({key}, first_seen_date, last_seen_date, peak_date,
                                  peak_mentions, total_mentions, sources_covered, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
         ON CONFLICT ({key}) DO UPDATE SET
            first_seen_date = LEAST(t.first_seen_date, EXCLUDED.first_seen_date),
            last_seen_date = GREATEST(t.last_seen_date, EXCLUDED.last_seen_date),
            peak_date = CASE
                WHEN EXCLUDED.peak_mentions > t.peak_mentions THEN EXCLUDED.peak_date
                WHEN EXCLUDED.peak_mentions = t.peak_mentions THEN LEAST(t.peak_date, EXCLUDED.peak_date)
                ELSE t.peak_date END,
            peak_mentions = GREATEST(t.peak_mentions, EXCLUDED.peak_mentions),
            total_mentions = GREATEST(t.total_mentions, EXCLUDED.total_mentions),
            sources_covered = CASE
                WHEN jsonb_array_length(EXCLUDED.sources_covered) >= jsonb_array_length(t.sources_covered)
                THEN EXCLUDED.sources_covered ELSE t.sources_covered END,
            updated_at = NOW()",
        table = kind.table(),
        key = kind.key_column(),
    );

    for r in records {
        sqlx_core::query::query(&sql)
            .bind(&r.entity)
            .bind(r.first_seen)
            .bind(r.last_seen)
            .bind(r.peak_date)
            .bind(r.peak_mentions)
            .bind(r.total_mentions)
            .bind(serde_json::to_value(&r.sources_covered)?)
            .execute(&mut **tx)
            .await?;
    }
    for day in days {
        sqlx_core::query::query(
            "INSERT INTO lifetime_merged_days (kind, date, row_count, mention_count, merged_at)
             VALUES ($1, $2, $3, $4, NOW())
             ON CONFLICT (kind, date) DO UPDATE SET
                row_count = EXCLUDED.row_count, mention_count = EXCLUDED.mention_count, merged_at = NOW()",
        )
        .bind(kind.as_str())
        .bind(day.date)
        .bind(day.rows)
        .bind(day.mentions)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn digest_from_row(r: &PgRow) -> Result<DayDigest> {
    Ok(DayDigest {
        date: r.try_get(0)?,
        rows: r.try_get(1)?,
        mentions: r.try_get(2)?,
    })
}

async fn insert_assignment(
    tx: &mut sqlx_core::transaction::Transaction<'_, Postgres>,
    article_id: i64,
    cluster_id: i64,
    distance: f64,
) -> std::result::Result<(), sqlx_core::Error> {
    sqlx_core::query::query(
        "INSERT INTO narratives_assignments (article_id, cluster_id, distance) VALUES ($1, $2, $3)",
    )
    .bind(article_id)
    .bind(cluster_id)
    .bind(distance)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn keyword_from_row(r: &PgRow) -> Result<DailyKeyword> {
    Ok(DailyKeyword {
        date: r.try_get(0)?,
        source: r.try_get(1)?,
        media_type: media_type(r, 2)?,
        word: r.try_get(3)?,
        count: r.try_get(4)?,
        weight: r.try_get(5)?,
        rank: r.try_get(6)?,
    })
}

fn lifetime_select(kind: LifetimeKind) -> String {
    format!(
        "SELECT {key}, first_seen_date, last_seen_date, peak_date, peak_mentions, total_mentions, sources_covered
         FROM {table}",
        key = kind.key_column(),
        table = kind.table(),
    )
}

fn lifetime_from_row(r: &PgRow) -> Result<LifetimeRecord> {
    Ok(LifetimeRecord {
        entity: r.try_get(0)?,
        first_seen: r.try_get(1)?,
        last_seen: r.try_get(2)?,
        peak_date: r.try_get(3)?,
        peak_mentions: r.try_get(4)?,
        total_mentions: r.try_get(5)?,
        sources_covered: json(r, 6)?,
    })
}
