// Database queries: CRUD operations for all tables.
//
// Every SQLite interaction goes through this module. This keeps SQL contained
// in one place and gives the rest of the app clean Rust interfaces.
//
// Replacement writes delete the partition's rows and insert the new batch in
// one transaction. Inserts never use OR REPLACE: a duplicate key inside a
// batch is a bug in the stage that produced it and surfaces as StoreConflict.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use super::models::{
    DailyKeyword, DailyTopic, DayDigest, LifetimeKind, LifetimeRecord, MediaBiasScore, NarrativeAssignment,
    NarrativeCluster, NarrativeUpdate, Spike,
};
use super::ANALYTICS_TABLES;
use crate::corpus::{CleanedDocument, Partition, ALL_SOURCES};
use crate::error::StageError;

/// Decode a JSON text column inside a row mapper.
fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Turn a constraint violation into a StageError::StoreConflict; pass
/// anything else through.
fn conflict_or(err: rusqlite::Error, scope: &str) -> anyhow::Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
            StageError::conflict(scope, msg.clone().unwrap_or_else(|| e.to_string())).into()
        }
        _ => err.into(),
    }
}

// --- Run state ---

pub fn get_run_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM run_state WHERE key = ?1")?;
    let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    Ok(result)
}

pub fn set_run_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO run_state (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

pub fn get_all_run_state(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT key, value FROM run_state ORDER BY key")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn row_counts(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut counts = Vec::with_capacity(ANALYTICS_TABLES.len());
    for table in ANALYTICS_TABLES {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        counts.push((table.to_string(), n));
    }
    Ok(counts)
}

// --- Corpus ---

pub fn upsert_documents(conn: &Connection, docs: &[CleanedDocument]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO documents_clean (article_id, date, source, media_type, cleaned_text, lemmas, entities)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(article_id) DO UPDATE SET
                date = ?2,
                source = ?3,
                media_type = ?4,
                cleaned_text = ?5,
                lemmas = ?6,
                entities = ?7",
        )?;
        for doc in docs {
            stmt.execute(params![
                doc.article_id,
                doc.date,
                doc.source,
                doc.media_type,
                doc.cleaned_text,
                serde_json::to_string(&doc.lemmas)?,
                serde_json::to_string(&doc.entities)?,
            ])?;
        }
    }
    tx.commit()?;
    Ok(docs.len())
}

pub fn get_documents(conn: &Connection, from: NaiveDate, to: NaiveDate) -> Result<Vec<CleanedDocument>> {
    let mut stmt = conn.prepare(
        "SELECT article_id, date, source, media_type, cleaned_text, lemmas, entities
         FROM documents_clean
         WHERE date >= ?1 AND date <= ?2
         ORDER BY date, article_id",
    )?;
    let rows = stmt
        .query_map(params![from, to], |row| {
            Ok(CleanedDocument {
                article_id: row.get(0)?,
                date: row.get(1)?,
                source: row.get(2)?,
                media_type: row.get(3)?,
                cleaned_text: row.get(4)?,
                lemmas: json_column(row, 5)?,
                entities: json_column(row, 6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Keywords ---

pub fn replace_keywords(conn: &Connection, partition: &Partition, rows: &[DailyKeyword]) -> Result<()> {
    let scope = format!("keywords {partition}");
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM keywords_daily WHERE date = ?1 AND source = ?2 AND media_type = ?3",
        params![partition.date, partition.source, partition.media_type],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO keywords_daily (date, source, media_type, word, count, weight, rank)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for kw in rows {
            stmt.execute(params![
                kw.date,
                kw.source,
                kw.media_type,
                kw.word,
                kw.count,
                kw.weight,
                kw.rank
            ])
            .map_err(|e| conflict_or(e, &scope))?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Delete the rows of `date` in `table` whose (source, media_type) is not
/// one of `keep`.
fn prune_partitions(conn: &Connection, table: &str, date: NaiveDate, keep: &[Partition]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let present: Vec<Partition> = {
        let mut stmt = tx.prepare(&format!(
            "SELECT DISTINCT date, source, media_type FROM {table} WHERE date = ?1"
        ))?;
        let rows = stmt
            .query_map(params![date], |row| {
                Ok(Partition {
                    date: row.get(0)?,
                    source: row.get(1)?,
                    media_type: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let mut removed = 0;
    for stale in present.iter().filter(|p| !keep.contains(p)) {
        tx.execute(
            &format!("DELETE FROM {table} WHERE date = ?1 AND source = ?2 AND media_type = ?3"),
            params![stale.date, stale.source, stale.media_type],
        )?;
        removed += 1;
    }
    tx.commit()?;
    Ok(removed)
}

pub fn prune_keywords(conn: &Connection, date: NaiveDate, keep: &[Partition]) -> Result<usize> {
    prune_partitions(conn, "keywords_daily", date, keep)
}

fn keyword_from_row(row: &Row<'_>) -> rusqlite::Result<DailyKeyword> {
    Ok(DailyKeyword {
        date: row.get(0)?,
        source: row.get(1)?,
        media_type: row.get(2)?,
        word: row.get(3)?,
        count: row.get(4)?,
        weight: row.get(5)?,
        rank: row.get(6)?,
    })
}

pub fn get_keywords(conn: &Connection, partition: &Partition) -> Result<Vec<DailyKeyword>> {
    let mut stmt = conn.prepare(
        "SELECT date, source, media_type, word, count, weight, rank
         FROM keywords_daily
         WHERE date = ?1 AND source = ?2 AND media_type = ?3
         ORDER BY rank",
    )?;
    let rows = stmt
        .query_map(
            params![partition.date, partition.source, partition.media_type],
            keyword_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_keywords_between(conn: &Connection, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyKeyword>> {
    let mut stmt = conn.prepare(
        "SELECT date, source, media_type, word, count, weight, rank
         FROM keywords_daily
         WHERE date >= ?1 AND date <= ?2
         ORDER BY date, source, media_type, rank",
    )?;
    let rows = stmt
        .query_map(params![from, to], keyword_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Topics ---

pub fn replace_topics(conn: &Connection, partition: &Partition, rows: &[DailyTopic]) -> Result<()> {
    let scope = format!("topics {partition}");
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM topics_daily WHERE date = ?1 AND source = ?2 AND media_type = ?3",
        params![partition.date, partition.source, partition.media_type],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO topics_daily (date, source, media_type, topic_id, topic_label, keywords, articles_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for topic in rows {
            stmt.execute(params![
                topic.date,
                topic.source,
                topic.media_type,
                topic.topic_id,
                topic.topic_label,
                serde_json::to_string(&topic.keywords)?,
                topic.articles_count,
            ])
            .map_err(|e| conflict_or(e, &scope))?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn prune_topics(conn: &Connection, date: NaiveDate, keep: &[Partition]) -> Result<usize> {
    prune_partitions(conn, "topics_daily", date, keep)
}

pub fn get_topics_between(conn: &Connection, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyTopic>> {
    let mut stmt = conn.prepare(
        "SELECT date, source, media_type, topic_id, topic_label, keywords, articles_count
         FROM topics_daily
         WHERE date >= ?1 AND date <= ?2
         ORDER BY date, source, media_type, topic_id",
    )?;
    let rows = stmt
        .query_map(params![from, to], |row| {
            Ok(DailyTopic {
                date: row.get(0)?,
                source: row.get(1)?,
                media_type: row.get(2)?,
                topic_id: row.get(3)?,
                topic_label: row.get(4)?,
                keywords: json_column(row, 5)?,
                articles_count: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Narratives ---

pub fn get_narrative_clusters(conn: &Connection) -> Result<Vec<NarrativeCluster>> {
    let mut stmt = conn.prepare(
        "SELECT cluster_id, label, top_keywords, size, created_at
         FROM narratives_clusters
         ORDER BY cluster_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(NarrativeCluster {
                cluster_id: row.get(0)?,
                label: row.get(1)?,
                top_keywords: json_column(row, 2)?,
                size: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_assignments(conn: &Connection, article_ids: &[i64]) -> Result<Vec<NarrativeAssignment>> {
    let mut stmt = conn.prepare(
        "SELECT cluster_id, article_id, distance FROM narratives_assignments WHERE article_id = ?1",
    )?;
    let mut out = Vec::new();
    for id in article_ids {
        let found = stmt
            .query_row(params![id], |row| {
                Ok(NarrativeAssignment {
                    cluster_id: row.get(0)?,
                    article_id: row.get(1)?,
                    distance: row.get(2)?,
                })
            })
            .optional()?;
        out.extend(found);
    }
    Ok(out)
}

pub fn apply_narrative_update(conn: &Connection, update: &NarrativeUpdate) -> Result<Vec<i64>> {
    let scope = "narratives";
    let tx = conn.unchecked_transaction()?;
    let mut created = Vec::with_capacity(update.new_clusters.len());
    {
        let mut delete = tx.prepare("DELETE FROM narratives_assignments WHERE article_id = ?1")?;
        for id in &update.window_article_ids {
            delete.execute(params![id])?;
        }

        let mut assign = tx.prepare(
            "INSERT INTO narratives_assignments (article_id, cluster_id, distance) VALUES (?1, ?2, ?3)",
        )?;

        for cluster in &update.new_clusters {
            tx.execute(
                "INSERT INTO narratives_clusters (label, top_keywords, size) VALUES (?1, ?2, 0)",
                params![cluster.label, serde_json::to_string(&cluster.top_keywords)?],
            )?;
            let id = tx.last_insert_rowid();
            if cluster.label.is_empty() {
                tx.execute(
                    "UPDATE narratives_clusters SET label = ?1 WHERE cluster_id = ?2",
                    params![format!("Cluster {id}"), id],
                )?;
            }
            for (article_id, distance) in &cluster.members {
                assign
                    .execute(params![article_id, id, distance])
                    .map_err(|e| conflict_or(e, scope))?;
            }
            created.push(id);
        }

        for a in &update.assignments {
            assign
                .execute(params![a.article_id, a.cluster_id, a.distance])
                .map_err(|e| conflict_or(e, scope))?;
        }
    }
    tx.execute(
        "UPDATE narratives_clusters SET size = (
            SELECT COUNT(*) FROM narratives_assignments a
            WHERE a.cluster_id = narratives_clusters.cluster_id
         )",
        [],
    )?;
    tx.commit()?;
    Ok(created)
}

// --- Bias ---

pub fn replace_bias_scores(conn: &Connection, date: NaiveDate, rows: &[MediaBiasScore]) -> Result<()> {
    let scope = format!("bias {date}");
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM media_bias_scores WHERE date = ?1", params![date])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO media_bias_scores (date, source, theme, bias_score, methodology, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for score in rows {
            stmt.execute(params![
                score.date,
                score.source,
                score.theme,
                score.bias_score,
                score.methodology,
                serde_json::to_string(&score.details)?,
            ])
            .map_err(|e| conflict_or(e, &scope))?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn get_bias_scores(conn: &Connection, date: NaiveDate) -> Result<Vec<MediaBiasScore>> {
    let mut stmt = conn.prepare(
        "SELECT date, source, theme, bias_score, methodology, details
         FROM media_bias_scores
         WHERE date = ?1
         ORDER BY theme, source",
    )?;
    let rows = stmt
        .query_map(params![date], |row| {
            Ok(MediaBiasScore {
                date: row.get(0)?,
                source: row.get(1)?,
                theme: row.get(2)?,
                bias_score: row.get(3)?,
                methodology: row.get(4)?,
                details: json_column(row, 5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Spikes ---

pub fn replace_spikes(conn: &Connection, date: NaiveDate, rows: &[Spike]) -> Result<()> {
    let scope = format!("spikes {date}");
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM spikes WHERE date = ?1", params![date])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO spikes (date, source, media_type, topic_id, spike_score, baseline_window, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for spike in rows {
            stmt.execute(params![
                spike.date,
                spike.source,
                spike.media_type,
                spike.topic_id,
                spike.spike_score,
                spike.baseline_window,
                serde_json::to_string(&spike.details)?,
            ])
            .map_err(|e| conflict_or(e, &scope))?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn get_spikes(conn: &Connection, date: NaiveDate) -> Result<Vec<Spike>> {
    let mut stmt = conn.prepare(
        "SELECT date, source, media_type, topic_id, spike_score, baseline_window, details
         FROM spikes
         WHERE date = ?1
         ORDER BY spike_score DESC, source, media_type, topic_id",
    )?;
    let rows = stmt
        .query_map(params![date], |row| {
            Ok(Spike {
                date: row.get(0)?,
                source: row.get(1)?,
                media_type: row.get(2)?,
                topic_id: row.get(3)?,
                spike_score: row.get(4)?,
                baseline_window: row.get(5)?,
                details: json_column(row, 6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Lifetimes ---

fn lifetime_from_row(row: &Row<'_>) -> rusqlite::Result<LifetimeRecord> {
    Ok(LifetimeRecord {
        entity: row.get(0)?,
        first_seen: row.get(1)?,
        last_seen: row.get(2)?,
        peak_date: row.get(3)?,
        peak_mentions: row.get(4)?,
        total_mentions: row.get(5)?,
        sources_covered: json_column(row, 6)?,
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

pub fn get_lifetimes(conn: &Connection, kind: LifetimeKind, entities: &[String]) -> Result<Vec<LifetimeRecord>> {
    let sql = format!("{} WHERE {} = ?1", lifetime_select(kind), kind.key_column());
    let mut stmt = conn.prepare(&sql)?;
    let mut out = Vec::new();
    for entity in entities {
        let found = stmt.query_row(params![entity], lifetime_from_row).optional()?;
        out.extend(found);
    }
    Ok(out)
}

pub fn get_all_lifetimes(conn: &Connection, kind: LifetimeKind) -> Result<Vec<LifetimeRecord>> {
    let sql = format!("{} ORDER BY {}", lifetime_select(kind), kind.key_column());
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], lifetime_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn lifetime_digests(conn: &Connection, kind: LifetimeKind, through: NaiveDate) -> Result<Vec<DayDigest>> {
    let (table, mentions) = kind.source_table();
    let mut stmt = conn.prepare(&format!(
        "SELECT date, COUNT(*), SUM({mentions})
         FROM {table}
         WHERE date <= ?1 AND source != ?2
         GROUP BY date
         ORDER BY date"
    ))?;
    let rows = stmt
        .query_map(params![through, ALL_SOURCES], digest_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn digest_from_row(row: &Row<'_>) -> rusqlite::Result<DayDigest> {
    Ok(DayDigest {
        date: row.get(0)?,
        rows: row.get(1)?,
        mentions: row.get(2)?,
    })
}

pub fn get_merged_days(conn: &Connection, kind: LifetimeKind) -> Result<Vec<DayDigest>> {
    let mut stmt = conn.prepare(
        "SELECT date, row_count, mention_count FROM lifetime_merged_days WHERE kind = ?1 ORDER BY date",
    )?;
    let rows = stmt
        .query_map(params![kind.as_str()], digest_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn write_lifetimes(
    tx: &Connection,
    kind: LifetimeKind,
    records: &[LifetimeRecord],
    days: &[DayDigest],
) -> Result<()> {
    // Conflicts only widen a record: earliest first_seen, latest last_seen,
    // largest peak (earliest date on a tie), largest total and source set.
    let sql = format!(
        "INSERT INTO {table} ({key}, first_seen_date, last_seen_date, peak_date, peak_mentions,
                              total_mentions, sources_covered, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
         ON CONFLICT({key}) DO UPDATE SET
            first_seen_date = MIN(first_seen_date, excluded.first_seen_date),
            last_seen_date = MAX(last_seen_date, excluded.last_seen_date),
            peak_date = CASE
                WHEN excluded.peak_mentions > peak_mentions THEN excluded.peak_date
                WHEN excluded.peak_mentions = peak_mentions THEN MIN(peak_date, excluded.peak_date)
                ELSE peak_date END,
            peak_mentions = MAX(peak_mentions, excluded.peak_mentions),
            total_mentions = MAX(total_mentions, excluded.total_mentions),
            sources_covered = CASE
                WHEN json_array_length(excluded.sources_covered) >= json_array_length(sources_covered)
                THEN excluded.sources_covered ELSE sources_covered END,
            updated_at = datetime('now')",
        table = kind.table(),
        key = kind.key_column(),
    );

    let mut stmt = tx.prepare(&sql)?;
    for r in records {
        stmt.execute(params![
            r.entity,
            r.first_seen,
            r.last_seen,
            r.peak_date,
            r.peak_mentions,
            r.total_mentions,
            serde_json::to_string(&r.sources_covered)?,
        ])?;
    }

    let mut stmt = tx.prepare(
        "INSERT INTO lifetime_merged_days (kind, date, row_count, mention_count, merged_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))
         ON CONFLICT(kind, date) DO UPDATE SET
            row_count = excluded.row_count, mention_count = excluded.mention_count, merged_at = datetime('now')",
    )?;
    for day in days {
        stmt.execute(params![kind.as_str(), day.date, day.rows, day.mentions])?;
    }
    Ok(())
}

pub fn merge_lifetimes(
    conn: &Connection,
    kind: LifetimeKind,
    records: &[LifetimeRecord],
    days: &[DayDigest],
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    write_lifetimes(&tx, kind, records, days)?;
    tx.commit()?;
    Ok(())
}

pub fn replace_lifetimes(
    conn: &Connection,
    kind: LifetimeKind,
    records: &[LifetimeRecord],
    days: &[DayDigest],
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(&format!("DELETE FROM {}", kind.table()), [])?;
    tx.execute(
        "DELETE FROM lifetime_merged_days WHERE kind = ?1",
        params![kind.as_str()],
    )?;
    write_lifetimes(&tx, kind, records, days)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::MediaType;
    use crate::db::models::NewNarrativeCluster;
    use crate::db::schema::create_tables;
    use std::collections::BTreeSet;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn kw(word: &str, rank: i64) -> DailyKeyword {
        DailyKeyword {
            date: date(10),
            source: "bfmtv".into(),
            media_type: MediaType::Tv,
            word: word.into(),
            count: 3,
            weight: 1.5,
            rank,
        }
    }

    #[test]
    fn test_run_state_roundtrip() {
        let conn = test_conn();
        assert_eq!(get_run_state(&conn, "k").unwrap(), None);
        set_run_state(&conn, "k", "v1").unwrap();
        set_run_state(&conn, "k", "v2").unwrap();
        assert_eq!(get_run_state(&conn, "k").unwrap(), Some("v2".into()));
    }

    #[test]
    fn test_replace_keywords_replaces_partition() {
        let conn = test_conn();
        let p = Partition::new(date(10), "bfmtv", MediaType::Tv);
        replace_keywords(&conn, &p, &[kw("budget", 1), kw("grève", 2)]).unwrap();
        replace_keywords(&conn, &p, &[kw("retraite", 1)]).unwrap();
        let rows = get_keywords(&conn, &p).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].word, "retraite");
    }

    #[test]
    fn test_duplicate_rank_is_store_conflict_and_rolls_back() {
        let conn = test_conn();
        let p = Partition::new(date(10), "bfmtv", MediaType::Tv);
        replace_keywords(&conn, &p, &[kw("budget", 1)]).unwrap();

        let err = replace_keywords(&conn, &p, &[kw("grève", 1), kw("retraite", 1)]).unwrap_err();
        let stage = err.downcast_ref::<StageError>().expect("StageError");
        assert!(stage.is_fatal());

        // Transaction rolled back: the previous rows survive.
        let rows = get_keywords(&conn, &p).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].word, "budget");
    }

    #[test]
    fn test_narrative_update_allocates_ids_and_sizes() {
        let conn = test_conn();
        let update = NarrativeUpdate {
            window_article_ids: vec![1, 2, 3],
            assignments: vec![],
            new_clusters: vec![
                NewNarrativeCluster {
                    label: "retraite, grève".into(),
                    top_keywords: vec!["retraite".into(), "grève".into()],
                    members: vec![(1, 0.1), (2, 0.2)],
                },
                NewNarrativeCluster {
                    label: String::new(),
                    top_keywords: vec![],
                    members: vec![(3, 0.3)],
                },
            ],
        };
        let ids = apply_narrative_update(&conn, &update).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[1] > ids[0]);

        let clusters = get_narrative_clusters(&conn).unwrap();
        assert_eq!(clusters[0].size, 2);
        assert_eq!(clusters[1].label, format!("Cluster {}", ids[1]));

        // Reassign article 2 to the second cluster.
        let update = NarrativeUpdate {
            window_article_ids: vec![2],
            assignments: vec![NarrativeAssignment {
                cluster_id: ids[1],
                article_id: 2,
                distance: 0.25,
            }],
            new_clusters: vec![],
        };
        apply_narrative_update(&conn, &update).unwrap();
        let clusters = get_narrative_clusters(&conn).unwrap();
        assert_eq!(clusters[0].size, 1);
        assert_eq!(clusters[1].size, 2);
        let a = get_assignments(&conn, &[2]).unwrap();
        assert_eq!(a[0].cluster_id, ids[1]);
    }

    #[test]
    fn test_merge_lifetimes_never_narrows_a_record() {
        let conn = test_conn();
        let fresh = LifetimeRecord {
            entity: "budget".into(),
            first_seen: date(2),
            last_seen: date(5),
            peak_date: date(3),
            peak_mentions: 10,
            total_mentions: 30,
            sources_covered: BTreeSet::from(["bfmtv".to_string(), "lemonde".to_string()]),
        };
        let day5 = DayDigest { date: date(5), rows: 2, mentions: 30 };
        merge_lifetimes(&conn, LifetimeKind::Keyword, &[fresh.clone()], &[day5]).unwrap();

        let stale = LifetimeRecord {
            entity: "budget".into(),
            first_seen: date(4),
            last_seen: date(4),
            peak_date: date(4),
            peak_mentions: 2,
            total_mentions: 2,
            sources_covered: BTreeSet::from(["cnews".to_string()]),
        };
        merge_lifetimes(&conn, LifetimeKind::Keyword, &[stale], &[]).unwrap();
        let stored = get_lifetimes(&conn, LifetimeKind::Keyword, &["budget".into()]).unwrap();
        assert_eq!(stored, vec![fresh.clone()]);

        // An earlier first sighting and a tied peak on an earlier day widen it.
        let backfilled = LifetimeRecord {
            first_seen: date(1),
            peak_date: date(1),
            total_mentions: 40,
            ..fresh.clone()
        };
        let day1 = DayDigest { date: date(1), rows: 1, mentions: 10 };
        merge_lifetimes(&conn, LifetimeKind::Keyword, &[backfilled.clone()], &[day1]).unwrap();
        let stored = get_lifetimes(&conn, LifetimeKind::Keyword, &["budget".into()]).unwrap();
        assert_eq!(stored, vec![backfilled]);
        assert_eq!(get_merged_days(&conn, LifetimeKind::Keyword).unwrap(), vec![day1, day5]);
        assert!(get_merged_days(&conn, LifetimeKind::Topic).unwrap().is_empty());
    }

    #[test]
    fn test_replace_lifetimes_clears_kind() {
        let conn = test_conn();
        let day = DayDigest { date: date(3), rows: 1, mentions: 4 };
        let record = LifetimeRecord {
            entity: "grève".into(),
            first_seen: date(3),
            last_seen: date(3),
            peak_date: date(3),
            peak_mentions: 4,
            total_mentions: 4,
            sources_covered: BTreeSet::from(["tf1".to_string()]),
        };
        merge_lifetimes(&conn, LifetimeKind::Keyword, &[record.clone()], &[day]).unwrap();
        merge_lifetimes(&conn, LifetimeKind::Theme, &[record], &[day]).unwrap();

        replace_lifetimes(&conn, LifetimeKind::Keyword, &[], &[]).unwrap();
        assert!(get_all_lifetimes(&conn, LifetimeKind::Keyword).unwrap().is_empty());
        assert!(get_merged_days(&conn, LifetimeKind::Keyword).unwrap().is_empty());
        assert_eq!(get_all_lifetimes(&conn, LifetimeKind::Theme).unwrap().len(), 1);
        assert_eq!(get_merged_days(&conn, LifetimeKind::Theme).unwrap(), vec![day]);
    }

    #[test]
    fn test_lifetime_digests_skip_all_rows() {
        let conn = test_conn();
        let p = Partition::new(date(10), "bfmtv", MediaType::Tv);
        replace_keywords(&conn, &p, &[kw("budget", 1), kw("grève", 2)]).unwrap();
        let all = Partition::new(date(10), ALL_SOURCES, MediaType::Tv);
        let all_rows: Vec<DailyKeyword> = [kw("budget", 1)]
            .into_iter()
            .map(|k| DailyKeyword { source: ALL_SOURCES.into(), ..k })
            .collect();
        replace_keywords(&conn, &all, &all_rows).unwrap();

        let digests = lifetime_digests(&conn, LifetimeKind::Keyword, date(10)).unwrap();
        assert_eq!(digests, vec![DayDigest { date: date(10), rows: 2, mentions: 6 }]);
        assert!(lifetime_digests(&conn, LifetimeKind::Keyword, date(9)).unwrap().is_empty());
    }

    #[test]
    fn test_prune_keywords_keeps_listed_partitions() {
        let conn = test_conn();
        let kept = Partition::new(date(10), "bfmtv", MediaType::Tv);
        let gone = Partition::new(date(10), "tf1", MediaType::Tv);
        replace_keywords(&conn, &kept, &[kw("budget", 1)]).unwrap();
        let tf1: Vec<DailyKeyword> = [kw("grève", 1)]
            .into_iter()
            .map(|k| DailyKeyword { source: "tf1".into(), ..k })
            .collect();
        replace_keywords(&conn, &gone, &tf1).unwrap();

        assert_eq!(prune_keywords(&conn, date(10), &[kept.clone()]).unwrap(), 1);
        assert_eq!(get_keywords(&conn, &kept).unwrap().len(), 1);
        assert!(get_keywords(&conn, &gone).unwrap().is_empty());
        assert_eq!(prune_keywords(&conn, date(10), &[]).unwrap(), 1);
    }
}
