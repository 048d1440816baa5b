// Database schema: table creation and migrations.
//
// A `schema_version` table tracks which migrations have run, and each
// migration is a function that executes SQL statements. Dates are stored as
// ISO-8601 text, so lexical and chronological order agree.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// Idempotent, safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )
    .context("Failed to create schema_version table")?;

    run_migration(conn, 1, |c| c.execute_batch(V1_CORE_TABLES))?;

    // Migration v2: keyword and theme lifetimes, same shape as topic_lifetime.
    run_migration(conn, 2, |c| c.execute_batch(V2_LIFETIME_TABLES))?;

    // Migration v3: per-day merge ledger replacing the lifetime watermarks.
    run_migration(conn, 3, |c| c.execute_batch(V3_LIFETIME_MERGED_DAYS))?;

    Ok(())
}

const V1_CORE_TABLES: &str = "
    -- Watermarks and other key/value run state
    CREATE TABLE IF NOT EXISTS run_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    -- Cleaned, lemmatized documents from the NLP stage
    CREATE TABLE IF NOT EXISTS documents_clean (
        article_id INTEGER PRIMARY KEY,
        date TEXT NOT NULL,
        source TEXT NOT NULL,
        media_type TEXT NOT NULL,
        cleaned_text TEXT NOT NULL,
        lemmas TEXT NOT NULL,              -- JSON array
        entities TEXT NOT NULL             -- JSON object: type -> [surface forms]
    );

    CREATE TABLE IF NOT EXISTS keywords_daily (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL,
        source TEXT NOT NULL,
        media_type TEXT NOT NULL,
        word TEXT NOT NULL,
        count INTEGER NOT NULL CHECK (count > 0),
        weight REAL NOT NULL,
        rank INTEGER NOT NULL CHECK (rank >= 1),
        UNIQUE (date, source, media_type, word),
        UNIQUE (date, source, media_type, rank)
    );

    CREATE TABLE IF NOT EXISTS topics_daily (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL,
        source TEXT NOT NULL,
        media_type TEXT NOT NULL,
        topic_id INTEGER NOT NULL,
        topic_label TEXT NOT NULL,
        keywords TEXT NOT NULL,            -- JSON array, ordered by weight
        articles_count INTEGER NOT NULL,
        UNIQUE (date, source, media_type, topic_id)
    );

    -- AUTOINCREMENT keeps cluster ids monotonic even after deletes
    CREATE TABLE IF NOT EXISTS narratives_clusters (
        cluster_id INTEGER PRIMARY KEY AUTOINCREMENT,
        label TEXT NOT NULL,
        top_keywords TEXT NOT NULL,        -- JSON array
        size INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    -- An article belongs to at most one cluster at a time
    CREATE TABLE IF NOT EXISTS narratives_assignments (
        article_id INTEGER PRIMARY KEY,
        cluster_id INTEGER NOT NULL REFERENCES narratives_clusters(cluster_id),
        distance REAL NOT NULL,
        assigned_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS media_bias_scores (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL,
        source TEXT NOT NULL,
        theme TEXT NOT NULL,
        bias_score REAL NOT NULL,
        methodology TEXT NOT NULL,
        details TEXT NOT NULL,             -- JSON object
        UNIQUE (date, source, theme, methodology)
    );

    CREATE TABLE IF NOT EXISTS spikes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL,
        source TEXT NOT NULL,
        media_type TEXT NOT NULL,
        topic_id INTEGER NOT NULL,
        spike_score REAL NOT NULL,
        baseline_window INTEGER NOT NULL,
        details TEXT NOT NULL,             -- JSON object
        UNIQUE (date, source, media_type, topic_id)
    );

    CREATE TABLE IF NOT EXISTS topic_lifetime (
        topic_label TEXT PRIMARY KEY,
        first_seen_date TEXT NOT NULL,
        last_seen_date TEXT NOT NULL,
        peak_date TEXT NOT NULL,
        peak_mentions INTEGER NOT NULL,
        total_mentions INTEGER NOT NULL,
        sources_covered TEXT NOT NULL,     -- JSON array, sorted
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE INDEX IF NOT EXISTS idx_documents_date ON documents_clean(date);
    CREATE INDEX IF NOT EXISTS idx_topics_date ON topics_daily(date);
    CREATE INDEX IF NOT EXISTS idx_assignments_cluster ON narratives_assignments(cluster_id);
";

const V2_LIFETIME_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS keyword_lifetime (
        word TEXT PRIMARY KEY,
        first_seen_date TEXT NOT NULL,
        last_seen_date TEXT NOT NULL,
        peak_date TEXT NOT NULL,
        peak_mentions INTEGER NOT NULL,
        total_mentions INTEGER NOT NULL,
        sources_covered TEXT NOT NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS theme_lifetime (
        theme TEXT PRIMARY KEY,
        first_seen_date TEXT NOT NULL,
        last_seen_date TEXT NOT NULL,
        peak_date TEXT NOT NULL,
        peak_mentions INTEGER NOT NULL,
        total_mentions INTEGER NOT NULL,
        sources_covered TEXT NOT NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
";

const V3_LIFETIME_MERGED_DAYS: &str = "
    CREATE TABLE IF NOT EXISTS lifetime_merged_days (
        kind TEXT NOT NULL,
        date TEXT NOT NULL,
        row_count INTEGER NOT NULL,
        mention_count INTEGER NOT NULL,
        merged_at TEXT NOT NULL DEFAULT (datetime('now')),
        PRIMARY KEY (kind, date)
    );

    DELETE FROM run_state WHERE key LIKE 'lifetime_%_through';
";

/// Run a migration if it hasn't been applied yet.
/// The migration function receives the connection and should execute its SQL.
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }

    #[test]
    fn test_table_count() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        // schema_version, run_state, documents_clean, keywords_daily,
        // topics_daily, narratives_clusters, narratives_assignments,
        // media_bias_scores, spikes, topic_lifetime, keyword_lifetime,
        // theme_lifetime, lifetime_merged_days
        assert_eq!(table_count(&conn).unwrap(), 13);
    }

    #[test]
    fn test_migrations_recorded_once() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let versions: Vec<i64> = conn
            .prepare("SELECT version FROM schema_version ORDER BY version")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn test_keyword_rank_is_unique_per_partition() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        let insert = "INSERT INTO keywords_daily (date, source, media_type, word, count, weight, rank)
                      VALUES ('2024-01-10', 'bfmtv', 'tv', ?1, 3, 1.0, 1)";
        conn.execute(insert, ["budget"]).unwrap();
        assert!(conn.execute(insert, ["réforme"]).is_err());
    }
}
