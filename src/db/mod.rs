// Database layer: storage for the corpus, daily analytics, narratives and
// lifetimes.
//
// SQLite (rusqlite, "bundled") is the default backend; the database file
// lives wherever AGENDA_DB_PATH points (defaults to ./agenda.db). With the
// `postgres` feature a DATABASE_URL starting with postgres:// selects PgDatabase.
// Callers only ever see `Arc<dyn Database>`.

pub mod models;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod queries;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use traits::Database;

#[cfg(feature = "sqlite")]
use anyhow::Context;
use anyhow::Result;
use std::sync::Arc;

/// Tables reported by `agenda status`, in pipeline order.
pub const ANALYTICS_TABLES: &[&str] = &[
    "documents_clean",
    "keywords_daily",
    "topics_daily",
    "narratives_clusters",
    "narratives_assignments",
    "media_bias_scores",
    "spikes",
    "keyword_lifetime",
    "topic_lifetime",
    "theme_lifetime",
];

/// Open (or create) the SQLite database and run migrations.
#[cfg(feature = "sqlite")]
pub fn initialize_sqlite(db_path: &str) -> Result<Arc<dyn Database>> {
    use std::path::Path;

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {db_path}"))?;
        }
    }

    let conn = rusqlite::Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {db_path}"))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    schema::create_tables(&conn)?;

    Ok(Arc::new(sqlite::SqliteDatabase::new(conn)))
}

/// Open an existing SQLite database (fails if it doesn't exist yet).
///
/// Migrations still run so a database created by an older build picks up
/// new tables.
#[cfg(feature = "sqlite")]
pub fn open_sqlite(db_path: &str) -> Result<Arc<dyn Database>> {
    if !std::path::Path::new(db_path).exists() {
        anyhow::bail!("Database not found at {db_path}. Run `agenda init` first.");
    }

    let conn = rusqlite::Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {db_path}"))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    schema::create_tables(&conn)?;

    Ok(Arc::new(sqlite::SqliteDatabase::new(conn)))
}

/// In-memory SQLite database with the full schema. Used by tests and dry runs.
#[cfg(feature = "sqlite")]
pub fn memory_sqlite() -> Result<Arc<dyn Database>> {
    let conn = rusqlite::Connection::open_in_memory()?;
    schema::create_tables(&conn)?;
    Ok(Arc::new(sqlite::SqliteDatabase::new(conn)))
}

/// Connect to PostgreSQL and run migrations.
#[cfg(feature = "postgres")]
pub async fn connect_postgres(database_url: &str) -> Result<Arc<dyn Database>> {
    let db = postgres::PgDatabase::connect(database_url).await?;
    Ok(Arc::new(db))
}
