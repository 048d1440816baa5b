use anyhow::Result;
use chrono::{Duration, Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use agenda::config::{Config, EmbedderBackend};
use agenda::corpus::{LemmaFilter, MediaType, Partition, StoreCorpus, ALL_SOURCES};
use agenda::db::models::LifetimeKind;
use agenda::db::Database;
use agenda::error::StageReport;
use agenda::narratives::{download, DocumentEmbedder, HashedEmbedder, OnnxEmbedder};
use agenda::output::terminal;
use agenda::pipeline::{PipelineContext, StageKind, StageRegistry};

/// agenda: media agenda analytics.
///
/// Turns a cleaned, lemmatized news corpus into daily keywords, topics,
/// narrative clusters, bias scores, coverage spikes and lifetimes.
#[derive(Parser)]
#[command(name = "agenda", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct DateArgs {
    /// Target date, YYYY-MM-DD (default: yesterday)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Last date of a range starting at --date
    #[arg(long)]
    to: Option<NaiveDate>,
}

impl DateArgs {
    fn dates(&self) -> Result<Vec<NaiveDate>> {
        let from = self
            .date
            .unwrap_or_else(|| Local::now().date_naive() - Duration::days(1));
        let to = self.to.unwrap_or(from);
        if to < from {
            anyhow::bail!("--to {to} is before --date {from}");
        }
        Ok(from.iter_days().take_while(|d| *d <= to).collect())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Load cleaned documents from a JSON-lines file
    Import {
        /// One CleanedDocument JSON object per line
        path: PathBuf,
    },

    /// Extract daily keywords per partition
    Keywords(DateArgs),

    /// Fit daily topics per partition
    Topics(DateArgs),

    /// Cluster the rolling window into narratives
    Narratives(DateArgs),

    /// Score source coverage per theme against the pooled baseline
    Bias(DateArgs),

    /// Detect topic coverage spikes
    Spikes(DateArgs),

    /// Merge new rows into keyword, topic and theme lifetimes
    Lifetime {
        #[command(flatten)]
        dates: DateArgs,

        /// Only this kind (keyword, topic or theme)
        #[arg(long)]
        kind: Option<LifetimeKind>,

        /// Drop existing records and rebuild from all history
        #[arg(long)]
        rebuild: bool,
    },

    /// Run every enabled stage in dependency order
    Run(DateArgs),

    /// Show row counts, merged lifetime days and run state
    Status,

    /// Download the multilingual sentence embedding model (~470 MB)
    DownloadModel,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("agenda=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            info!("Initializing agenda database...");
            let config = Config::load()?;
            let db = init_database(&config).await?;
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", db_display(&config));
            println!("Tables created: {table_count}");
            println!("\nNext: load documents with `agenda import <file.jsonl>`");
        }

        Commands::Import { path } => {
            let config = Config::load()?;
            let db = open_database(&config).await?;
            let docs = agenda::corpus::reader::read_jsonl(&path)?;
            let written = db.upsert_documents(&docs).await?;
            println!("{} {written} documents imported from {}", "✓".green(), path.display());
        }

        Commands::Keywords(dates) => {
            let ctx = build_context(Config::load()?, false).await?;
            for date in dates.dates()? {
                run_and_print(&ctx, StageKind::Keywords, date).await?;
                println!("\n{}", format!("Top keywords, all sources ({date})").bold());
                let all = Partition::new(date, ALL_SOURCES, MediaType::All);
                terminal::display_keywords(&ctx.db.get_keywords(&all).await?);
            }
        }

        Commands::Topics(dates) => {
            let ctx = build_context(Config::load()?, false).await?;
            for date in dates.dates()? {
                run_and_print(&ctx, StageKind::Topics, date).await?;
            }
        }

        Commands::Narratives(dates) => {
            let config = Config::load()?;
            config.require_embedder()?;
            let ctx = build_context(config, true).await?;
            for date in dates.dates()? {
                run_and_print(&ctx, StageKind::Narratives, date).await?;
            }
            println!("\n{}", "Narrative clusters".bold());
            terminal::display_clusters(&ctx.db.get_narrative_clusters().await?);
        }

        Commands::Bias(dates) => {
            let ctx = build_context(Config::load()?, false).await?;
            for date in dates.dates()? {
                run_and_print(&ctx, StageKind::Bias, date).await?;
                terminal::display_bias(&ctx.db.get_bias_scores(date).await?);
            }
        }

        Commands::Spikes(dates) => {
            let ctx = build_context(Config::load()?, false).await?;
            for date in dates.dates()? {
                run_and_print(&ctx, StageKind::Spikes, date).await?;
                terminal::display_spikes(&ctx.db.get_spikes(date).await?);
            }
        }

        Commands::Lifetime { dates, kind, rebuild } => {
            let ctx = build_context(Config::load()?, false).await?;
            let kinds: Vec<LifetimeKind> = match kind {
                Some(k) => vec![k],
                None => LifetimeKind::ALL.to_vec(),
            };
            if rebuild {
                agenda::lifetime::reset(&ctx.db, &kinds).await?;
            }
            for date in dates.dates()? {
                let report = agenda::lifetime::run(&ctx.db, &kinds, &ctx.taxonomy, date).await?;
                terminal::display_report(&report);
            }
            for k in kinds {
                println!("\n{}", format!("Top {k} lifetimes").bold());
                terminal::display_lifetimes(&ctx.db.get_all_lifetimes(k).await?, 15);
            }
        }

        Commands::Run(dates) => {
            let config = Config::load()?;
            let registry = StageRegistry::new(config.stages.as_deref())?;
            let wants_embedder = registry.enabled().any(|k| k == StageKind::Narratives);
            let ctx = build_context(config, wants_embedder).await?;

            let mut reports: Vec<StageReport> = Vec::new();
            for date in dates.dates()? {
                println!("\n{}", format!("##### {date} #####").bold());
                let day = ctx.run_date(&registry, date).await?;
                for report in &day {
                    terminal::display_report(report);
                }
                reports.extend(day);
            }

            let failed: usize = reports.iter().map(|r| r.failed_count()).sum();
            let written: usize = reports.iter().map(|r| r.rows_written()).sum();
            println!("\n{} {written} rows written", "Done.".green().bold());
            if failed > 0 {
                println!("  {} {failed} partitions failed (see log)", "!".red().bold());
            }
        }

        Commands::Status => {
            let config = Config::load()?;
            let db = open_database(&config).await?;
            let file = if uses_postgres(&config) {
                None
            } else {
                Some(config.db_path.as_str())
            };
            agenda::status::show(&db, &db_display(&config), file).await?;
        }

        Commands::DownloadModel => {
            let config = Config::load()?;
            println!("Downloading embedding model to {}", config.model_dir.display());
            download::download_model(&config.model_dir).await?;
            println!("\n{}", "Model ready.".green().bold());
        }
    }

    Ok(())
}

async fn run_and_print(ctx: &PipelineContext, kind: StageKind, date: NaiveDate) -> Result<()> {
    let report = ctx.run_stage(kind, date).await?;
    terminal::display_report(&report);
    Ok(())
}

/// Open the database and assemble the stage context. The embedder is only
/// loaded when asked for; a missing ONNX model then downgrades to a warning
/// and the narrative stage reports a skip.
async fn build_context(config: Config, with_embedder: bool) -> Result<PipelineContext> {
    let db = open_database(&config).await?;
    let filter = Arc::new(config.lemma_filter());
    if !config.extra_stopwords.is_empty() {
        info!(extra = config.extra_stopwords.len(), "Loaded extra stopwords");
    }
    let taxonomy = config.load_taxonomy()?;
    if !taxonomy.is_empty() {
        info!(themes = taxonomy.len(), "Loaded theme taxonomy");
    }

    let embedder = if with_embedder {
        match create_embedder(&config, &filter) {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Embedder unavailable, narratives will be skipped: {e:#}");
                None
            }
        }
    } else {
        None
    };

    Ok(PipelineContext {
        corpus: Arc::new(StoreCorpus::new(Arc::clone(&db))),
        db,
        embedder,
        filter,
        taxonomy,
        config,
    })
}

/// Create the document embedder for the configured backend.
fn create_embedder(config: &Config, filter: &Arc<LemmaFilter>) -> Result<Arc<dyn DocumentEmbedder>> {
    match config.embedder {
        EmbedderBackend::Onnx => {
            config.require_embedder()?;
            info!("Using local ONNX sentence embedder");
            let dir = download::embedding_model_dir(&config.model_dir);
            Ok(Arc::new(OnnxEmbedder::load(&dir)?))
        }
        EmbedderBackend::Hashed => {
            info!("Using hashed feature embedder");
            Ok(Arc::new(HashedEmbedder::new(
                agenda::narratives::hashed::DEFAULT_HASHED_DIM,
                Arc::clone(filter),
            )))
        }
    }
}

fn uses_postgres(config: &Config) -> bool {
    config
        .database_url
        .as_deref()
        .is_some_and(|url| url.starts_with("postgres://") || url.starts_with("postgresql://"))
}

/// Display-friendly database identifier, with any password redacted.
fn db_display(config: &Config) -> String {
    match config.database_url.as_deref() {
        Some(url) if uses_postgres(config) => match url.find('@') {
            Some(at) => {
                let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
                format!("{}****@{}", &url[..scheme_end], &url[at + 1..])
            }
            None => url.to_string(),
        },
        _ => config.db_path.clone(),
    }
}

/// Select the database backend based on configuration.
///
/// When DATABASE_URL is set and points to PostgreSQL, uses the Postgres backend
/// (requires the `postgres` feature). Otherwise, falls back to SQLite.
async fn open_database(config: &Config) -> Result<Arc<dyn Database>> {
    if let Some(ref url) = config.database_url {
        if uses_postgres(config) {
            #[cfg(feature = "postgres")]
            {
                info!("Using PostgreSQL backend");
                return agenda::db::connect_postgres(url).await;
            }
            #[cfg(not(feature = "postgres"))]
            anyhow::bail!(
                "DATABASE_URL points to PostgreSQL ({}) but the 'postgres' feature is not compiled in.\n\
                 Rebuild with: cargo build --features postgres",
                url.split('@').next_back().unwrap_or_default()
            );
        }
    }
    agenda::db::open_sqlite(&config.db_path)
}

/// Initialize the database (create if needed).
async fn init_database(config: &Config) -> Result<Arc<dyn Database>> {
    if let Some(ref url) = config.database_url {
        if uses_postgres(config) {
            #[cfg(feature = "postgres")]
            {
                info!("Using PostgreSQL backend");
                return agenda::db::connect_postgres(url).await;
            }
            #[cfg(not(feature = "postgres"))]
            anyhow::bail!(
                "DATABASE_URL points to PostgreSQL ({}) but the 'postgres' feature is not compiled in.\n\
                 Rebuild with: cargo build --features postgres",
                url.split('@').next_back().unwrap_or_default()
            );
        }
    }
    agenda::db::initialize_sqlite(&config.db_path)
}
