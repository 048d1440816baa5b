use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::corpus::LemmaFilter;
use crate::keywords::KeywordConfig;
use crate::narratives::{ClusterCount, NarrativeConfig};
use crate::pipeline::StageKind;
use crate::spikes::SpikeConfig;
use crate::topics::{ThemeTaxonomy, TopicConfig};

/// Longest look-back, in days, accepted for the spike baseline and the
/// narrative window.
pub const MAX_WINDOW_DAYS: u32 = 366;

/// Which document embedder feeds the narrative clusterer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EmbedderBackend {
    /// Local multilingual MiniLM via ONNX (default)
    Onnx,
    /// Deterministic feature hashing, no model files
    Hashed,
}

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded at startup via dotenvy. Every variable has a
/// default; malformed values are errors naming the variable.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    /// PostgreSQL connection URL (when set and starts with postgres://, uses Postgres backend)
    pub database_url: Option<String>,
    pub embedder: EmbedderBackend,
    /// Base directory holding downloaded models
    pub model_dir: PathBuf,
    pub themes_path: Option<PathBuf>,
    /// Stopwords added to the built-in lists (AGENDA_STOPWORDS, AGENDA_STOPWORDS_PATH)
    pub extra_stopwords: Vec<String>,
    /// Enabled stages; `None` means all of them.
    pub stages: Option<Vec<StageKind>>,
    /// Partitions fitted in parallel
    pub concurrency: usize,
    pub keywords: KeywordConfig,
    pub topics: TopicConfig,
    pub narratives: NarrativeConfig,
    pub spikes: SpikeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "./agenda.db".to_string(),
            database_url: None,
            embedder: EmbedderBackend::Onnx,
            model_dir: crate::narratives::download::default_model_dir(),
            themes_path: None,
            extra_stopwords: Vec::new(),
            stages: None,
            concurrency: 4,
            keywords: KeywordConfig::default(),
            topics: TopicConfig::default(),
            narratives: NarrativeConfig::default(),
            spikes: SpikeConfig::default(),
        }
    }
}

/// Parse an env var when set; unset keeps the default.
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{name}={raw} is invalid: {e}")),
        _ => Ok(None),
    }
}

fn parse_cluster_count(raw: &str) -> Result<ClusterCount> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("elbow") {
        let max_k = match rest.strip_prefix(':') {
            Some(n) => n.parse().with_context(|| format!("bad elbow bound '{n}'"))?,
            None => 12,
        };
        return Ok(ClusterCount::Elbow { max_k });
    }
    let k: usize = raw
        .parse()
        .with_context(|| format!("expected a number, 'elbow' or 'elbow:<max>', got '{raw}'"))?;
    if k == 0 {
        anyhow::bail!("cluster count must be positive");
    }
    Ok(ClusterCount::Fixed(k))
}

/// A look-back in days: at least one, at most [`MAX_WINDOW_DAYS`].
fn window_days(name: &str, days: u32) -> Result<u32> {
    if days > MAX_WINDOW_DAYS {
        anyhow::bail!("{name}={days} is invalid: at most {MAX_WINDOW_DAYS} days");
    }
    Ok(days.max(1))
}

/// Split a stopword list on commas and newlines. Blank entries and `#`
/// comment lines are dropped.
pub fn parse_stopwords(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .flat_map(|line| line.split(','))
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Parse a comma list of stage names.
pub fn parse_stages(raw: &str) -> Result<Vec<StageKind>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(StageKind::from_str)
        .collect()
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(path) = env::var("AGENDA_DB_PATH") {
            config.db_path = path;
        }
        config.database_url = env::var("DATABASE_URL").ok().filter(|u| !u.is_empty());
        config.embedder = match env::var("AGENDA_EMBEDDER").as_deref() {
            Ok("hashed") => EmbedderBackend::Hashed,
            Ok("onnx") | Ok("") | Err(_) => EmbedderBackend::Onnx,
            Ok(other) => anyhow::bail!("AGENDA_EMBEDDER={other} is invalid: expected onnx or hashed"),
        };
        if let Ok(dir) = env::var("AGENDA_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        config.themes_path = env::var("AGENDA_THEMES_PATH").ok().filter(|p| !p.is_empty()).map(PathBuf::from);
        if let Ok(raw) = env::var("AGENDA_STAGES") {
            if !raw.trim().is_empty() && raw.trim() != "all" {
                config.stages = Some(parse_stages(&raw).context("AGENDA_STAGES is invalid")?);
            }
        }
        if let Some(n) = env_parse::<usize>("AGENDA_CONCURRENCY")? {
            config.concurrency = n.max(1);
        }

        if let Some(n) = env_parse("AGENDA_KEYWORDS_TOP_N")? {
            config.keywords.top_n = n;
        }
        if let Some(r) = env_parse::<f64>("AGENDA_KEYWORDS_MAX_DF")? {
            if r.is_nan() || r <= 0.0 || r > 1.0 {
                anyhow::bail!("AGENDA_KEYWORDS_MAX_DF={r} is invalid: expected a ratio in (0, 1]");
            }
            config.keywords.max_df_ratio = r;
        }

        if let Some(k) = env_parse::<usize>("AGENDA_TOPICS_K")? {
            if k == 0 {
                anyhow::bail!("AGENDA_TOPICS_K must be positive");
            }
            config.topics.k = k;
        }
        if let Some(n) = env_parse("AGENDA_TOPICS_TOP_TERMS")? {
            config.topics.top_terms = n;
        }
        if let Some(n) = env_parse("AGENDA_TOPICS_LABEL_TERMS")? {
            config.topics.label_terms = n;
        }

        if let Ok(raw) = env::var("AGENDA_NARRATIVES_K") {
            if !raw.trim().is_empty() {
                config.narratives.cluster_count = parse_cluster_count(&raw)
                    .with_context(|| format!("AGENDA_NARRATIVES_K={raw} is invalid"))?;
            }
        }
        if let Some(n) = env_parse::<u32>("AGENDA_NARRATIVES_WINDOW_DAYS")? {
            config.narratives.window_days = window_days("AGENDA_NARRATIVES_WINDOW_DAYS", n)?;
        }
        if let Some(d) = env_parse("AGENDA_NARRATIVES_MAX_DISTANCE")? {
            config.narratives.max_distance = d;
        }
        if let Some(n) = env_parse::<usize>("AGENDA_NARRATIVES_MIN_CLUSTER_SIZE")? {
            config.narratives.min_cluster_size = n.max(1);
        }

        if let Some(n) = env_parse::<u32>("AGENDA_SPIKES_WINDOW")? {
            config.spikes.baseline_window = window_days("AGENDA_SPIKES_WINDOW", n)? as usize;
        }
        if let Some(t) = env_parse("AGENDA_SPIKES_THRESHOLD")? {
            config.spikes.threshold = t;
        }
        if let Some(s) = env_parse::<f64>("AGENDA_SPIKES_MIN_STDDEV")? {
            if s.is_nan() || s <= 0.0 {
                anyhow::bail!("AGENDA_SPIKES_MIN_STDDEV={s} is invalid: expected a positive number");
            }
            config.spikes.min_stddev = s;
        }

        if let Ok(raw) = env::var("AGENDA_STOPWORDS") {
            config.extra_stopwords.extend(parse_stopwords(&raw));
        }
        if let Some(path) = env::var("AGENDA_STOPWORDS_PATH").ok().filter(|p| !p.is_empty()) {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("AGENDA_STOPWORDS_PATH={path} could not be read"))?;
            config.extra_stopwords.extend(parse_stopwords(&raw));
        }

        Ok(config)
    }

    /// The lemma filter shared by every lexical stage: built-in stopwords
    /// plus the configured extras.
    pub fn lemma_filter(&self) -> LemmaFilter {
        LemmaFilter::default().with_extra(&self.extra_stopwords)
    }

    /// The theme taxonomy, or an empty one (topics become their own theme).
    pub fn load_taxonomy(&self) -> Result<ThemeTaxonomy> {
        match &self.themes_path {
            Some(path) => ThemeTaxonomy::load(path),
            None => Ok(ThemeTaxonomy::default()),
        }
    }

    /// Check that the chosen embedder has what it needs.
    pub fn require_embedder(&self) -> Result<()> {
        if self.embedder == EmbedderBackend::Onnx
            && !crate::narratives::download::embedding_files_present(&self.model_dir)
        {
            anyhow::bail!(
                "Embedding model files not found in {}\n\
                 Run `agenda download-model` to download them.\n\
                 Or set AGENDA_EMBEDDER=hashed to use the model-free embedder.",
                self.model_dir.display()
            );
        }
        Ok(())
    }
}
