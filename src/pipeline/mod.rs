// Pipeline: runs the enabled stages for one date at a time.
//
// Stages are independent batch jobs; later ones read what earlier ones
// committed. Partition-level problems are recorded in each stage's report.
// Any error that escapes a stage (store unreachable, store conflict) aborts
// the run.

pub mod registry;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

use crate::config::Config;
use crate::corpus::{CorpusReader, LemmaFilter};
use crate::db::models::LifetimeKind;
use crate::db::Database;
use crate::error::{StageError, StageReport};
use crate::narratives::DocumentEmbedder;
use crate::topics::ThemeTaxonomy;

pub use registry::{StageDescriptor, StageKind, StageRegistry};

/// Everything a stage needs, built once per invocation.
pub struct PipelineContext {
    pub db: Arc<dyn Database>,
    pub corpus: Arc<dyn CorpusReader>,
    /// `None` when no embedder is available; narratives are then skipped.
    pub embedder: Option<Arc<dyn DocumentEmbedder>>,
    pub filter: Arc<LemmaFilter>,
    pub taxonomy: ThemeTaxonomy,
    pub config: Config,
}

impl PipelineContext {
    /// Run one stage for one date.
    pub async fn run_stage(&self, kind: StageKind, date: NaiveDate) -> Result<StageReport> {
        let config = &self.config;
        let report = match kind {
            StageKind::Keywords => {
                crate::keywords::run(&self.db, self.corpus.as_ref(), &self.filter, &config.keywords, date).await
            }
            StageKind::Topics => {
                crate::topics::modeler::run(
                    &self.db,
                    self.corpus.as_ref(),
                    &self.filter,
                    &config.topics,
                    date,
                    config.concurrency,
                )
                .await
            }
            StageKind::Narratives => match &self.embedder {
                Some(embedder) => {
                    crate::narratives::clusterer::run(
                        &self.db,
                        self.corpus.as_ref(),
                        embedder.as_ref(),
                        &self.filter,
                        &config.narratives,
                        date,
                    )
                    .await
                }
                None => {
                    let mut report = StageReport::new("narratives");
                    report.record_error(date, &StageError::missing(date, "no embedder configured"));
                    Ok(report)
                }
            },
            StageKind::Bias => crate::bias::run(&self.db, &self.taxonomy, date).await,
            StageKind::Spikes => crate::spikes::run(&self.db, &config.spikes, date).await,
            StageKind::Lifetime => crate::lifetime::run(&self.db, &LifetimeKind::ALL, &self.taxonomy, date).await,
        };
        report.with_context(|| format!("{kind} stage failed for {date}"))
    }

    /// Run every enabled stage for `date` in dependency order.
    pub async fn run_date(&self, registry: &StageRegistry, date: NaiveDate) -> Result<Vec<StageReport>> {
        let mut reports = Vec::new();
        for kind in registry.enabled() {
            info!(stage = %kind, %date, "Running stage");
            reports.push(self.run_stage(kind, date).await?);
        }
        Ok(reports)
    }
}
