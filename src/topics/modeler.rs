// Topic Modeler: K topics per partition by NMF over TF-IDF.
//
// Documents are L2-normalized TF-IDF rows over the filtered lemmas (no
// document-frequency ceiling here, unlike keywords). Every document with a
// valid lemma counts toward its highest-weight topic. Partitions with fewer
// documents than K get one degenerate topic covering all of them, lemma-less
// documents included.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use super::nmf::{factorize, NmfConfig};
use crate::corpus::{partition_documents, CleanedDocument, CorpusReader, LemmaFilter, Partition};
use crate::db::models::DailyTopic;
use crate::db::Database;
use crate::error::{StageError, StageReport};
use crate::text::TermDocumentMatrix;

#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// NMF rank.
    pub k: usize,
    /// Keywords stored per topic.
    pub top_terms: usize,
    /// Leading keywords joined into the label.
    pub label_terms: usize,
    pub max_iter: usize,
    pub seed: u64,
    /// Vocabulary cap, most frequent terms first.
    pub max_vocabulary: usize,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            k: 5,
            top_terms: 8,
            label_terms: 3,
            max_iter: 300,
            seed: 42,
            max_vocabulary: 5000,
        }
    }
}

impl TopicConfig {
    fn label(&self, keywords: &[String], topic_id: usize) -> String {
        if keywords.is_empty() {
            return format!("topic {topic_id}");
        }
        keywords
            .iter()
            .take(self.label_terms)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn topic_row(partition: &Partition, topic_id: usize, label: String, keywords: Vec<String>, count: usize) -> DailyTopic {
    DailyTopic {
        date: partition.date,
        source: partition.source.clone(),
        media_type: partition.media_type,
        topic_id: topic_id as i64,
        topic_label: label,
        keywords,
        articles_count: count as i64,
    }
}

/// Fit the topics of one partition.
pub fn model_topics(
    partition: &Partition,
    docs: &[&CleanedDocument],
    filter: &LemmaFilter,
    config: &TopicConfig,
) -> Result<Vec<DailyTopic>, StageError> {
    if docs.is_empty() {
        return Err(StageError::insufficient(partition, "no documents"));
    }

    let matrix = TermDocumentMatrix::from_documents(docs, filter).with_max_terms(config.max_vocabulary);
    if matrix.is_empty() {
        return Err(StageError::insufficient(
            partition,
            format!("{} documents but no valid lemmas", docs.len()),
        ));
    }

    if docs.len() < config.k {
        debug!(partition = %partition, documents = docs.len(), k = config.k, "Degenerate topic");
        let weights = matrix.term_weights();
        let mut order: Vec<usize> = (0..matrix.n_terms()).collect();
        order.sort_by(|&a, &b| {
            weights[b]
                .partial_cmp(&weights[a])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
        let keywords: Vec<String> = order
            .into_iter()
            .take(config.top_terms)
            .map(|j| matrix.term(j).to_string())
            .collect();
        let label = config.label(&keywords, 0);
        return Ok(vec![topic_row(partition, 0, label, keywords, docs.len())]);
    }

    let lemmaless = docs.len() - matrix.n_docs();
    if lemmaless > 0 {
        debug!(partition = %partition, lemmaless, "Documents without lemmas left out of topic counts");
    }

    let nmf = NmfConfig {
        rank: config.k,
        max_iter: config.max_iter,
        seed: config.seed,
        ..Default::default()
    };
    let fit = factorize(&matrix.tfidf_rows(true), matrix.n_terms(), &nmf)
        .map_err(|e| StageError::computation(partition, e.to_string()))?;

    let mut counts = vec![0usize; config.k];
    for t in fit.assignments() {
        counts[t] += 1;
    }

    Ok((0..config.k)
        .map(|t| {
            let keywords: Vec<String> = fit
                .top_terms(t, config.top_terms)
                .into_iter()
                .map(|j| matrix.term(j).to_string())
                .collect();
            let label = config.label(&keywords, t);
            topic_row(partition, t, label, keywords, counts[t])
        })
        .collect())
}

/// Fit every partition of `date` (up to `concurrency` at a time on the
/// blocking pool) and persist the topics partition by partition.
pub async fn run(
    db: &Arc<dyn Database>,
    corpus: &dyn CorpusReader,
    filter: &Arc<LemmaFilter>,
    config: &TopicConfig,
    date: NaiveDate,
    concurrency: usize,
) -> Result<StageReport> {
    let mut report = StageReport::new("topics");
    let docs = corpus.read_window(date, date).await?;
    if docs.is_empty() {
        db.prune_topics(date, &[]).await?;
        report.skipped(date, "no documents for date");
        return Ok(report);
    }

    let partitions: Vec<(Partition, Vec<CleanedDocument>)> = partition_documents(&docs)
        .into_iter()
        .map(|(p, members)| (p, members.into_iter().cloned().collect()))
        .collect();
    info!(%date, documents = docs.len(), partitions = partitions.len(), k = config.k, "Fitting topics");

    let mut results: Vec<(Partition, Result<Vec<DailyTopic>, StageError>)> =
        stream::iter(partitions.into_iter().map(|(partition, members)| {
            let filter = Arc::clone(filter);
            let config = config.clone();
            async move {
                let p = partition.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    let refs: Vec<&CleanedDocument> = members.iter().collect();
                    model_topics(&p, &refs, &filter, &config)
                })
                .await;
                let outcome = joined
                    .unwrap_or_else(|join| Err(StageError::computation(&partition, join.to_string())));
                (partition, outcome)
            }
        }))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    // Writes happen in partition order regardless of completion order.
    results.sort_by(|a, b| a.0.cmp(&b.0));

    // Partitions that no longer exist for this date lose their rows.
    let keep: Vec<Partition> = results.iter().map(|(p, _)| p.clone()).collect();
    let pruned = db.prune_topics(date, &keep).await?;
    if pruned > 0 {
        info!(%date, pruned, "Removed topics of vanished partitions");
    }

    for (partition, outcome) in results {
        match outcome {
            Ok(rows) => {
                db.replace_topics(&partition, &rows).await?;
                report.written(&partition, rows.len());
            }
            Err(e) => {
                // A skipped partition has no topics; a failed one keeps its last good rows.
                if e.is_skip() {
                    db.replace_topics(&partition, &[]).await?;
                }
                report.record_error(&partition, &e);
            }
        }
    }

    Ok(report)
}
