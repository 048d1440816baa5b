// Narrative Clusterer: groups the documents of a rolling window into
// persistent story clusters.
//
// Each run embeds every document of [target − window + 1, target]. Existing
// clusters are represented by a proxy centroid: the mean direction of their
// members inside the window, or failing that the embedding of their top
// keywords. A document within `max_distance` (cosine) of its nearest proxy
// joins that cluster. The rest form a pool; if the pool is large enough it
// is split by mini-batch k-means and every group of at least
// `min_cluster_size` documents becomes a new cluster. Documents in smaller
// groups stay unassigned. Every founding member must itself sit within
// `max_distance` of its cluster's mean direction. The update is applied in one
// store transaction.
//
// A fingerprint of the window's inputs and of the cluster state the run left
// behind is kept in run_state; a run that finds both unchanged is a no-op.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::embedder::{cosine_distance, mean_direction, DocumentEmbedder};
use super::kmeans::{elbow_k, fit, KMeansConfig};
use super::summary::summarize;
use crate::corpus::{CleanedDocument, CorpusReader, LemmaFilter};
use crate::db::models::{NarrativeAssignment, NarrativeCluster, NarrativeUpdate, NewNarrativeCluster};
use crate::db::Database;
use crate::error::{StageError, StageReport};

/// run_state key holding `{window}|{fingerprint}` of the last applied run.
pub const LAST_RUN_KEY: &str = "narratives_last_run";

/// How many clusters k-means looks for in the unassigned pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClusterCount {
    Fixed(usize),
    /// Knee of the inertia curve over `1..=max_k`.
    Elbow { max_k: usize },
}

#[derive(Debug, Clone)]
pub struct NarrativeConfig {
    pub cluster_count: ClusterCount,
    pub window_days: u32,
    /// Cosine distance under which a document joins an existing cluster.
    pub max_distance: f64,
    pub min_cluster_size: usize,
    pub seed: u64,
    pub batch_size: usize,
    pub max_iter: usize,
    pub top_keywords: usize,
    pub label_terms: usize,
    pub dominant_ratio: f64,
    /// Texts per embedder call.
    pub embed_batch: usize,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            cluster_count: ClusterCount::Fixed(12),
            window_days: 7,
            max_distance: 0.35,
            min_cluster_size: 5,
            seed: 42,
            batch_size: 256,
            max_iter: 200,
            top_keywords: 12,
            label_terms: 4,
            dominant_ratio: 0.40,
            embed_batch: 32,
        }
    }
}

impl NarrativeConfig {
    pub fn window_start(&self, target: NaiveDate) -> NaiveDate {
        target - Duration::days(i64::from(self.window_days.max(1)) - 1)
    }
}

/// Cleaned text, or the joined lemmas when the text is empty.
pub fn embedding_text(doc: &CleanedDocument) -> String {
    let text = doc.cleaned_text.trim();
    if text.is_empty() {
        doc.lemmas.join(" ")
    } else {
        text.to_string()
    }
}

fn is_zero(v: &[f64]) -> bool {
    v.iter().all(|&x| x == 0.0)
}

/// Proxy centroid per existing cluster. `prior` maps article_id to its current
/// cluster; `keyword_vectors` holds the embedded top keywords of clusters
/// with no member in the window.
pub fn build_proxies(
    clusters: &[NarrativeCluster],
    docs: &[CleanedDocument],
    embeddings: &[Vec<f64>],
    prior: &HashMap<i64, i64>,
    keyword_vectors: &HashMap<i64, Vec<f64>>,
    dim: usize,
) -> Vec<(i64, Vec<f64>)> {
    let mut members: HashMap<i64, Vec<&[f64]>> = HashMap::new();
    for (doc, emb) in docs.iter().zip(embeddings) {
        if let Some(&cluster_id) = prior.get(&doc.article_id) {
            if !is_zero(emb) {
                members.entry(cluster_id).or_default().push(emb.as_slice());
            }
        }
    }

    clusters
        .iter()
        .filter_map(|c| match members.get(&c.cluster_id) {
            Some(vectors) => Some((c.cluster_id, mean_direction(vectors, dim))),
            None => keyword_vectors
                .get(&c.cluster_id)
                .filter(|v| !is_zero(v))
                .map(|v| (c.cluster_id, v.clone())),
        })
        .collect()
}

/// Shrink a k-means group to the members within `max_distance` of its mean
/// direction, recomputing the centroid until the membership is stable. A
/// founding member therefore clears the same bar as a later joiner. `None`
/// when fewer than `min_size` members survive.
fn admit(
    mut members: Vec<usize>,
    embeddings: &[Vec<f64>],
    max_distance: f64,
    min_size: usize,
    dim: usize,
) -> Option<(Vec<usize>, Vec<f64>)> {
    loop {
        let vectors: Vec<&[f64]> = members.iter().map(|&i| embeddings[i].as_slice()).collect();
        let centroid = mean_direction(&vectors, dim);
        let before = members.len();
        members.retain(|&i| cosine_distance(&embeddings[i], &centroid) <= max_distance);
        if members.len() < min_size {
            return None;
        }
        if members.len() == before {
            return Some((members, centroid));
        }
    }
}

/// Assign the window to existing clusters and found new ones from the pool.
pub fn cluster_window(
    docs: &[CleanedDocument],
    embeddings: &[Vec<f64>],
    proxies: &[(i64, Vec<f64>)],
    filter: &LemmaFilter,
    config: &NarrativeConfig,
    dim: usize,
    window: &str,
) -> Result<NarrativeUpdate, StageError> {
    let mut update = NarrativeUpdate {
        window_article_ids: docs.iter().map(|d| d.article_id).collect(),
        ..Default::default()
    };
    let mut pool: Vec<usize> = Vec::new();

    for (i, emb) in embeddings.iter().enumerate() {
        if is_zero(emb) {
            continue;
        }
        let nearest = proxies
            .iter()
            .map(|(id, centroid)| (*id, cosine_distance(emb, centroid)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        match nearest {
            Some((cluster_id, distance)) if distance <= config.max_distance => {
                update.assignments.push(NarrativeAssignment {
                    cluster_id,
                    article_id: docs[i].article_id,
                    distance,
                });
            }
            _ => pool.push(i),
        }
    }

    let min_size = config.min_cluster_size.max(1);
    if pool.len() < min_size {
        debug!(window, pool = pool.len(), min_size, "Pool too small for new clusters");
        return Ok(update);
    }

    let points: Vec<Vec<f64>> = pool.iter().map(|&i| embeddings[i].clone()).collect();
    let cap = (pool.len() / min_size).max(1);
    let kconfig = KMeansConfig {
        k: 1,
        batch_size: config.batch_size,
        max_iter: config.max_iter,
        seed: config.seed,
    };
    let k = match config.cluster_count {
        ClusterCount::Fixed(k) => k.min(cap).max(1),
        ClusterCount::Elbow { max_k } => elbow_k(&points, max_k.min(cap), &kconfig)
            .map_err(|e| StageError::computation(window, e.to_string()))?,
    };
    let fitted = fit(&points, &KMeansConfig { k, ..kconfig })
        .map_err(|e| StageError::computation(window, e.to_string()))?;
    debug!(window, pool = pool.len(), k, inertia = fitted.inertia, "Clustered pool");

    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); fitted.k()];
    for (p, &label) in fitted.labels.iter().enumerate() {
        groups[label].push(pool[p]);
    }

    for group in groups.into_iter().filter(|g| g.len() >= min_size) {
        let Some((members, centroid)) = admit(group, embeddings, config.max_distance, min_size, dim) else {
            continue;
        };
        let member_docs: Vec<&CleanedDocument> = members.iter().map(|&i| &docs[i]).collect();
        let summary = summarize(
            &member_docs,
            filter,
            config.top_keywords,
            config.label_terms,
            config.dominant_ratio,
        );
        update.new_clusters.push(NewNarrativeCluster {
            label: summary.label,
            top_keywords: summary.top_keywords,
            members: members
                .iter()
                .map(|&i| (docs[i].article_id, cosine_distance(&embeddings[i], &centroid)))
                .collect(),
        });
    }

    Ok(update)
}

/// Embed texts in batches of `config.embed_batch`, checking dimensions.
async fn embed_all(embedder: &dyn DocumentEmbedder, texts: &[String], batch: usize) -> Result<Vec<Vec<f64>>> {
    let pb = ProgressBar::new(texts.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  Embedding [{bar:30.cyan/blue}] {pos}/{len} documents")?
            .progress_chars("=> "),
    );

    let mut out = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(batch.max(1)) {
        let vectors = embedder.embed_batch(chunk).await?;
        if vectors.len() != chunk.len() {
            anyhow::bail!(
                "{} embedder returned {} vectors for {} texts",
                embedder.name(),
                vectors.len(),
                chunk.len()
            );
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != embedder.dimension()) {
            anyhow::bail!(
                "{} embedder returned a {}-dimensional vector, expected {}",
                embedder.name(),
                bad.len(),
                embedder.dimension()
            );
        }
        out.extend(vectors);
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();
    Ok(out)
}

/// Cluster the window ending at `target` and persist the result.
pub async fn run(
    db: &Arc<dyn Database>,
    corpus: &dyn CorpusReader,
    embedder: &dyn DocumentEmbedder,
    filter: &LemmaFilter,
    config: &NarrativeConfig,
    target: NaiveDate,
) -> Result<StageReport> {
    let mut report = StageReport::new("narratives");
    let from = config.window_start(target);
    let window = format!("{from}..{target}");

    let docs = corpus.read_window(from, target).await?;
    if docs.is_empty() {
        report.skipped(&window, "no documents in window");
        return Ok(report);
    }

    info!(%window, documents = docs.len(), embedder = embedder.name(), "Clustering narratives");
    let texts: Vec<String> = docs.iter().map(embedding_text).collect();
    let embeddings = match embed_all(embedder, &texts, config.embed_batch).await {
        Ok(e) => e,
        Err(e) => {
            report.record_error(&window, &StageError::computation(&window, format!("{e:#}")));
            return Ok(report);
        }
    };

    let ids: Vec<i64> = docs.iter().map(|d| d.article_id).collect();
    let clusters = db.get_narrative_clusters().await?;
    let prior: HashMap<i64, i64> = db
        .get_assignments(&ids)
        .await?
        .into_iter()
        .map(|a| (a.article_id, a.cluster_id))
        .collect();

    let inputs = input_digest(config, &ids, &embeddings);
    let marker = format!("{window}|{}", fingerprint(&inputs, &clusters, &prior));
    if db.get_run_state(LAST_RUN_KEY).await?.as_deref() == Some(marker.as_str()) {
        report.skipped(&window, "window unchanged since the last run");
        return Ok(report);
    }

    let assigned_clusters: HashSet<i64> = prior.values().copied().collect();
    let orphans: Vec<&NarrativeCluster> = clusters
        .iter()
        .filter(|c| !assigned_clusters.contains(&c.cluster_id) && !c.top_keywords.is_empty())
        .collect();
    let mut keyword_vectors = HashMap::new();
    if !orphans.is_empty() {
        let keyword_texts: Vec<String> = orphans.iter().map(|c| c.top_keywords.join(" ")).collect();
        match embed_all(embedder, &keyword_texts, config.embed_batch).await {
            Ok(vectors) => {
                keyword_vectors.extend(orphans.iter().map(|c| c.cluster_id).zip(vectors));
            }
            Err(e) => {
                report.record_error(&window, &StageError::computation(&window, format!("{e:#}")));
                return Ok(report);
            }
        }
    }

    let dim = embedder.dimension();
    let proxies = build_proxies(&clusters, &docs, &embeddings, &prior, &keyword_vectors, dim);
    let update = match cluster_window(&docs, &embeddings, &proxies, filter, config, dim, &window) {
        Ok(u) => u,
        Err(e) => {
            report.record_error(&window, &e);
            return Ok(report);
        }
    };

    let joined = update.assignments.len();
    let founded: usize = update.new_clusters.iter().map(|c| c.members.len()).sum();
    let new_ids = db.apply_narrative_update(&update).await?;

    let after: HashMap<i64, i64> = db
        .get_assignments(&ids)
        .await?
        .into_iter()
        .map(|a| (a.article_id, a.cluster_id))
        .collect();
    let clusters = db.get_narrative_clusters().await?;
    let marker = format!("{window}|{}", fingerprint(&inputs, &clusters, &after));
    db.set_run_state(LAST_RUN_KEY, &marker).await?;

    info!(
        %window,
        joined,
        new_clusters = new_ids.len(),
        founded,
        unassigned = docs.len() - joined - founded,
        "Narratives updated"
    );
    report.written(&window, joined + founded);
    Ok(report)
}

/// Hash of what the run reads from outside the store: settings and every
/// document's id and embedding.
fn input_digest(config: &NarrativeConfig, ids: &[i64], embeddings: &[Vec<f64>]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{config:?}\n"));
    let mut rows: Vec<(i64, &Vec<f64>)> = ids.iter().copied().zip(embeddings).collect();
    rows.sort_unstable_by_key(|(id, _)| *id);
    for (id, embedding) in rows {
        hasher.update(id.to_le_bytes());
        for x in embedding {
            hasher.update(x.to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Hash of the inputs together with the cluster table and the window's
/// assignments.
fn fingerprint(inputs: &str, clusters: &[NarrativeCluster], assignments: &HashMap<i64, i64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(inputs);
    for c in clusters {
        hasher.update(format!("c{}:{}:{}\n", c.cluster_id, c.size, c.top_keywords.join(",")));
    }
    let mut pairs: Vec<(&i64, &i64)> = assignments.iter().collect();
    pairs.sort_unstable();
    for (article_id, cluster_id) in pairs {
        hasher.update(format!("a{article_id}:{cluster_id}\n"));
    }
    hex::encode(hasher.finalize())
}
