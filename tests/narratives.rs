// Narrative clustering across repeated and shifted runs on an in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};

use agenda::corpus::{CleanedDocument, LemmaFilter, MediaType, MemoryCorpus};
use agenda::db::models::NarrativeCluster;
use agenda::db::{memory_sqlite, Database};
use agenda::narratives::clusterer::run;
use agenda::narratives::hashed::DEFAULT_HASHED_DIM;
use agenda::narratives::{ClusterCount, DocumentEmbedder, HashedEmbedder, NarrativeConfig};

fn day(n: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 9).unwrap() + Duration::days(n)
}

fn doc(id: i64, lemmas: Vec<String>) -> CleanedDocument {
    CleanedDocument {
        article_id: id,
        date: day(0),
        source: "franceinfo".into(),
        media_type: MediaType::Tv,
        cleaned_text: lemmas.join(" "),
        lemmas,
        entities: Default::default(),
    }
}

const STORIES: [[&str; 6]; 3] = [
    ["grève", "cheminot", "sncf", "trafic", "syndicat", "perturbation"],
    ["agriculteur", "tracteur", "blocage", "autoroute", "récolte", "exploitation"],
    ["incendie", "pompier", "forêt", "hectare", "sécheresse", "évacuation"],
];

/// Ten documents per story, each five of the story's six lemmas.
fn three_stories() -> Vec<CleanedDocument> {
    let mut docs = Vec::new();
    let mut id = 1;
    for story in STORIES {
        for k in 0..10 {
            let lemmas = story.iter().cycle().skip(k % 6).take(5).map(|w| w.to_string()).collect();
            docs.push(doc(id, lemmas));
            id += 1;
        }
    }
    docs
}

fn config() -> NarrativeConfig {
    NarrativeConfig {
        cluster_count: ClusterCount::Fixed(3),
        min_cluster_size: 3,
        ..Default::default()
    }
}

async fn state(db: &Arc<dyn Database>, ids: &[i64]) -> (Vec<NarrativeCluster>, Vec<(i64, i64)>) {
    let clusters = db.get_narrative_clusters().await.unwrap();
    let mut assignments: Vec<(i64, i64)> = db
        .get_assignments(ids)
        .await
        .unwrap()
        .into_iter()
        .map(|a| (a.article_id, a.cluster_id))
        .collect();
    assignments.sort_unstable();
    (clusters, assignments)
}

#[tokio::test]
async fn rerun_of_the_same_window_is_a_no_op() {
    let db = memory_sqlite().unwrap();
    let docs = three_stories();
    let ids: Vec<i64> = docs.iter().map(|d| d.article_id).collect();
    let corpus = MemoryCorpus::new(docs);
    let filter = Arc::new(LemmaFilter::default());
    let embedder = HashedEmbedder::new(DEFAULT_HASHED_DIM, Arc::clone(&filter));

    let first = run(&db, &corpus, &embedder, &filter, &config(), day(0)).await.unwrap();
    assert_eq!(first.rows_written(), 30);
    let (clusters, assignments) = state(&db, &ids).await;
    assert_eq!(clusters.len(), 3);
    assert_eq!(assignments.len(), 30);

    let second = run(&db, &corpus, &embedder, &filter, &config(), day(0)).await.unwrap();
    assert_eq!(second.skipped_count(), 1);
    assert_eq!(state(&db, &ids).await, (clusters, assignments));
}

#[tokio::test]
async fn shifted_window_over_the_same_documents_founds_nothing() {
    let db = memory_sqlite().unwrap();
    let docs = three_stories();
    let ids: Vec<i64> = docs.iter().map(|d| d.article_id).collect();
    let corpus = MemoryCorpus::new(docs);
    let filter = Arc::new(LemmaFilter::default());
    let embedder = HashedEmbedder::new(DEFAULT_HASHED_DIM, Arc::clone(&filter));

    run(&db, &corpus, &embedder, &filter, &config(), day(0)).await.unwrap();
    let (clusters, assignments) = state(&db, &ids).await;

    for d in 1..4 {
        let report = run(&db, &corpus, &embedder, &filter, &config(), day(d)).await.unwrap();
        assert_eq!(report.failed_count(), 0);
    }
    let (after, reassigned) = state(&db, &ids).await;
    let before_ids: Vec<i64> = clusters.iter().map(|c| c.cluster_id).collect();
    let after_ids: Vec<i64> = after.iter().map(|c| c.cluster_id).collect();
    assert_eq!(after_ids, before_ids);
    assert_eq!(reassigned, assignments);
}

/// Looks each text up in a fixed table.
struct TableEmbedder(HashMap<String, Vec<f64>>);

#[async_trait]
impl DocumentEmbedder for TableEmbedder {
    fn name(&self) -> &'static str {
        "table"
    }

    fn dimension(&self) -> usize {
        2
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        texts
            .iter()
            .map(|t| {
                self.0
                    .get(t)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no vector for {t:?}"))
            })
            .collect()
    }
}

fn unit(angle: f64) -> Vec<f64> {
    vec![angle.cos(), angle.sin()]
}

fn two_groups() -> Vec<CleanedDocument> {
    (1..=10)
        .map(|id| {
            let lemmas = if id <= 5 { ["budget", "déficit"] } else { ["tempête", "vent"] };
            let mut d = doc(id, lemmas.iter().map(|w| w.to_string()).collect());
            d.cleaned_text = format!("{} {id}", d.cleaned_text);
            d
        })
        .collect()
}

/// Documents 1..=5 near angle 0, 6..=10 near a right angle, with `moved`
/// placed among the second group.
fn table(docs: &[CleanedDocument], moved: Option<i64>) -> TableEmbedder {
    TableEmbedder(
        docs.iter()
            .map(|d| {
                let id = d.article_id;
                let angle = if id <= 5 && Some(id) != moved {
                    id as f64 * 0.01
                } else {
                    1.5 + id as f64 * 0.01
                };
                (d.cleaned_text.clone(), unit(angle))
            })
            .collect(),
    )
}

#[tokio::test]
async fn reassignment_moves_size_between_clusters() {
    let db = memory_sqlite().unwrap();
    let docs = two_groups();
    let ids: Vec<i64> = docs.iter().map(|d| d.article_id).collect();
    let corpus = MemoryCorpus::new(docs.clone());
    let filter = Arc::new(LemmaFilter::default());
    let config = NarrativeConfig {
        cluster_count: ClusterCount::Fixed(2),
        min_cluster_size: 3,
        ..Default::default()
    };

    run(&db, &corpus, &table(&docs, None), &filter, &config, day(0)).await.unwrap();
    let (clusters, assignments) = state(&db, &ids).await;
    assert_eq!(clusters.len(), 2);
    assert!(clusters.iter().all(|c| c.size == 5));
    let cluster_of = |assignments: &[(i64, i64)], id: i64| {
        assignments.iter().find(|(a, _)| *a == id).map(|(_, c)| *c).unwrap()
    };
    let x = cluster_of(&assignments, 1);
    let y = cluster_of(&assignments, 6);
    assert_eq!(cluster_of(&assignments, 5), x);

    let report = run(&db, &corpus, &table(&docs, Some(5)), &filter, &config, day(0)).await.unwrap();
    assert_eq!(report.skipped_count(), 0);
    let (after, reassigned) = state(&db, &ids).await;
    assert_eq!(after.len(), 2);
    assert_eq!(cluster_of(&reassigned, 5), y);
    let size = |id: i64| after.iter().find(|c| c.cluster_id == id).unwrap().size;
    assert_eq!(size(x), 4);
    assert_eq!(size(y), 6);
}
