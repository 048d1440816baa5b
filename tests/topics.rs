// Topic modeling against an in-memory store.

use chrono::NaiveDate;

use std::sync::Arc;

use agenda::corpus::{CleanedDocument, LemmaFilter, MediaType, StoreCorpus, ALL_SOURCES};
use agenda::db::memory_sqlite;
use agenda::topics::modeler::run;
use agenda::topics::TopicConfig;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

fn corpus_docs() -> Vec<CleanedDocument> {
    let themes: [(&str, MediaType, [&str; 5]); 2] = [
        ("lemonde", MediaType::Press, ["retraite", "grève", "syndicat", "manifestation", "cortège"]),
        ("bfmtv", MediaType::Tv, ["agriculteur", "tracteur", "blocage", "autoroute", "colère"]),
    ];
    let mut docs = Vec::new();
    let mut id = 1;
    for (source, media_type, vocab) in themes {
        for i in 0..8 {
            let lemmas: Vec<String> = vocab
                .iter()
                .cycle()
                .skip(i)
                .take(4)
                .map(|s| s.to_string())
                .collect();
            docs.push(CleanedDocument {
                article_id: id,
                date: date(),
                source: source.into(),
                media_type,
                cleaned_text: lemmas.join(" "),
                lemmas,
                entities: Default::default(),
            });
            id += 1;
        }
    }
    docs
}

#[tokio::test]
async fn topics_cover_every_partition_and_rerun_identically() {
    let db = memory_sqlite().unwrap();
    db.upsert_documents(&corpus_docs()).await.unwrap();
    let corpus = StoreCorpus::new(db.clone());
    let filter = Arc::new(LemmaFilter::default());
    let config = TopicConfig {
        k: 2,
        ..Default::default()
    };

    let report = run(&db, &corpus, &filter, &config, date(), 4).await.unwrap();
    // lemonde/press, bfmtv/tv, ALL/press, ALL/tv, ALL/ALL
    assert_eq!(report.entries.len(), 5);
    assert_eq!(report.failed_count(), 0);
    let first = db.get_topics_between(date(), date()).await.unwrap();

    run(&db, &corpus, &filter, &config, date(), 1).await.unwrap();
    let second = db.get_topics_between(date(), date()).await.unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );

    // Each partition's topic counts add up to its documents.
    let global: i64 = first
        .iter()
        .filter(|t| t.source == ALL_SOURCES && t.media_type == MediaType::All)
        .map(|t| t.articles_count)
        .sum();
    assert_eq!(global, 16);
    let lemonde: i64 = first
        .iter()
        .filter(|t| t.source == "lemonde")
        .map(|t| t.articles_count)
        .sum();
    assert_eq!(lemonde, 8);
    for t in &first {
        assert!(t.keywords.len() <= 8);
        assert!(!t.topic_label.is_empty());
    }
}

#[tokio::test]
async fn global_partition_separates_the_two_stories() {
    let db = memory_sqlite().unwrap();
    db.upsert_documents(&corpus_docs()).await.unwrap();
    let corpus = StoreCorpus::new(db.clone());
    let config = TopicConfig {
        k: 2,
        ..Default::default()
    };
    run(&db, &corpus, &Arc::new(LemmaFilter::default()), &config, date(), 2)
        .await
        .unwrap();

    let global: Vec<_> = db
        .get_topics_between(date(), date())
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.source == ALL_SOURCES && t.media_type == MediaType::All)
        .collect();
    assert_eq!(global.len(), 2);
    assert!(global.iter().all(|t| t.articles_count == 8));
    let strike_vocab = ["retraite", "grève", "syndicat", "manifestation", "cortège"];
    let strike = global
        .iter()
        .find(|t| strike_vocab.contains(&t.keywords[0].as_str()))
        .unwrap();
    // The story's own five terms outrank anything from the other block.
    assert!(strike.keywords[..5].iter().all(|k| strike_vocab.contains(&k.as_str())));
}

#[tokio::test]
async fn reimport_drops_topics_of_a_vanished_source() {
    let db = memory_sqlite().unwrap();
    let docs = corpus_docs();
    db.upsert_documents(&docs).await.unwrap();
    let corpus = StoreCorpus::new(db.clone());
    let filter = Arc::new(LemmaFilter::default());
    let config = TopicConfig {
        k: 2,
        ..Default::default()
    };
    run(&db, &corpus, &filter, &config, date(), 2).await.unwrap();

    let moved: Vec<CleanedDocument> = docs
        .into_iter()
        .filter(|d| d.source == "lemonde")
        .map(|d| CleanedDocument {
            source: "liberation".into(),
            ..d
        })
        .collect();
    db.upsert_documents(&moved).await.unwrap();
    run(&db, &corpus, &filter, &config, date(), 2).await.unwrap();

    let topics = db.get_topics_between(date(), date()).await.unwrap();
    assert!(topics.iter().all(|t| t.source != "lemonde"));
    let liberation: i64 = topics
        .iter()
        .filter(|t| t.source == "liberation")
        .map(|t| t.articles_count)
        .sum();
    assert_eq!(liberation, 8);
}
