// Spike detection over stored topic history.

use chrono::{Duration, NaiveDate};

use agenda::corpus::MediaType;
use agenda::db::memory_sqlite;
use agenda::db::models::DailyTopic;
use agenda::spikes::{self, SpikeConfig};

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn strike_topic(date: NaiveDate, topic_id: i64, count: i64) -> DailyTopic {
    DailyTopic {
        date,
        source: "lemonde".into(),
        media_type: MediaType::Press,
        topic_id,
        topic_label: "grève, sncf, trafic".into(),
        keywords: vec!["grève".into(), "sncf".into(), "trafic".into(), "usager".into()],
        articles_count: count,
    }
}

async fn seed(counts: &[i64]) -> std::sync::Arc<dyn agenda::db::Database> {
    let db = memory_sqlite().unwrap();
    for (i, &count) in counts.iter().enumerate() {
        let topic = strike_topic(start() + Duration::days(i as i64), (i % 2) as i64, count);
        db.replace_topics(&topic.partition(), &[topic.clone()]).await.unwrap();
    }
    db
}

#[tokio::test]
async fn thirty_articles_after_a_quiet_week_is_a_spike() {
    let db = seed(&[5, 6, 4, 5, 7, 6, 30]).await;
    let config = SpikeConfig {
        baseline_window: 6,
        ..Default::default()
    };
    let target = start() + Duration::days(6);

    let report = spikes::run(&db, &config, target).await.unwrap();
    assert_eq!(report.rows_written(), 1);

    let rows = db.get_spikes(target).await.unwrap();
    assert_eq!(rows.len(), 1);
    let spike = &rows[0];
    assert_eq!(spike.source, "lemonde");
    assert_eq!(spike.media_type, MediaType::Press);
    assert_eq!(spike.baseline_window, 6);
    // mean 5.5, sample stddev ≈ 1.049
    assert!((spike.spike_score - 23.36).abs() < 0.01, "score {}", spike.spike_score);
    assert!((spike.details["baseline_mean"].as_f64().unwrap() - 5.5).abs() < 1e-9);
}

#[tokio::test]
async fn short_history_writes_nothing() {
    let db = seed(&[5, 6, 4, 5, 7, 6, 30]).await;
    // Seven prior days needed, only six exist.
    let report = spikes::run(&db, &SpikeConfig::default(), start() + Duration::days(6))
        .await
        .unwrap();
    assert_eq!(report.rows_written(), 0);
    assert_eq!(report.skipped_count(), 1);
    assert!(db.get_spikes(start() + Duration::days(6)).await.unwrap().is_empty());
}

#[tokio::test]
async fn a_quiet_day_is_not_a_spike() {
    let db = seed(&[5, 6, 4, 5, 7, 6, 2]).await;
    let config = SpikeConfig {
        baseline_window: 6,
        ..Default::default()
    };
    let target = start() + Duration::days(6);
    spikes::run(&db, &config, target).await.unwrap();
    assert!(db.get_spikes(target).await.unwrap().is_empty());
    assert!(spikes::spike_score(2.0, &[5.0, 6.0, 4.0, 5.0, 7.0, 6.0], 1.0) < 0.0);
}

#[tokio::test]
async fn two_extra_articles_over_a_steady_week_is_a_spike() {
    let db = seed(&[10, 10, 11, 10, 10, 10, 12]).await;
    let config = SpikeConfig {
        baseline_window: 6,
        ..Default::default()
    };
    let target = start() + Duration::days(6);
    spikes::run(&db, &config, target).await.unwrap();

    let rows = db.get_spikes(target).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!((rows[0].spike_score - 4.49).abs() < 0.01, "score {}", rows[0].spike_score);
}

#[tokio::test]
async fn day_without_topics_clears_its_old_spikes() {
    let db = seed(&[5, 6, 4, 5, 7, 6, 30]).await;
    let config = SpikeConfig {
        baseline_window: 6,
        ..Default::default()
    };
    let target = start() + Duration::days(6);
    spikes::run(&db, &config, target).await.unwrap();
    assert_eq!(db.get_spikes(target).await.unwrap().len(), 1);

    // Topics for the target date are withdrawn upstream.
    let partition = strike_topic(target, 0, 30).partition();
    db.replace_topics(&partition, &[]).await.unwrap();
    let report = spikes::run(&db, &config, target).await.unwrap();
    assert_eq!(report.skipped_count(), 1);
    assert!(db.get_spikes(target).await.unwrap().is_empty());
}
