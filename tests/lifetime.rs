// Lifetime merges are monotonic across daily runs and pick up late days.

use chrono::{Duration, NaiveDate};

use agenda::corpus::{MediaType, Partition};
use agenda::db::memory_sqlite;
use agenda::db::models::{DailyKeyword, DailyTopic, LifetimeKind, LifetimeRecord};
use agenda::lifetime;
use agenda::topics::ThemeTaxonomy;

fn day(n: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 1).unwrap() + Duration::days(n)
}

fn keyword(date: NaiveDate, source: &str, word: &str, count: i64, rank: i64) -> DailyKeyword {
    DailyKeyword {
        date,
        source: source.into(),
        media_type: MediaType::Press,
        word: word.into(),
        count,
        weight: count as f64,
        rank,
    }
}

fn topic(date: NaiveDate, source: &str, label: &str, count: i64) -> DailyTopic {
    DailyTopic {
        date,
        source: source.into(),
        media_type: MediaType::Press,
        topic_id: 0,
        topic_label: label.into(),
        keywords: label.split(", ").map(String::from).collect(),
        articles_count: count,
    }
}

fn assert_monotonic(before: &LifetimeRecord, after: &LifetimeRecord) {
    assert_eq!(before.entity, after.entity);
    assert!(after.first_seen <= before.first_seen);
    assert!(after.last_seen >= before.last_seen);
    assert!(after.total_mentions >= before.total_mentions);
    assert!(after.peak_mentions >= before.peak_mentions);
    assert!(after.sources_covered.is_superset(&before.sources_covered));
}

#[tokio::test]
async fn daily_merges_never_move_backwards() {
    let db = memory_sqlite().unwrap();
    let taxonomy = ThemeTaxonomy::default();
    let daily = [
        ("lemonde", 4),
        ("liberation", 9),
        ("lemonde", 2),
        ("lefigaro", 6),
    ];

    let mut previous: Option<LifetimeRecord> = None;
    for (i, (source, count)) in daily.iter().enumerate() {
        let date = day(i as i64);
        let partition = Partition::new(date, *source, MediaType::Press);
        db.replace_keywords(&partition, &[keyword(date, source, "inondation", *count, 1)])
            .await
            .unwrap();
        db.replace_topics(&partition, &[topic(date, source, "inondation, crue", *count)])
            .await
            .unwrap();

        let report = lifetime::run(&db, &LifetimeKind::ALL, &taxonomy, date).await.unwrap();
        assert_eq!(report.failed_count(), 0);

        let records = db.get_all_lifetimes(LifetimeKind::Keyword).await.unwrap();
        assert_eq!(records.len(), 1);
        let current = records[0].clone();
        if let Some(before) = &previous {
            assert_monotonic(before, &current);
        }
        previous = Some(current);
    }

    let r = previous.unwrap();
    assert_eq!(r.first_seen, day(0));
    assert_eq!(r.last_seen, day(3));
    assert_eq!(r.peak_date, day(1));
    assert_eq!(r.peak_mentions, 9);
    assert_eq!(r.total_mentions, 21);
    assert_eq!(r.sources_covered.len(), 3);

    // Without a taxonomy a topic's theme is its label.
    let themes = db.get_all_lifetimes(LifetimeKind::Theme).await.unwrap();
    assert_eq!(themes[0].entity, "inondation, crue");
    assert_eq!(themes[0].total_mentions, 21);

    // Re-running an already merged date changes nothing.
    let report = lifetime::run(&db, &LifetimeKind::ALL, &taxonomy, day(2)).await.unwrap();
    assert_eq!(report.skipped_count(), 3);
    let again = db.get_all_lifetimes(LifetimeKind::Keyword).await.unwrap();
    assert_eq!(again[0], r);
}

#[tokio::test]
async fn first_run_builds_from_history() {
    let db = memory_sqlite().unwrap();
    for i in 0..5 {
        let date = day(i);
        let partition = Partition::new(date, "lemonde", MediaType::Press);
        db.replace_topics(&partition, &[topic(date, "lemonde", "rentrée, école", i + 1)])
            .await
            .unwrap();
    }

    lifetime::run(&db, &[LifetimeKind::Topic], &ThemeTaxonomy::default(), day(4))
        .await
        .unwrap();
    let records = db.get_all_lifetimes(LifetimeKind::Topic).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].first_seen, day(0));
    assert_eq!(records[0].peak_date, day(4));
    assert_eq!(records[0].total_mentions, 15);
    let merged = db.get_merged_days(LifetimeKind::Topic).await.unwrap();
    assert_eq!(merged.len(), 5);
    assert_eq!(merged.last().map(|d| d.date), Some(day(4)));
}

#[tokio::test]
async fn backfilled_day_is_merged_after_later_days() {
    let db = memory_sqlite().unwrap();
    let taxonomy = ThemeTaxonomy::default();
    for (i, count) in [(3, 3), (4, 4)] {
        let date = day(i);
        let partition = Partition::new(date, "lemonde", MediaType::Press);
        db.replace_keywords(&partition, &[keyword(date, "lemonde", "canicule", count, 1)])
            .await
            .unwrap();
    }
    lifetime::run(&db, &[LifetimeKind::Keyword], &taxonomy, day(4)).await.unwrap();

    // A day older than everything merged so far arrives late.
    let late = day(1);
    let partition = Partition::new(late, "liberation", MediaType::Press);
    db.replace_keywords(&partition, &[keyword(late, "liberation", "canicule", 50, 1)])
        .await
        .unwrap();
    let report = lifetime::run(&db, &[LifetimeKind::Keyword], &taxonomy, day(4)).await.unwrap();
    assert_eq!(report.rows_written(), 1);

    let r = &db.get_all_lifetimes(LifetimeKind::Keyword).await.unwrap()[0];
    assert_eq!(r.first_seen, day(1));
    assert_eq!(r.last_seen, day(4));
    assert_eq!((r.peak_date, r.peak_mentions), (day(1), 50));
    assert_eq!(r.total_mentions, 57);
    assert!(r.sources_covered.contains("liberation"));

    let report = lifetime::run(&db, &[LifetimeKind::Keyword], &taxonomy, day(4)).await.unwrap();
    assert_eq!(report.skipped_count(), 1);
    let again = &db.get_all_lifetimes(LifetimeKind::Keyword).await.unwrap()[0];
    assert_eq!(again.total_mentions, 57);
}

#[tokio::test]
async fn rerun_of_an_old_date_after_recompute_rebuilds() {
    let db = memory_sqlite().unwrap();
    let taxonomy = ThemeTaxonomy::default();
    for i in 0..3 {
        let date = day(i);
        let partition = Partition::new(date, "lemonde", MediaType::Press);
        db.replace_keywords(&partition, &[keyword(date, "lemonde", "rentrée", 2, 1)])
            .await
            .unwrap();
        lifetime::run(&db, &[LifetimeKind::Keyword], &taxonomy, date).await.unwrap();
    }

    // Day 1 is recomputed upstream with a bigger count.
    let partition = Partition::new(day(1), "lemonde", MediaType::Press);
    db.replace_keywords(&partition, &[keyword(day(1), "lemonde", "rentrée", 9, 1)])
        .await
        .unwrap();
    lifetime::run(&db, &[LifetimeKind::Keyword], &taxonomy, day(1)).await.unwrap();

    let r = &db.get_all_lifetimes(LifetimeKind::Keyword).await.unwrap()[0];
    assert_eq!(r.total_mentions, 13);
    assert_eq!((r.peak_date, r.peak_mentions), (day(1), 9));
    // Days after the rerun target stay merged.
    assert_eq!(r.last_seen, day(2));
}
