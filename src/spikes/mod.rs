// Spike Detector: topics whose coverage jumps above their recent baseline.
//
// A series is one topic within one (source, media_type) partition; the global
// (ALL, ALL) partition is tracked too. topic_id is only meaningful within a
// day, so the same story on earlier days is found by label/keyword overlap
// (`topics::matching::best_match`). A prior day with topics but no match
// counts as zero; a prior day with no topics at all means the history is
// incomplete and the partition is skipped.
//
//   spike_score = (count − mean) / max(stddev, min_stddev)
//
// with the sample standard deviation (n − 1) of the baseline window.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde_json::json;
use tracing::{debug, info};

use crate::corpus::{MediaType, Partition, ALL_SOURCES};
use crate::db::models::{DailyTopic, Spike};
use crate::db::Database;
use crate::error::{StageError, StageReport};
use crate::topics::matching::{best_match, DEFAULT_MATCH_THRESHOLD};

pub const DEFAULT_MIN_STDDEV: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct SpikeConfig {
    /// Prior days forming the baseline.
    pub baseline_window: usize,
    pub threshold: f64,
    /// Floor for the standard deviation, only there to avoid dividing by
    /// zero on a flat baseline.
    pub min_stddev: f64,
    /// Similarity needed to call two days' topics the same story.
    pub match_threshold: f64,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            baseline_window: 7,
            threshold: 2.5,
            min_stddev: DEFAULT_MIN_STDDEV,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

/// Mean and sample standard deviation. A single value has zero spread.
pub fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Standardized distance of `count` from its history.
pub fn spike_score(count: f64, history: &[f64], min_stddev: f64) -> f64 {
    let (mean, stddev) = mean_stddev(history);
    (count - mean) / stddev.max(min_stddev).max(f64::EPSILON)
}

/// Spikes of one partition. `by_day` holds the partition's topics keyed by
/// date and must cover the whole baseline window.
pub fn detect_partition(
    partition: &Partition,
    by_day: &BTreeMap<NaiveDate, Vec<DailyTopic>>,
    config: &SpikeConfig,
) -> Result<Vec<Spike>, StageError> {
    let target = partition.date;
    let today = match by_day.get(&target) {
        Some(t) if !t.is_empty() => t,
        _ => return Err(StageError::missing(partition, "no topics on target date")),
    };

    let window = config.baseline_window.max(1);
    let mut days = Vec::with_capacity(window);
    for back in (1..=window).rev() {
        let day = target - Duration::days(back as i64);
        match by_day.get(&day) {
            Some(topics) if !topics.is_empty() => days.push(topics),
            _ => {
                return Err(StageError::insufficient(
                    partition,
                    format!("no topics on {day}, need {window} prior days"),
                ))
            }
        }
    }

    let mut spikes = Vec::new();
    for topic in today {
        let history: Vec<f64> = days
            .iter()
            .map(|day| {
                best_match(topic, day.iter(), config.match_threshold)
                    .map_or(0.0, |(m, _)| m.articles_count as f64)
            })
            .collect();
        let count = topic.articles_count as f64;
        let score = spike_score(count, &history, config.min_stddev);
        debug!(partition = %partition, topic = %topic.topic_label, count, score, "Scored topic");
        if score < config.threshold {
            continue;
        }
        let (mean, stddev) = mean_stddev(&history);
        spikes.push(Spike {
            date: target,
            source: partition.source.clone(),
            media_type: partition.media_type,
            topic_id: topic.topic_id,
            spike_score: score,
            baseline_window: window as i64,
            details: json!({
                "topic_label": topic.topic_label,
                "keywords": topic.keywords,
                "count": topic.articles_count,
                "baseline_mean": mean,
                "baseline_stddev": stddev,
                "history": history,
            }),
        });
    }
    Ok(spikes)
}

/// Series are tracked per source and for the global partition; the
/// per-media-type ALL partitions are left out.
fn is_tracked(source: &str, media_type: MediaType) -> bool {
    source != ALL_SOURCES || media_type == MediaType::All
}

/// Detect spikes on `target` from stored topics and replace its spike rows.
pub async fn run(db: &Arc<dyn Database>, config: &SpikeConfig, target: NaiveDate) -> Result<StageReport> {
    let mut report = StageReport::new("spikes");
    let from = target - Duration::days(config.baseline_window.max(1) as i64);
    let topics = db.get_topics_between(from, target).await?;

    let mut series: BTreeMap<(String, MediaType), BTreeMap<NaiveDate, Vec<DailyTopic>>> = BTreeMap::new();
    for topic in topics {
        if !is_tracked(&topic.source, topic.media_type) {
            continue;
        }
        series
            .entry((topic.source.clone(), topic.media_type))
            .or_default()
            .entry(topic.date)
            .or_default()
            .push(topic);
    }
    series.retain(|_, by_day| by_day.contains_key(&target));

    if series.is_empty() {
        db.replace_spikes(target, &[]).await?;
        report.record_error(target, &StageError::missing(target, "no topics on target date"));
        return Ok(report);
    }

    let mut rows = Vec::new();
    for ((source, media_type), by_day) in &series {
        let partition = Partition::new(target, source.clone(), *media_type);
        match detect_partition(&partition, by_day, config) {
            Ok(spikes) => {
                report.written(&partition, spikes.len());
                rows.extend(spikes);
            }
            Err(e) => report.record_error(&partition, &e),
        }
    }

    db.replace_spikes(target, &rows).await?;
    info!(%target, spikes = rows.len(), "Spikes written");
    Ok(report)
}
