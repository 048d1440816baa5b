// Bias Scorer: how far each source over- or under-covers each theme.
//
// For a date, every per-source topic row is mapped to a theme and its
// articles counted. A source's share of a theme is theme articles over the
// source's total articles that day (all media types). The baseline is the
// pooled share across sources, Σ theme articles / Σ articles, so the scores
// of a theme weighted by each source's article count sum to zero. Every
// source gets a row for every theme seen that day, zeros included.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use serde_json::json;
use tracing::info;

use crate::corpus::ALL_SOURCES;
use crate::db::models::{DailyTopic, MediaBiasScore};
use crate::db::Database;
use crate::error::{StageError, StageReport};
use crate::topics::ThemeTaxonomy;

pub const METHODOLOGY: &str = "share-vs-pooled-baseline/v1";

#[derive(Debug, Default)]
struct SourceTally<'a> {
    total: i64,
    themes: BTreeMap<String, (i64, Vec<&'a DailyTopic>)>,
}

/// Score every (source, theme) pair of `date` from its topic rows.
pub fn score_bias(
    date: NaiveDate,
    topics: &[DailyTopic],
    taxonomy: &ThemeTaxonomy,
) -> Result<Vec<MediaBiasScore>, StageError> {
    let mut tallies: BTreeMap<&str, SourceTally> = BTreeMap::new();
    for topic in topics
        .iter()
        .filter(|t| t.date == date && t.source != ALL_SOURCES)
    {
        let tally = tallies.entry(topic.source.as_str()).or_default();
        tally.total += topic.articles_count;
        let entry = tally
            .themes
            .entry(taxonomy.theme_for(topic))
            .or_insert_with(|| (0, Vec::new()));
        entry.0 += topic.articles_count;
        entry.1.push(topic);
    }

    if tallies.is_empty() {
        return Err(StageError::missing(date, "no per-source topics"));
    }
    tallies.retain(|_, t| t.total > 0);
    if tallies.is_empty() {
        return Err(StageError::insufficient(date, "topics cover no articles"));
    }

    let grand_total: i64 = tallies.values().map(|t| t.total).sum();
    let themes: BTreeSet<&String> = tallies.values().flat_map(|t| t.themes.keys()).collect();
    let baselines: BTreeMap<&String, f64> = themes
        .iter()
        .map(|&theme| {
            let theme_total: i64 = tallies
                .values()
                .filter_map(|t| t.themes.get(theme).map(|(c, _)| *c))
                .sum();
            (theme, theme_total as f64 / grand_total as f64)
        })
        .collect();

    let mut rows = Vec::with_capacity(tallies.len() * themes.len());
    for (source, tally) in &tallies {
        for &theme in &themes {
            let baseline = baselines[theme];
            let (count, contributing) = tally
                .themes
                .get(theme)
                .map(|(c, ts)| (*c, ts.as_slice()))
                .unwrap_or((0, &[][..]));
            let share = count as f64 / tally.total as f64;
            let topics_json: Vec<_> = contributing
                .iter()
                .map(|t| {
                    json!({
                        "media_type": t.media_type,
                        "topic_id": t.topic_id,
                        "topic_label": t.topic_label,
                        "articles_count": t.articles_count,
                    })
                })
                .collect();
            rows.push(MediaBiasScore {
                date,
                source: source.to_string(),
                theme: theme.clone(),
                bias_score: share - baseline,
                methodology: METHODOLOGY.to_string(),
                details: json!({
                    "theme_articles": count,
                    "source_articles": tally.total,
                    "share": share,
                    "baseline": baseline,
                    "sources": tallies.len(),
                    "topics": topics_json,
                }),
            });
        }
    }
    Ok(rows)
}

/// Score `date` from stored topics and replace its bias rows.
pub async fn run(db: &Arc<dyn Database>, taxonomy: &ThemeTaxonomy, date: NaiveDate) -> Result<StageReport> {
    let mut report = StageReport::new("bias");
    let topics = db.get_topics_between(date, date).await?;

    match score_bias(date, &topics, taxonomy) {
        Ok(rows) => {
            db.replace_bias_scores(date, &rows).await?;
            info!(%date, rows = rows.len(), "Bias scores written");
            report.written(date, rows.len());
        }
        Err(e) => report.record_error(date, &e),
    }
    Ok(report)
}
