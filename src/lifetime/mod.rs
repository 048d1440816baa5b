// Lifetime Tracker: first/last/peak/total/sources per keyword, topic and theme.
//
// Each kind keeps a ledger of the days already merged, with a digest (row
// count and mention sum) of what those days held at merge time. A run merges
// every unmerged day up to the target, in any order, so backfilled and late
// days are picked up. Records only widen: first_seen moves earlier,
// last_seen later, totals grow, the source set only gains members and the
// peak is the largest day (earliest on a tie). When a merged day's digest no
// longer matches its rows, or records exist without a ledger, the kind is
// rebuilt from history in one transaction.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::corpus::ALL_SOURCES;
use crate::db::models::{DailyKeyword, DailyTopic, DayDigest, LifetimeKind, LifetimeRecord};
use crate::db::Database;
use crate::error::StageReport;
use crate::topics::ThemeTaxonomy;

/// Mentions of one entity on one day, summed over sources.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub entity: String,
    pub date: NaiveDate,
    pub mentions: i64,
    pub sources: BTreeSet<String>,
}

fn fold<'a, I>(items: I) -> Vec<Observation>
where
    I: IntoIterator<Item = (String, NaiveDate, i64, &'a str)>,
{
    let mut grouped: BTreeMap<(String, NaiveDate), (i64, BTreeSet<String>)> = BTreeMap::new();
    for (entity, date, mentions, source) in items {
        if mentions <= 0 || source == ALL_SOURCES {
            continue;
        }
        let slot = grouped.entry((entity, date)).or_default();
        slot.0 += mentions;
        slot.1.insert(source.to_string());
    }
    grouped
        .into_iter()
        .map(|((entity, date), (mentions, sources))| Observation {
            entity,
            date,
            mentions,
            sources,
        })
        .collect()
}

pub fn keyword_observations(rows: &[DailyKeyword]) -> Vec<Observation> {
    fold(rows.iter().map(|k| (k.word.clone(), k.date, k.count, k.source.as_str())))
}

pub fn topic_observations(rows: &[DailyTopic]) -> Vec<Observation> {
    fold(
        rows.iter()
            .map(|t| (t.topic_label.clone(), t.date, t.articles_count, t.source.as_str())),
    )
}

pub fn theme_observations(rows: &[DailyTopic], taxonomy: &ThemeTaxonomy) -> Vec<Observation> {
    fold(
        rows.iter()
            .map(|t| (taxonomy.theme_for(t), t.date, t.articles_count, t.source.as_str())),
    )
}

/// Fold one day's observation into a record.
pub fn merge_observation(record: &mut LifetimeRecord, obs: &Observation) {
    record.first_seen = record.first_seen.min(obs.date);
    record.last_seen = record.last_seen.max(obs.date);
    record.total_mentions += obs.mentions;
    if obs.mentions > record.peak_mentions
        || (obs.mentions == record.peak_mentions && obs.date < record.peak_date)
    {
        record.peak_mentions = obs.mentions;
        record.peak_date = obs.date;
    }
    record.sources_covered.extend(obs.sources.iter().cloned());
}

/// Merge observations into existing records, creating records for new
/// entities. Returns only the records that changed, ordered by entity.
pub fn merge_records(existing: Vec<LifetimeRecord>, observations: &[Observation]) -> Vec<LifetimeRecord> {
    let mut records: HashMap<String, LifetimeRecord> =
        existing.into_iter().map(|r| (r.entity.clone(), r)).collect();
    let mut touched: BTreeSet<&str> = BTreeSet::new();

    for obs in observations {
        touched.insert(&obs.entity);
        let record = records
            .entry(obs.entity.clone())
            .or_insert_with(|| LifetimeRecord {
                entity: obs.entity.clone(),
                first_seen: obs.date,
                last_seen: obs.date,
                peak_date: obs.date,
                peak_mentions: 0,
                total_mentions: 0,
                sources_covered: BTreeSet::new(),
            });
        merge_observation(record, obs);
    }

    touched
        .into_iter()
        .filter_map(|e| records.remove(e))
        .collect()
}

async fn observations(
    db: &Arc<dyn Database>,
    kind: LifetimeKind,
    taxonomy: &ThemeTaxonomy,
    days: &[DayDigest],
) -> Result<Vec<Observation>> {
    let (Some(first), Some(last)) = (days.first(), days.last()) else {
        return Ok(Vec::new());
    };
    let wanted: BTreeSet<NaiveDate> = days.iter().map(|d| d.date).collect();
    let (from, to) = (first.date, last.date);
    Ok(match kind {
        LifetimeKind::Keyword => {
            let mut rows = db.get_keywords_between(from, to).await?;
            rows.retain(|r| wanted.contains(&r.date));
            keyword_observations(&rows)
        }
        LifetimeKind::Topic | LifetimeKind::Theme => {
            let mut rows = db.get_topics_between(from, to).await?;
            rows.retain(|r| wanted.contains(&r.date));
            if kind == LifetimeKind::Topic {
                topic_observations(&rows)
            } else {
                theme_observations(&rows, taxonomy)
            }
        }
    })
}

fn distinct_entities(observed: &[Observation]) -> Vec<String> {
    observed
        .iter()
        .map(|o| o.entity.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Merged days whose rows changed or vanished since they were merged.
fn rewritten_days(digests: &[DayDigest], merged: &HashMap<NaiveDate, DayDigest>, target: NaiveDate) -> Vec<NaiveDate> {
    let current: HashMap<NaiveDate, &DayDigest> = digests.iter().map(|d| (d.date, d)).collect();
    let mut changed: Vec<NaiveDate> = merged
        .values()
        .filter(|m| m.date <= target && current.get(&m.date).copied() != Some(*m))
        .map(|m| m.date)
        .collect();
    changed.sort();
    changed
}

/// Merge every unmerged day up to `target` for each kind.
pub async fn run(
    db: &Arc<dyn Database>,
    kinds: &[LifetimeKind],
    taxonomy: &ThemeTaxonomy,
    target: NaiveDate,
) -> Result<StageReport> {
    let mut report = StageReport::new("lifetime");

    for &kind in kinds {
        let digests = db.lifetime_digests(kind, target).await?;
        let merged: HashMap<NaiveDate, DayDigest> = db
            .get_merged_days(kind)
            .await?
            .into_iter()
            .map(|d| (d.date, d))
            .collect();

        let rewritten = rewritten_days(&digests, &merged, target);
        let orphaned = merged.is_empty() && !db.get_all_lifetimes(kind).await?.is_empty();
        if !rewritten.is_empty() || orphaned {
            warn!(%kind, rewritten = ?rewritten, orphaned, "Merged days changed, rebuilding from history");
            // Days merged by later runs stay merged.
            let through = merged.keys().copied().max().map_or(target, |last| last.max(target));
            let history = if through > target {
                db.lifetime_digests(kind, through).await?
            } else {
                digests
            };
            let observed = observations(db, kind, taxonomy, &history).await?;
            let records = merge_records(Vec::new(), &observed);
            db.replace_lifetimes(kind, &records, &history).await?;
            info!(%kind, %through, days = history.len(), entities = records.len(), "Lifetimes rebuilt");
            report.written(kind, records.len());
            continue;
        }

        let pending: Vec<DayDigest> = digests
            .into_iter()
            .filter(|d| !merged.contains_key(&d.date))
            .collect();
        if pending.is_empty() {
            report.skipped(kind, format!("every day through {target} already merged"));
            continue;
        }

        let observed = observations(db, kind, taxonomy, &pending).await?;
        let existing = db.get_lifetimes(kind, &distinct_entities(&observed)).await?;
        let records = merge_records(existing, &observed);
        db.merge_lifetimes(kind, &records, &pending).await?;

        info!(%kind, %target, days = pending.len(), entities = records.len(), "Lifetimes merged");
        report.written(kind, records.len());
    }

    Ok(report)
}

/// Drop the records and merged days of each kind so the next run rebuilds.
pub async fn reset(db: &Arc<dyn Database>, kinds: &[LifetimeKind]) -> Result<()> {
    for &kind in kinds {
        db.reset_lifetimes(kind).await?;
        info!(%kind, "Lifetimes reset");
    }
    Ok(())
}
