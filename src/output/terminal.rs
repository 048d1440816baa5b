// Colored terminal output for stage reports and stored results.

use colored::Colorize;

use super::truncate_chars;
use crate::db::models::{DailyKeyword, LifetimeRecord, MediaBiasScore, NarrativeCluster, Spike};
use crate::error::{PartitionOutcome, StageReport};

/// One line per partition, then a per-stage summary.
pub fn display_report(report: &StageReport) {
    println!("\n{}", format!("=== {} ===", report.stage).bold());
    if report.entries.is_empty() {
        println!("  {}", "nothing to do".dimmed());
        return;
    }

    for (partition, outcome) in &report.entries {
        match outcome {
            PartitionOutcome::Written { rows } => {
                println!("  {} {:<40} {} rows", "ok".green(), partition, rows);
            }
            PartitionOutcome::Skipped { reason } => {
                println!("  {} {:<40} {}", "--".yellow(), partition, reason.dimmed());
            }
            PartitionOutcome::Failed { error } => {
                println!("  {} {:<40} {}", "!!".red().bold(), partition, error);
            }
        }
    }

    println!(
        "  {} rows written, {} skipped, {} failed",
        report.rows_written(),
        report.skipped_count(),
        report.failed_count()
    );
}

pub fn display_keywords(rows: &[DailyKeyword]) {
    if rows.is_empty() {
        println!("No keywords for this partition. Run `agenda keywords` first.");
        return;
    }
    println!("  {:>4}  {:<28} {:>6}  {:>8}", "Rank".dimmed(), "Word".dimmed(), "Count".dimmed(), "Weight".dimmed());
    println!("  {}", "-".repeat(52).dimmed());
    for k in rows {
        println!("  {:>4}. {:<28} {:>6}  {:>8.3}", k.rank, truncate_chars(&k.word, 28), k.count, k.weight);
    }
}

pub fn display_spikes(rows: &[Spike]) {
    if rows.is_empty() {
        println!("No spikes above threshold.");
        return;
    }
    for s in rows {
        let label = s.details["topic_label"].as_str().unwrap_or("?");
        println!(
            "  {} {}/{} topic {} {:<36} z={:.2} (baseline {} days)",
            "^".red().bold(),
            s.source,
            s.media_type,
            s.topic_id,
            truncate_chars(label, 36),
            s.spike_score,
            s.baseline_window
        );
    }
}

pub fn display_bias(rows: &[MediaBiasScore]) {
    if rows.is_empty() {
        println!("No bias scores for this date.");
        return;
    }
    for b in rows {
        let text = format!("{:+.3}", b.bias_score);
        let score = if b.bias_score > 0.0 { text.as_str().green() } else { text.as_str().yellow() };
        println!("  {:<20} {:<36} {}", b.source, truncate_chars(&b.theme, 36), score);
    }
}

pub fn display_clusters(clusters: &[NarrativeCluster]) {
    if clusters.is_empty() {
        println!("No narrative clusters yet.");
        return;
    }
    for c in clusters {
        println!(
            "  #{:<5} {:<48} {:>5} docs",
            c.cluster_id,
            truncate_chars(&c.label, 48),
            c.size
        );
    }
}

/// The `limit` records with the most mentions.
pub fn display_lifetimes(records: &[LifetimeRecord], limit: usize) {
    if records.is_empty() {
        println!("No lifetime records yet.");
        return;
    }
    let mut sorted: Vec<&LifetimeRecord> = records.iter().collect();
    sorted.sort_by(|a, b| b.total_mentions.cmp(&a.total_mentions).then(a.entity.cmp(&b.entity)));
    for r in sorted.into_iter().take(limit) {
        println!(
            "  {:<32} {} → {}  peak {} ({})  total {}  sources {}",
            truncate_chars(&r.entity, 32),
            r.first_seen,
            r.last_seen,
            r.peak_mentions,
            r.peak_date,
            r.total_mentions,
            r.sources_covered.len()
        );
    }
}
