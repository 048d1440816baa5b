// Stage error kinds and per-partition outcome reporting.
//
// A batch stage walks many partitions. Most failures belong to a single
// partition and must not stop its siblings; only store-level problems abort
// the whole stage. `StageError` names the four kinds, `PartitionOutcome`
// records what happened to each partition, and `StageReport` collects them
// so the caller can print and log every skip with its partition and date.

use std::fmt;

use thiserror::Error;
use tracing::{info, warn};

/// Error kinds a stage can hit while processing one partition.
#[derive(Error, Debug)]
pub enum StageError {
    /// Too few documents or too little history to fit a model. Skipped, no row.
    #[error("insufficient data for {partition}: {detail}")]
    InsufficientData { partition: String, detail: String },

    /// An expected upstream row is absent (e.g. no topics for bias scoring).
    #[error("missing upstream data for {partition}: {detail}")]
    DependencyMissing { partition: String, detail: String },

    /// Numerical failure (degenerate matrix, NaN in a fit). Fatal for the
    /// partition only.
    #[error("computation failed for {partition}: {detail}")]
    ComputationFailure { partition: String, detail: String },

    /// Constraint violation on an idempotent upsert. Indicates a logic bug and
    /// aborts the stage.
    #[error("store conflict for {partition}: {detail}")]
    StoreConflict { partition: String, detail: String },
}

impl StageError {
    pub fn insufficient(partition: impl ToString, detail: impl Into<String>) -> Self {
        StageError::InsufficientData {
            partition: partition.to_string(),
            detail: detail.into(),
        }
    }

    pub fn missing(partition: impl ToString, detail: impl Into<String>) -> Self {
        StageError::DependencyMissing {
            partition: partition.to_string(),
            detail: detail.into(),
        }
    }

    pub fn computation(partition: impl ToString, detail: impl Into<String>) -> Self {
        StageError::ComputationFailure {
            partition: partition.to_string(),
            detail: detail.into(),
        }
    }

    pub fn conflict(partition: impl ToString, detail: impl Into<String>) -> Self {
        StageError::StoreConflict {
            partition: partition.to_string(),
            detail: detail.into(),
        }
    }

    /// Skips are expected outcomes (nothing to compute), not failures.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            StageError::InsufficientData { .. } | StageError::DependencyMissing { .. }
        )
    }

    /// Whether this error must abort the whole stage instead of one partition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::StoreConflict { .. })
    }
}

/// What happened to one partition during a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionOutcome {
    Written { rows: usize },
    Skipped { reason: String },
    Failed { error: String },
}

/// Outcome of one stage over one target date.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: String,
    pub entries: Vec<(String, PartitionOutcome)>,
}

impl StageReport {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn written(&mut self, partition: impl ToString, rows: usize) {
        let partition = partition.to_string();
        info!(stage = %self.stage, partition = %partition, rows, "Partition written");
        self.entries
            .push((partition, PartitionOutcome::Written { rows }));
    }

    pub fn skipped(&mut self, partition: impl ToString, reason: impl Into<String>) {
        let partition = partition.to_string();
        let reason = reason.into();
        info!(stage = %self.stage, partition = %partition, reason = %reason, "Partition skipped");
        self.entries
            .push((partition, PartitionOutcome::Skipped { reason }));
    }

    pub fn failed(&mut self, partition: impl ToString, error: impl fmt::Display) {
        let partition = partition.to_string();
        let error = error.to_string();
        warn!(stage = %self.stage, partition = %partition, error = %error, "Partition failed");
        self.entries
            .push((partition, PartitionOutcome::Failed { error }));
    }

    /// Record a non-fatal `StageError` as a skip or a failure.
    pub fn record_error(&mut self, partition: impl ToString, err: &StageError) {
        if err.is_skip() {
            self.skipped(partition, err.to_string());
        } else {
            self.failed(partition, err);
        }
    }

    pub fn rows_written(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, o)| match o {
                PartitionOutcome::Written { rows } => *rows,
                _ => 0,
            })
            .sum()
    }

    pub fn skipped_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, o)| matches!(o, PartitionOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, o)| matches!(o, PartitionOutcome::Failed { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_kinds() {
        assert!(StageError::insufficient("p", "x").is_skip());
        assert!(StageError::missing("p", "x").is_skip());
        assert!(!StageError::computation("p", "x").is_skip());
        assert!(StageError::conflict("p", "x").is_fatal());
        assert!(!StageError::computation("p", "x").is_fatal());
    }

    #[test]
    fn test_report_counts() {
        let mut report = StageReport::new("keywords");
        report.written("a", 10);
        report.written("b", 3);
        report.skipped("c", "no documents");
        report.record_error("d", &StageError::computation("d", "NaN"));
        assert_eq!(report.rows_written(), 13);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.failed_count(), 1);
    }

    #[test]
    fn test_error_message_names_partition() {
        let err = StageError::insufficient("2024-01-10/bfmtv/tv", "2 documents, need 3");
        assert!(err.to_string().contains("2024-01-10/bfmtv/tv"));
    }
}
