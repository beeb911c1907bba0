//! Per-cycle and per-trigger summaries.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::AppError;
use crate::models::{SourceId, StoredRecord};

/// Summary of one ingestion cycle for one source. Not persisted.
#[derive(Debug, Default)]
pub struct IngestionRun {
    pub source_id: SourceId,
    pub source_name: String,

    /// Records delivered by the adapter
    pub fetched: usize,
    /// Items the adapter dropped for missing required fields
    pub skipped: usize,
    /// Pages requested from the upstream
    pub pages: usize,

    /// Records inserted for the first time
    pub inserted: Vec<StoredRecord>,
    /// Records already present (last-seen refreshed)
    pub duplicates: usize,
    /// Per-record insert failures
    pub errors: usize,
    /// Records removed by staleness eviction
    pub evicted: usize,
    /// Eviction skipped because the fetch was below the representativeness floor
    pub eviction_skipped: bool,

    pub duration: Duration,

    /// Terminal error when the whole cycle failed
    pub error: Option<AppError>,
}

impl IngestionRun {
    /// An empty run for the given source.
    pub fn new(source_id: SourceId, source_name: impl Into<String>) -> Self {
        Self {
            source_id,
            source_name: source_name.into(),
            ..Self::default()
        }
    }

    /// A run that failed before doing any work.
    pub fn failed(source_id: SourceId, error: AppError) -> Self {
        Self {
            source_id,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn new_count(&self) -> usize {
        self.inserted.len()
    }
}

/// Aggregate result of one trigger across all sources.
#[derive(Debug, Default)]
pub struct TriggerSummary {
    /// Completed cycles, successful or not, ordered by source id
    pub runs: Vec<IngestionRun>,
    pub duration: Duration,
}

impl TriggerSummary {
    pub fn succeeded(&self) -> usize {
        self.runs.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.runs.len() - self.succeeded()
    }

    pub fn total_new(&self) -> usize {
        self.runs.iter().map(IngestionRun::new_count).sum()
    }

    /// Failure reason per source.
    pub fn failures(&self) -> BTreeMap<SourceId, String> {
        self.runs
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| (r.source_id, e.to_string())))
            .collect()
    }

    /// Run for a given source, if it reported.
    pub fn run(&self, source_id: SourceId) -> Option<&IngestionRun> {
        self.runs.iter().find(|r| r.source_id == source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_and_failure_map() {
        let mut ok = IngestionRun::new(SourceId(1), "a");
        ok.duplicates = 3;
        let failed = IngestionRun::failed(SourceId(2), AppError::UnknownSource(SourceId(2)));

        let summary = TriggerSummary {
            runs: vec![ok, failed],
            duration: Duration::from_secs(1),
        };

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.total_new(), 0);
        let failures = summary.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[&SourceId(2)].contains("no adapter registered"));
    }
}
