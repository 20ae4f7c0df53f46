use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    capture::{CapturedTarget, TargetFailure},
    db::ItemKey,
};

/// What happened to each target in one batch.
#[derive(Debug)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub captured: Vec<CapturedTarget>,
    pub skipped: Vec<ItemKey>,
    pub failures: Vec<TargetFailure>,
}

impl BatchSummary {
    pub(crate) fn start() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            captured: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    pub fn attempted(&self) -> usize {
        self.captured.len() + self.skipped.len() + self.failures.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// "completed" or "completed with N error(s)".
    pub fn status_line(&self) -> String {
        match self.failed_count() {
            0 => "completed".to_string(),
            1 => "completed with 1 error".to_string(),
            n => format!("completed with {n} errors"),
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = (self.finished_at - self.started_at).num_milliseconds();
        write!(
            f,
            "run {} {}: {} captured, {} skipped, {} failed in {}ms",
            self.run_id,
            self.status_line(),
            self.captured.len(),
            self.skipped.len(),
            self.failed_count(),
            elapsed
        )
    }
}

/// Result of a capture run that passed its preconditions.
#[derive(Debug)]
pub enum RunStatus {
    /// The calendar gate refused the run and no override was given.
    MarketClosed { reason: String },
    Completed(BatchSummary),
}
