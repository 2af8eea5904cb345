//! Per-job run statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a job's execution history
///
/// Maintained by the coordinator across runs; a run that panics counts as
/// completed and as a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Runs that began executing on a worker thread
    pub runs_started: u64,

    /// Runs that returned, successfully or not
    pub runs_completed: u64,

    /// Runs that ended in a failure of the work body
    pub failures: u64,

    /// Wall-clock start of the most recent run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_started_at: Option<DateTime<Utc>>,

    /// Wall-clock end of the most recent run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_finished_at: Option<DateTime<Utc>>,
}

impl JobStats {
    /// Record the start of a run
    pub(crate) fn record_started(&mut self) {
        self.runs_started += 1;
        self.last_run_started_at = Some(Utc::now());
    }

    /// Record the end of a run
    pub(crate) fn record_finished(&mut self, failed: bool) {
        self.runs_completed += 1;
        if failed {
            self.failures += 1;
        }
        self.last_run_finished_at = Some(Utc::now());
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
