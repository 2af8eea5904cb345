//! Coordinator state machine
//!
//! Job states: IDLE → WAITING → RUNNING → IDLE under triggers and firings,
//! with TERMINATING as intermediate state on the termination path and
//! TERMINATED as the absorbing final state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global sequence counter for ordering scheduler entries within a process
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get the next sequence number for ordering
pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Observable job state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// No execution is pending or in progress
    Idle,
    /// An execution is armed, waiting for its deadline to elapse
    Waiting,
    /// The work body is executing on a worker thread
    Running,
    /// Termination was requested while the work body was executing
    /// (intermediate state)
    Terminating,
    /// The job performs no more work
    Terminated,
}

impl JobState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: JobState) -> bool {
        match (self, target) {
            // From IDLE
            (JobState::Idle, JobState::Waiting) => true,
            (JobState::Idle, JobState::Terminated) => true,

            // From WAITING
            (JobState::Waiting, JobState::Running) => true,
            (JobState::Waiting, JobState::Terminated) => true,

            // From RUNNING
            (JobState::Running, JobState::Idle) => true,
            (JobState::Running, JobState::Waiting) => true, // Re-arm accumulated during the run
            (JobState::Running, JobState::Terminating) => true,

            // From TERMINATING
            (JobState::Terminating, JobState::Terminated) => true,

            // TERMINATED is absorbing
            _ => false,
        }
    }

    /// Check if this is the terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Terminated)
    }

    /// Check if termination has begun
    ///
    /// Once true for a given job, it stays true: the only transition leaving
    /// this set of states is TERMINATING → TERMINATED.
    pub fn is_terminating_or_terminated(&self) -> bool {
        matches!(self, JobState::Terminating | JobState::Terminated)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => write!(f, "IDLE"),
            JobState::Waiting => write!(f, "WAITING"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Terminating => write!(f, "TERMINATING"),
            JobState::Terminated => write!(f, "TERMINATED"),
        }
    }
}
