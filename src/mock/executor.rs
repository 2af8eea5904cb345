//! Inline executor

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::executor::{Executor, ExecutorError, Task};

/// Executor that runs each submission inline on the calling thread
///
/// Deterministic-test companion of
/// [`ManualTicker`](crate::mock::ManualTicker): a fired callback runs the
/// work body to completion before `fire` returns, so tests observe the
/// post-run state without waiting.
#[derive(Debug, Default)]
pub struct DirectExecutor {
    rejecting: AtomicBool,
    submissions: AtomicU64,
}

impl DirectExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `execute` calls fail with
    /// [`ExecutorError::ShuttingDown`]
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Number of accepted submissions
    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }
}

impl Executor for DirectExecutor {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(ExecutorError::ShuttingDown);
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        task();
        Ok(())
    }
}
