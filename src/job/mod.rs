//! Background job surface and construction
//!
//! A [`BackgroundJob`] is triggered, never scheduled directly: callers
//! request that the work body runs "soon", and the coordinator collapses any
//! number of overlapping requests into a single execution per aggregation
//! window. [`DelayedJobBuilder`] wires the work body to the injected
//! [`Ticker`](crate::ticker::Ticker) and
//! [`Executor`](crate::executor::Executor) capabilities.

mod delayed;

pub use delayed::DelayedJob;

use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::executor::Executor;
use crate::state::JobState;
use crate::ticker::Ticker;

/// The work body of a background job
///
/// Invoked once per execution, outside the coordinator's mutex, on a thread
/// of the injected executor. The token is interrupted when the job is
/// terminated mid-run; a cooperative body checks it between blocking steps.
pub type Work = Arc<dyn Fn(&CancellationToken) + Send + Sync>;

/// Exposed surface of one coordinator instance
pub trait BackgroundJob: Send + Sync {
    /// Request that the work body runs after the default aggregation delay
    ///
    /// A no-op once the job is terminated.
    fn trigger_execution(&self);

    /// Request that the work body runs after at most `delay`
    ///
    /// Overlapping requests coalesce: the earliest requested deadline wins.
    /// A delay whose absolute deadline overflows the clock never comes due
    /// and arms nothing. A no-op once the job is terminated.
    fn trigger_execution_after(&self, delay: Duration);

    /// Drive the job to TERMINATED
    ///
    /// Idempotent. Cancels a pending arming, interrupts a running work body,
    /// and never blocks on the work body itself.
    fn terminate(&self);

    /// Wait up to `timeout` for the job to reach TERMINATED
    ///
    /// Returns essentially immediately once terminated, and no earlier than
    /// `timeout` otherwise. Callers re-check [`is_terminated`](Self::is_terminated).
    fn wait_for_termination(&self, timeout: Duration);

    /// Check whether the job has reached TERMINATED
    fn is_terminated(&self) -> bool;

    /// Snapshot of the current state
    fn state(&self) -> JobState;
}

/// Errors for job construction
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid job name: {0}")]
    InvalidName(String),
}

/// Validate a diagnostic job name
///
/// Names appear in log lines and thread diagnostics; they must be non-empty,
/// at most 64 characters, and free of control characters.
pub fn validate_job_name(name: &str) -> Result<(), BuildError> {
    if name.is_empty() {
        return Err(BuildError::InvalidName("name must not be empty".to_string()));
    }
    if name.len() > 64 {
        return Err(BuildError::InvalidName(format!(
            "name must be at most 64 bytes, got {}",
            name.len()
        )));
    }
    if let Some(c) = name.chars().find(|c| c.is_control()) {
        return Err(BuildError::InvalidName(format!(
            "name contains control character: {:?}",
            c
        )));
    }
    Ok(())
}

/// Builder for [`DelayedJob`]
pub struct DelayedJobBuilder {
    work: Option<Work>,
    name: Option<String>,
    default_delay: Option<Duration>,
    ticker: Option<Arc<dyn Ticker>>,
    executor: Option<Arc<dyn Executor>>,
}

impl DelayedJobBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            work: None,
            name: None,
            default_delay: None,
            ticker: None,
            executor: None,
        }
    }

    /// Set the work body
    pub fn work(mut self, work: impl Fn(&CancellationToken) + Send + Sync + 'static) -> Self {
        self.work = Some(Arc::new(work));
        self
    }

    /// Set the diagnostic name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the aggregation delay used by [`BackgroundJob::trigger_execution`]
    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    /// Set the delayed scheduler
    pub fn ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = Some(ticker);
        self
    }

    /// Set the worker pool
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build the job
    ///
    /// The job starts in IDLE with nothing armed; it does nothing until
    /// triggered.
    pub fn build(self) -> Result<DelayedJob, BuildError> {
        let work = self.work.ok_or(BuildError::MissingField("work"))?;
        let name = self.name.ok_or(BuildError::MissingField("name"))?;
        validate_job_name(&name)?;
        let default_delay = self
            .default_delay
            .ok_or(BuildError::MissingField("default_delay"))?;
        let ticker = self.ticker.ok_or(BuildError::MissingField("ticker"))?;
        let executor = self.executor.ok_or(BuildError::MissingField("executor"))?;
        Ok(DelayedJob::new(work, name, default_delay, ticker, executor))
    }
}

impl Default for DelayedJobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{DirectExecutor, ManualTicker};

    fn builder_with_capabilities() -> DelayedJobBuilder {
        DelayedJobBuilder::new()
            .ticker(Arc::new(ManualTicker::new()))
            .executor(Arc::new(DirectExecutor::new()))
    }

    #[test]
    fn test_build_with_all_fields() {
        let job = builder_with_capabilities()
            .work(|_| {})
            .name("refresh")
            .default_delay(Duration::from_millis(50))
            .build()
            .unwrap();
        assert_eq!(job.state(), JobState::Idle);
        assert_eq!(job.name(), "refresh");
        assert_eq!(job.default_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_build_rejects_missing_work() {
        let result = builder_with_capabilities()
            .name("refresh")
            .default_delay(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(BuildError::MissingField("work"))));
    }

    #[test]
    fn test_build_rejects_missing_capabilities() {
        let result = DelayedJobBuilder::new()
            .work(|_| {})
            .name("refresh")
            .default_delay(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(BuildError::MissingField("ticker"))));
    }

    #[test]
    fn test_validate_job_name_accepts_reasonable_names() {
        assert!(validate_job_name("identity-file-processor").is_ok());
        assert!(validate_job_name("refresh 2").is_ok());
    }

    #[test]
    fn test_validate_job_name_rejects_empty() {
        assert!(matches!(
            validate_job_name(""),
            Err(BuildError::InvalidName(_))
        ));
    }

    #[test]
    fn test_validate_job_name_rejects_control_characters() {
        assert!(matches!(
            validate_job_name("bad\nname"),
            Err(BuildError::InvalidName(_))
        ));
    }

    #[test]
    fn test_validate_job_name_rejects_overlong() {
        let name = "x".repeat(65);
        assert!(matches!(
            validate_job_name(&name),
            Err(BuildError::InvalidName(_))
        ));
    }
}
