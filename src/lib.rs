//! quiesce — delayed, deduplicating background-job coordinator
//!
//! Event sources that fire at high, bursty rates often feed a worker that
//! must run at most once per quiet period. A [`DelayedJob`] sits between
//! them: callers ask that the work body runs "soon", the job collapses any
//! number of such requests arriving within an aggregation delay into exactly
//! one future execution, runs it on a shared worker pool, and never lets two
//! executions of the same job overlap. Termination is deterministic, with a
//! bounded [`wait_for_termination`](DelayedJob::wait_for_termination) and
//! cooperative interruption of a running work body.
//!
//! The job owns no threads itself; it consumes two injected capabilities:
//! a [`Ticker`] (delayed scheduler deduplicating by task id) and an
//! [`Executor`] (background-thread task runner). [`ThreadTicker`] and
//! [`PooledExecutor`] are production implementations of both, and the
//! [`mock`] module has deterministic fakes for tests.
//!
//! ```
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use quiesce::{DelayedJob, PooledExecutor, ThreadTicker};
//!
//! let ticker = Arc::new(ThreadTicker::new());
//! let executor = Arc::new(PooledExecutor::new(2));
//!
//! let counter = Arc::new(AtomicU32::new(0));
//! let observed = Arc::clone(&counter);
//! let job = DelayedJob::builder()
//!     .work(move |_token| {
//!         observed.fetch_add(1, Ordering::SeqCst);
//!     })
//!     .name("index-refresh")
//!     .default_delay(Duration::from_millis(10))
//!     .ticker(ticker)
//!     .executor(executor)
//!     .build()
//!     .unwrap();
//!
//! // A burst of triggers coalesces into a single run.
//! job.trigger_execution();
//! job.trigger_execution();
//! job.trigger_execution();
//! std::thread::sleep(Duration::from_millis(200));
//! assert_eq!(counter.load(Ordering::SeqCst), 1);
//!
//! job.terminate();
//! job.wait_for_termination(Duration::from_secs(1));
//! assert!(job.is_terminated());
//! ```

pub mod cancel;
pub mod executor;
pub mod job;
pub mod mock;
pub mod state;
pub mod stats;
pub mod ticker;

pub use cancel::{CancellationToken, Interrupted};
pub use executor::{Executor, ExecutorError, PooledExecutor, Task};
pub use job::{
    validate_job_name, BackgroundJob, BuildError, DelayedJob, DelayedJobBuilder, Work,
};
pub use mock::{DirectExecutor, ManualTicker};
pub use state::JobState;
pub use stats::JobStats;
pub use ticker::{TaskId, Ticker, TickerCallback, TickerError, ThreadTicker};
