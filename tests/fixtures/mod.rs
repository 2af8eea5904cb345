//! Shared fixtures for coordinator integration tests
//!
//! The timing-sensitive scenarios all follow the same shape: a counting job
//! with canaries for unwanted concurrency and unexpected interruption, a
//! `Sleeper` pinning assertions to absolute offsets from a start point, and
//! hammer threads that trigger in tight loops.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use quiesce::{DelayedJob, Executor, JobState, PooledExecutor, ThreadTicker, Ticker};

/// Sleeps to absolute offsets from its creation, so consecutive assertions
/// don't accumulate drift.
pub struct Sleeper {
    start: Instant,
}

impl Sleeper {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Sleep until `offset_ms` after this sleeper was created
    pub fn sleep_until(&self, offset_ms: u64) {
        let deadline = self.start + Duration::from_millis(offset_ms);
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
    }
}

/// A counting job with concurrency and interruption canaries
pub struct CountingJob {
    pub job: DelayedJob,
    /// Incremented at the start of every execution
    pub value: Arc<AtomicU32>,
    /// Latched when two executions overlap
    pub was_concurrent: Arc<AtomicBool>,
    /// Latched when the work body's sleep is interrupted
    pub was_interrupted: Arc<AtomicBool>,
}

impl CountingJob {
    /// Assert that no execution overlapped and nothing was interrupted
    ///
    /// Tests that terminate a running job reset the interruption canary
    /// themselves before calling this.
    pub fn check_canaries(&self) {
        assert!(
            !self.was_concurrent.load(Ordering::SeqCst),
            "two executions of the same job overlapped"
        );
        assert!(
            !self.was_interrupted.load(Ordering::SeqCst),
            "a work body was interrupted unexpectedly"
        );
    }
}

/// Build a job whose work body increments a counter, then sleeps for
/// `work_duration` through its cancellation token.
pub fn counting_job(
    ticker: &Arc<ThreadTicker>,
    executor: &Arc<PooledExecutor>,
    name: &str,
    work_duration: Duration,
    delay: Duration,
) -> CountingJob {
    let value = Arc::new(AtomicU32::new(0));
    let was_concurrent = Arc::new(AtomicBool::new(false));
    let was_interrupted = Arc::new(AtomicBool::new(false));
    let running = Arc::new(AtomicBool::new(false));

    let work_value = Arc::clone(&value);
    let work_concurrent = Arc::clone(&was_concurrent);
    let work_interrupted = Arc::clone(&was_interrupted);
    let work_running = Arc::clone(&running);
    let job = DelayedJob::builder()
        .work(move |token| {
            if work_running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                work_concurrent.store(true, Ordering::SeqCst);
            }
            work_value.fetch_add(1, Ordering::SeqCst);
            if !work_duration.is_zero() && token.sleep(work_duration).is_err() {
                work_interrupted.store(true, Ordering::SeqCst);
            }
            work_running.store(false, Ordering::SeqCst);
        })
        .name(name)
        .default_delay(delay)
        .ticker(Arc::clone(ticker) as Arc<dyn Ticker>)
        .executor(Arc::clone(executor) as Arc<dyn Executor>)
        .build()
        .expect("counting job builds");

    CountingJob {
        job,
        value,
        was_concurrent,
        was_interrupted,
    }
}

/// Heat the ticker and executor threads by running the job to completion a
/// few times, then reset the counter.
pub fn warmup(counting: &CountingJob, work_duration: Duration) {
    assert_eq!(counting.job.state(), JobState::Idle);
    for round in 1..=10 {
        counting.job.trigger_execution_after(Duration::ZERO);
        thread::sleep(work_duration);
        for _ in 0..60 {
            if counting.job.state() == JobState::Idle {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(counting.job.state(), JobState::Idle);
        assert_eq!(counting.value.load(Ordering::SeqCst), round);
    }
    counting.value.store(0, Ordering::SeqCst);
}

/// Trigger the job with the default delay in tight loops for `duration`
pub fn hammer_default(job: DelayedJob, duration: Duration) -> impl FnOnce() + Send + 'static {
    move || {
        let start = Instant::now();
        while start.elapsed() < duration {
            for _ in 0..1000 {
                job.trigger_execution();
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Trigger the job once per delay in `delays_ms`, spaced roughly a
/// millisecond apart
pub fn hammer_custom(job: DelayedJob, delays_ms: Vec<u64>) -> impl FnOnce() + Send + 'static {
    move || {
        for delay in delays_ms {
            job.trigger_execution_after(Duration::from_millis(delay));
            thread::sleep(Duration::from_millis(1));
        }
    }
}
