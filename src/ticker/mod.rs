//! Delayed scheduling capability
//!
//! The coordinator does not own time. It submits callbacks to a [`Ticker`],
//! which fires them after a requested delay on a thread it owns. Submissions
//! carry a [`TaskId`]; a submission with the same id as a pending arming
//! supersedes it, so a ticker never holds more than one pending firing per
//! id.
//!
//! [`ThreadTicker`] is the production implementation. Tests usually inject
//! the deterministic [`ManualTicker`](crate::mock::ManualTicker) instead.

use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::state::next_seq;

/// Callback fired by a ticker when a scheduled delay elapses
pub type TickerCallback = Box<dyn FnOnce() + Send>;

/// Deduplication key for ticker submissions
///
/// Each coordinator instance mints one id at construction and uses it for
/// every arming, so repeated submissions collapse into a single pending
/// firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Mint a process-unique task id
    pub fn next() -> Self {
        TaskId(next_seq())
    }
}

/// Errors for ticker submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TickerError {
    /// The ticker no longer accepts submissions
    #[error("ticker is shutting down")]
    ShuttingDown,
}

/// Delayed scheduler consumed by the coordinator
///
/// `schedule` arms `callback` to run after at least `delay`; zero is allowed
/// and means "as soon as the dispatch thread gets to it", while a delay
/// whose absolute deadline overflows the clock never fires at all. The
/// ticker dispatches on a thread it owns and promises no parallelism
/// between callbacks.
pub trait Ticker: Send + Sync {
    /// Arm `callback` to fire after at least `delay`, superseding any pending
    /// arming for the same `task`
    fn schedule(
        &self,
        task: TaskId,
        delay: Duration,
        callback: TickerCallback,
    ) -> Result<(), TickerError>;

    /// Best-effort removal of a pending arming
    ///
    /// A firing already being dispatched cannot be recalled; callers needing
    /// certainty must gate inside the callback.
    fn cancel(&self, task: TaskId);
}

struct PendingFire {
    task: TaskId,
    callback: TickerCallback,
}

#[derive(Default)]
struct TickerQueue {
    /// Pending firings ordered by (deadline, submission seq)
    entries: BTreeMap<(Instant, u64), PendingFire>,
    /// Index from task id to queue key, for supersede and cancel
    by_task: HashMap<TaskId, (Instant, u64)>,
    shutdown: bool,
}

impl TickerQueue {
    fn remove_task(&mut self, task: TaskId) -> bool {
        match self.by_task.remove(&task) {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }
}

struct TickerShared {
    queue: Mutex<TickerQueue>,
    wake: Condvar,
}

/// Thread-owning delayed scheduler
///
/// One dispatch thread sleeps until the earliest pending deadline and runs
/// due callbacks serially. Dropping the ticker stops the thread and discards
/// whatever is still pending.
pub struct ThreadTicker {
    shared: Arc<TickerShared>,
    dispatcher: Option<JoinHandle<()>>,
}

impl ThreadTicker {
    /// Create the ticker and start its dispatch thread
    pub fn new() -> Self {
        let shared = Arc::new(TickerShared {
            queue: Mutex::new(TickerQueue::default()),
            wake: Condvar::new(),
        });
        let dispatcher = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || dispatch_loop(&shared))
        };
        Self {
            shared,
            dispatcher: Some(dispatcher),
        }
    }

    /// Number of pending armings (diagnostics)
    pub fn pending(&self) -> usize {
        self.shared
            .queue
            .lock()
            .expect("ticker mutex poisoned")
            .entries
            .len()
    }
}

impl Default for ThreadTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for ThreadTicker {
    fn schedule(
        &self,
        task: TaskId,
        delay: Duration,
        callback: TickerCallback,
    ) -> Result<(), TickerError> {
        let mut queue = self.shared.queue.lock().expect("ticker mutex poisoned");
        if queue.shutdown {
            return Err(TickerError::ShuttingDown);
        }
        queue.remove_task(task);
        // A deadline past the clock's range never comes due: the superseded
        // arming stays removed and nothing is queued.
        let deadline = match Instant::now().checked_add(delay) {
            Some(deadline) => deadline,
            None => return Ok(()),
        };
        let key = (deadline, next_seq());
        queue.by_task.insert(task, key);
        queue.entries.insert(key, PendingFire { task, callback });
        self.shared.wake.notify_all();
        Ok(())
    }

    fn cancel(&self, task: TaskId) {
        let mut queue = self.shared.queue.lock().expect("ticker mutex poisoned");
        queue.remove_task(task);
    }
}

impl Drop for ThreadTicker {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().expect("ticker mutex poisoned");
            queue.shutdown = true;
            let dropped = queue.entries.len();
            if dropped > 0 {
                tracing::debug!(dropped, "ticker stopped with pending firings");
            }
            queue.entries.clear();
            queue.by_task.clear();
            self.shared.wake.notify_all();
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
    }
}

fn dispatch_loop(shared: &TickerShared) {
    let mut queue = shared.queue.lock().expect("ticker mutex poisoned");
    loop {
        if queue.shutdown {
            return;
        }
        let next = queue.entries.keys().next().copied();
        match next {
            Some(key) if key.0 <= Instant::now() => {
                let fire = queue
                    .entries
                    .remove(&key)
                    .expect("queue entry vanished under lock");
                queue.by_task.remove(&fire.task);
                // Callbacks run without the lock so they may re-schedule.
                drop(queue);
                if panic::catch_unwind(AssertUnwindSafe(fire.callback)).is_err() {
                    tracing::error!("ticker callback panicked");
                }
                queue = shared.queue.lock().expect("ticker mutex poisoned");
            }
            Some((deadline, _)) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                let (next, _) = shared
                    .wake
                    .wait_timeout(queue, timeout)
                    .expect("ticker mutex poisoned");
                queue = next;
            }
            None => {
                queue = shared.wake.wait(queue).expect("ticker mutex poisoned");
            }
        }
    }
}
