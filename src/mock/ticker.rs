//! Manually fired ticker

use std::sync::Mutex;
use std::time::Duration;

use crate::ticker::{TaskId, Ticker, TickerCallback, TickerError};

struct Arming {
    task: TaskId,
    delay: Duration,
    callback: TickerCallback,
}

#[derive(Default)]
struct ManualState {
    armed: Vec<Arming>,
    cancelled: Vec<TaskId>,
    rejecting: bool,
}

/// Ticker that fires only when told to
///
/// Never spawns a thread; callbacks run on the thread calling
/// [`fire`](ManualTicker::fire). Armings supersede by task id exactly like
/// the production ticker, and the requested delays are recorded for
/// assertions.
#[derive(Default)]
pub struct ManualTicker {
    state: Mutex<ManualState>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task ids currently armed, in arming order
    pub fn armed(&self) -> Vec<TaskId> {
        self.lock().armed.iter().map(|arming| arming.task).collect()
    }

    /// Delay requested by the pending arming for `task`
    pub fn delay_of(&self, task: TaskId) -> Option<Duration> {
        self.lock()
            .armed
            .iter()
            .find(|arming| arming.task == task)
            .map(|arming| arming.delay)
    }

    /// Check whether `task` was ever cancelled
    pub fn was_cancelled(&self, task: TaskId) -> bool {
        self.lock().cancelled.contains(&task)
    }

    /// Make subsequent `schedule` calls fail with
    /// [`TickerError::ShuttingDown`]
    pub fn set_rejecting(&self, rejecting: bool) {
        self.lock().rejecting = rejecting;
    }

    /// Fire the pending arming for `task` on the calling thread
    ///
    /// Returns false when nothing is armed for `task`. The callback runs
    /// without the ticker's lock, so it may re-schedule.
    pub fn fire(&self, task: TaskId) -> bool {
        let arming = {
            let mut state = self.lock();
            match state.armed.iter().position(|arming| arming.task == task) {
                Some(index) => state.armed.remove(index),
                None => return false,
            }
        };
        (arming.callback)();
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().expect("manual ticker mutex poisoned")
    }
}

impl Ticker for ManualTicker {
    fn schedule(
        &self,
        task: TaskId,
        delay: Duration,
        callback: TickerCallback,
    ) -> Result<(), TickerError> {
        let mut state = self.lock();
        if state.rejecting {
            return Err(TickerError::ShuttingDown);
        }
        state.armed.retain(|arming| arming.task != task);
        state.armed.push(Arming {
            task,
            delay,
            callback,
        });
        Ok(())
    }

    fn cancel(&self, task: TaskId) {
        let mut state = self.lock();
        state.armed.retain(|arming| arming.task != task);
        state.cancelled.push(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting_callback(counter: &Arc<AtomicU32>) -> TickerCallback {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_schedule_records_the_arming() {
        let ticker = ManualTicker::new();
        let counter = Arc::new(AtomicU32::new(0));
        let task = TaskId::next();

        ticker
            .schedule(task, Duration::from_millis(25), counting_callback(&counter))
            .unwrap();

        assert_eq!(ticker.armed(), vec![task]);
        assert_eq!(ticker.delay_of(task), Some(Duration::from_millis(25)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_task_supersedes() {
        let ticker = ManualTicker::new();
        let counter = Arc::new(AtomicU32::new(0));
        let task = TaskId::next();

        ticker
            .schedule(task, Duration::from_millis(50), counting_callback(&counter))
            .unwrap();
        ticker
            .schedule(task, Duration::from_millis(10), counting_callback(&counter))
            .unwrap();

        assert_eq!(ticker.armed().len(), 1);
        assert_eq!(ticker.delay_of(task), Some(Duration::from_millis(10)));

        assert!(ticker.fire(task));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fire_unknown_task_returns_false() {
        let ticker = ManualTicker::new();
        assert!(!ticker.fire(TaskId::next()));
    }

    #[test]
    fn test_cancel_removes_and_records() {
        let ticker = ManualTicker::new();
        let counter = Arc::new(AtomicU32::new(0));
        let task = TaskId::next();

        ticker
            .schedule(task, Duration::ZERO, counting_callback(&counter))
            .unwrap();
        ticker.cancel(task);

        assert!(ticker.armed().is_empty());
        assert!(ticker.was_cancelled(task));
        assert!(!ticker.fire(task));
    }

    #[test]
    fn test_rejecting_mode() {
        let ticker = ManualTicker::new();
        ticker.set_rejecting(true);
        let result = ticker.schedule(TaskId::next(), Duration::ZERO, Box::new(|| {}));
        assert_eq!(result, Err(TickerError::ShuttingDown));
        assert!(ticker.armed().is_empty());
    }
}
