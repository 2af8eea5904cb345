//! Worker-pool capability
//!
//! The coordinator never runs user work on a caller's thread or on the
//! ticker's dispatch thread; it hands the work to an [`Executor`], which runs
//! it on some background thread and returns immediately.
//!
//! [`PooledExecutor`] is the production implementation. Tests usually inject
//! the inline [`DirectExecutor`](crate::mock::DirectExecutor) instead.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

/// A unit of work submitted to an executor
pub type Task = Box<dyn FnOnce() + Send>;

/// Errors for executor submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// The executor no longer accepts submissions
    #[error("executor is shutting down")]
    ShuttingDown,
}

/// Background-thread task runner consumed by the coordinator
pub trait Executor: Send + Sync {
    /// Run `task` on some background thread; submit-and-return
    fn execute(&self, task: Task) -> Result<(), ExecutorError>;
}

/// Fixed-size thread pool
///
/// All worker threads are spawned at construction and wait for work, so a
/// submission never pays thread-start latency. Dropping the pool closes the
/// queue and joins the workers; tasks already queued still run.
pub struct PooledExecutor {
    sender: Option<mpsc::Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl PooledExecutor {
    /// Create a pool with `workers` threads (at least one)
    pub fn new(workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..workers.max(1))
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                thread::spawn(move || worker_loop(index, &receiver))
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Executor for PooledExecutor {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        match &self.sender {
            Some(sender) => sender.send(task).map_err(|_| ExecutorError::ShuttingDown),
            None => Err(ExecutorError::ShuttingDown),
        }
    }
}

impl Drop for PooledExecutor {
    fn drop(&mut self) {
        // Closing the channel makes every worker's recv() fail once the
        // queue drains.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(index: usize, receiver: &Mutex<mpsc::Receiver<Task>>) {
    loop {
        let task = receiver
            .lock()
            .expect("executor receiver poisoned")
            .recv();
        match task {
            Ok(task) => {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!(worker = index, "executor task panicked");
                }
            }
            Err(mpsc::RecvError) => return,
        }
    }
}
