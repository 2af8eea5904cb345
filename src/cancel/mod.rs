//! Cooperative cancellation for running work
//!
//! Terminating a job whose work body is executing delivers an interrupt
//! through the job's `CancellationToken`. The work body observes the token,
//! either by polling [`CancellationToken::is_interrupted`] or by sleeping
//! through [`CancellationToken::sleep`], and is expected to return promptly
//! once interrupted.
//!
//! The interrupt is a latch: once set it stays set for the lifetime of the
//! token, and every sleeper past or future observes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Error returned when a sleep was cut short by an interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("interrupted")]
pub struct Interrupted;

#[derive(Debug, Default)]
struct TokenInner {
    interrupted: AtomicBool,
    // The mutex guards nothing beyond the wait itself; it exists so that
    // flag checks and condvar waits are atomic with respect to interrupt().
    lock: Mutex<()>,
    wake: Condvar,
}

/// Cheap-to-clone interrupt flag shared between a coordinator and its work body
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Create a fresh, un-interrupted token
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the interrupt flag and wake all sleepers
    ///
    /// Idempotent; later calls have no additional effect.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock().expect("token mutex poisoned");
        self.inner.wake.notify_all();
    }

    /// Observe the interrupt flag
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on interrupt
    ///
    /// Returns `Err(Interrupted)` immediately when the token is already
    /// interrupted, or as soon as [`interrupt`](Self::interrupt) is called
    /// mid-sleep. Spurious condvar wakeups are absorbed by re-checking the
    /// deadline.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        // A deadline past the representable range means "sleep until
        // interrupted".
        let deadline = Instant::now().checked_add(duration);
        let mut guard = self.inner.lock.lock().expect("token mutex poisoned");
        loop {
            if self.is_interrupted() {
                return Err(Interrupted);
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(());
                    }
                    let (next, _) = self
                        .inner
                        .wake
                        .wait_timeout(guard, deadline - now)
                        .expect("token mutex poisoned");
                    guard = next;
                }
                None => {
                    guard = self.inner.wake.wait(guard).expect("token mutex poisoned");
                }
            }
        }
    }
}
