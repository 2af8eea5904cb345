//! Delayed, deduplicating coordinator core
//!
//! One [`DelayedJob`] owns a state machine guarded by a single mutex.
//! Triggers arm the injected ticker; the ticker's firing hands the work body
//! to the injected executor; completion re-arms when triggers arrived
//! mid-run. Termination is monotonic: once begun it completes, cancelling a
//! pending arming or interrupting a running work body as needed.
//!
//! The work body always runs outside the mutex, so every operation here
//! blocks callers only for the duration of a state transition.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::executor::Executor;
use crate::job::{BackgroundJob, DelayedJobBuilder, Work};
use crate::state::JobState;
use crate::stats::JobStats;
use crate::ticker::{TaskId, Ticker};

/// Internal phase; carries only the data valid for its state
#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    /// An arming is pending; `deadline` is when it is due to fire
    Waiting { deadline: Instant },
    /// The work body is executing; `rearm` accumulates the minimum delay
    /// requested by triggers observed during the run
    Running { rearm: Option<Duration> },
    Terminating,
    Terminated,
}

impl Phase {
    fn observable(&self) -> JobState {
        match self {
            Phase::Idle => JobState::Idle,
            Phase::Waiting { .. } => JobState::Waiting,
            Phase::Running { .. } => JobState::Running,
            Phase::Terminating => JobState::Terminating,
            Phase::Terminated => JobState::Terminated,
        }
    }
}

struct Shared {
    phase: Mutex<Phase>,
    /// Broadcast on every transition to TERMINATED
    terminated: Condvar,
    stats: Mutex<JobStats>,
    work: Work,
    name: String,
    default_delay: Duration,
    /// Dedup key for every arming of this job
    task: TaskId,
    token: CancellationToken,
    ticker: Arc<dyn Ticker>,
    executor: Arc<dyn Executor>,
}

/// Delayed, deduplicating background-job coordinator
///
/// Cheap-to-clone handle; clones share one state machine. Any number of
/// threads may trigger, terminate, and observe concurrently.
#[derive(Clone)]
pub struct DelayedJob {
    shared: Arc<Shared>,
}

impl DelayedJob {
    pub(crate) fn new(
        work: Work,
        name: String,
        default_delay: Duration,
        ticker: Arc<dyn Ticker>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                phase: Mutex::new(Phase::Idle),
                terminated: Condvar::new(),
                stats: Mutex::new(JobStats::default()),
                work,
                name,
                default_delay,
                task: TaskId::next(),
                token: CancellationToken::new(),
                ticker,
                executor,
            }),
        }
    }

    /// Start building a job
    pub fn builder() -> DelayedJobBuilder {
        DelayedJobBuilder::new()
    }

    /// Diagnostic name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Aggregation delay used by [`trigger_execution`](Self::trigger_execution)
    pub fn default_delay(&self) -> Duration {
        self.shared.default_delay
    }

    /// Snapshot of the run statistics
    pub fn stats(&self) -> JobStats {
        self.shared.stats.lock().expect("stats mutex poisoned").clone()
    }

    /// Request that the work body runs after the default aggregation delay
    pub fn trigger_execution(&self) {
        self.trigger(self.shared.default_delay);
    }

    /// Request that the work body runs after at most `delay`
    pub fn trigger_execution_after(&self, delay: Duration) {
        self.trigger(delay);
    }

    /// Drive the job to TERMINATED; idempotent, never blocks on the work body
    pub fn terminate(&self) {
        let mut phase = self.lock_phase();
        match *phase {
            Phase::Idle => {
                self.set_phase(&mut phase, Phase::Terminated);
                self.shared.terminated.notify_all();
            }
            Phase::Waiting { .. } => {
                // Best-effort: a firing that slips through is discarded by
                // the fire handler's state check.
                self.shared.ticker.cancel(self.shared.task);
                self.set_phase(&mut phase, Phase::Terminated);
                self.shared.terminated.notify_all();
            }
            Phase::Running { .. } => {
                self.set_phase(&mut phase, Phase::Terminating);
                self.shared.token.interrupt();
            }
            Phase::Terminating | Phase::Terminated => {}
        }
    }

    /// Wait up to `timeout` for the job to reach TERMINATED
    ///
    /// Returns no earlier than `timeout` when the job does not terminate in
    /// time, and essentially immediately once it has. `Duration::MAX` waits
    /// indefinitely.
    pub fn wait_for_termination(&self, timeout: Duration) {
        let deadline = Instant::now().checked_add(timeout);
        let mut phase = self.lock_phase();
        loop {
            if matches!(*phase, Phase::Terminated) {
                return;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    let (next, _) = self
                        .shared
                        .terminated
                        .wait_timeout(phase, deadline - now)
                        .expect("job mutex poisoned");
                    phase = next;
                }
                None => {
                    phase = self
                        .shared
                        .terminated
                        .wait(phase)
                        .expect("job mutex poisoned");
                }
            }
        }
    }

    /// Check whether the job has reached TERMINATED
    pub fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    /// Snapshot of the current state
    pub fn state(&self) -> JobState {
        self.lock_phase().observable()
    }

    fn lock_phase(&self) -> std::sync::MutexGuard<'_, Phase> {
        self.shared.phase.lock().expect("job mutex poisoned")
    }

    fn set_phase(&self, phase: &mut Phase, next: Phase) {
        debug_assert!(
            phase.observable().can_transition_to(next.observable())
                || phase.observable() == next.observable(),
            "illegal transition {} -> {}",
            phase.observable(),
            next.observable(),
        );
        *phase = next;
    }

    /// Arm the ticker for an accumulated re-arm delay, dropping to IDLE when
    /// the arming is refused or the deadline is unrepresentable
    fn rearm_or_idle(&self, phase: &mut Phase, delay: Duration) {
        if let Some(deadline) = Instant::now().checked_add(delay) {
            if self.arm(delay) {
                self.set_phase(phase, Phase::Waiting { deadline });
                return;
            }
        }
        self.set_phase(phase, Phase::Idle);
    }

    fn trigger(&self, delay: Duration) {
        let mut phase = self.lock_phase();
        match *phase {
            Phase::Idle => {
                // The deadline is recorded before arming so a prompt firing
                // can never look early against it. A delay too large for the
                // clock never comes due, so nothing is armed.
                if let Some(deadline) = Instant::now().checked_add(delay) {
                    if self.arm(delay) {
                        self.set_phase(&mut phase, Phase::Waiting { deadline });
                    }
                }
            }
            Phase::Waiting { deadline } => {
                // An unrepresentable deadline cannot be earlier than the
                // armed one.
                if let Some(due) = Instant::now().checked_add(delay) {
                    if due < deadline && self.arm(delay) {
                        self.set_phase(&mut phase, Phase::Waiting { deadline: due });
                    }
                }
            }
            Phase::Running { rearm } => {
                let rearm = Some(match rearm {
                    Some(pending) => pending.min(delay),
                    None => delay,
                });
                self.set_phase(&mut phase, Phase::Running { rearm });
            }
            Phase::Terminating | Phase::Terminated => {}
        }
    }

    /// (Re)arm the ticker for this job's task id
    fn arm(&self, delay: Duration) -> bool {
        let fire = {
            let job = self.clone();
            Box::new(move || job.on_fire())
        };
        match self.shared.ticker.schedule(self.shared.task, delay, fire) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(job = %self.shared.name, error = %err, "ticker rejected arming");
                false
            }
        }
    }

    /// Ticker firing: hand the work body to the executor
    ///
    /// Runs on the ticker's dispatch thread and must not execute the work
    /// body itself.
    fn on_fire(&self) {
        {
            let mut phase = self.lock_phase();
            match *phase {
                Phase::Waiting { deadline } if Instant::now() >= deadline => {
                    self.set_phase(&mut phase, Phase::Running { rearm: None });
                }
                // Stale or early firing from a superseded arming.
                _ => {
                    tracing::trace!(job = %self.shared.name, "discarding stale ticker firing");
                    return;
                }
            }
        }

        let bootstrap = {
            let job = self.clone();
            Box::new(move || job.run_work())
        };
        if let Err(err) = self.shared.executor.execute(bootstrap) {
            tracing::warn!(job = %self.shared.name, error = %err, "executor rejected submission");
            // Fail safe so the next trigger can re-arm. A trigger that raced
            // the failed submission promised a run; its accumulated delay is
            // re-armed as if a run had just completed.
            let mut phase = self.lock_phase();
            match *phase {
                Phase::Running { rearm: None } => self.set_phase(&mut phase, Phase::Idle),
                Phase::Running { rearm: Some(delay) } => self.rearm_or_idle(&mut phase, delay),
                Phase::Terminating => {
                    self.set_phase(&mut phase, Phase::Terminated);
                    self.shared.terminated.notify_all();
                }
                _ => {}
            }
        }
    }

    /// Bootstrap task: run the work body, then complete the post-run
    /// transition
    fn run_work(&self) {
        self.shared
            .stats
            .lock()
            .expect("stats mutex poisoned")
            .record_started();

        let work = Arc::clone(&self.shared.work);
        let token = self.shared.token.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&token)));
        if let Err(payload) = &outcome {
            tracing::error!(
                job = %self.shared.name,
                error = %panic_message(payload),
                "background job failed"
            );
        }

        self.shared
            .stats
            .lock()
            .expect("stats mutex poisoned")
            .record_finished(outcome.is_err());

        let mut phase = self.lock_phase();
        match *phase {
            Phase::Running { rearm: None } => {
                self.set_phase(&mut phase, Phase::Idle);
            }
            Phase::Running { rearm: Some(delay) } => {
                self.rearm_or_idle(&mut phase, delay);
            }
            Phase::Terminating => {
                self.set_phase(&mut phase, Phase::Terminated);
                self.shared.terminated.notify_all();
            }
            state => {
                debug_assert!(false, "work completed in state {:?}", state);
            }
        }
    }
}

impl BackgroundJob for DelayedJob {
    fn trigger_execution(&self) {
        DelayedJob::trigger_execution(self);
    }

    fn trigger_execution_after(&self, delay: Duration) {
        DelayedJob::trigger_execution_after(self, delay);
    }

    fn terminate(&self) {
        DelayedJob::terminate(self);
    }

    fn wait_for_termination(&self, timeout: Duration) {
        DelayedJob::wait_for_termination(self, timeout);
    }

    fn is_terminated(&self) -> bool {
        DelayedJob::is_terminated(self)
    }

    fn state(&self) -> JobState {
        DelayedJob::state(self)
    }
}

impl std::fmt::Debug for DelayedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedJob")
            .field("name", &self.shared.name)
            .field("default_delay", &self.shared.default_delay)
            .field("state", &self.state())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
