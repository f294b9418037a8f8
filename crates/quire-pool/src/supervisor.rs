//! Supervised periodic maintenance task.
//!
//! The supervisor owns one recurring tokio task at a time. Every `period` the
//! task runs one [`MaintenanceJob`] pass on the blocking pool. A pass that
//! returns a [`MaintenanceFault`] or panics is logged and counted; a clean
//! pass resets the count.
//!
//! ```text
//!            tick                 pass ok
//!   Idle ───────────► Running ───────────► Idle
//!    ▲                   │
//!    │                   │ fault / panic
//!    │                   ▼
//!    └──────────────── Faulted ──(count > MAX)──► Restarting ──► Idle (generation n+1)
//! ```
//!
//! When the consecutive-failure count exceeds
//! [`MAX_CONSECUTIVE_FAILURES`], the current generation is cancelled and a
//! new one is spawned on a fresh schedule. Cancellation goes through a
//! [`CancellationToken`] per generation, so a wedged generation can never
//! keep ticking next to its replacement.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use strum::Display;
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::MAX_CONSECUTIVE_FAILURES;
use crate::error::{MaintenanceFault, PoolError};

/// One unit of recurring background work.
///
/// Passes run on tokio's blocking pool and may do disk I/O. The returned
/// count is only used for logging.
pub trait MaintenanceJob: Send + Sync + 'static {
    fn run_pass(&self) -> Result<usize, MaintenanceFault>;
}

/// Where the current generation is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TaskState {
    /// Waiting for the next tick.
    Idle,
    /// Executing a pass.
    Running,
    /// The last pass failed.
    Faulted,
    /// Replacing the current generation.
    Restarting,
    /// Shut down for good.
    Stopped,
}

/// Point-in-time view of the supervisor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaintenanceStats {
    pub state: TaskState,
    /// Starts at 1, bumped by every restart.
    pub generation: u64,
    pub consecutive_failures: u32,
    pub restarts: u64,
    pub passes: u64,
    pub faults: u64,
}

struct Control {
    state: TaskState,
    generation: u64,
    cancel: CancellationToken,
}

struct SupervisorInner {
    name: String,
    period: Duration,
    threshold: u32,
    job: Arc<dyn MaintenanceJob>,
    runtime: Handle,
    control: Mutex<Control>,
    consecutive_failures: AtomicU32,
    restarts: AtomicU64,
    passes: AtomicU64,
    faults: AtomicU64,
}

/// Owns and restarts the recurring maintenance task.
///
/// Dropping the supervisor shuts the task down.
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Start ticking `job` every `period` on the current tokio runtime.
    ///
    /// The first pass runs one full period after start.
    pub fn start(
        name: impl Into<String>,
        period: Duration,
        job: Arc<dyn MaintenanceJob>,
    ) -> Result<Self, PoolError> {
        Self::start_with_threshold(name, period, MAX_CONSECUTIVE_FAILURES, job)
    }

    pub(crate) fn start_with_threshold(
        name: impl Into<String>,
        period: Duration,
        threshold: u32,
        job: Arc<dyn MaintenanceJob>,
    ) -> Result<Self, PoolError> {
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        if period.is_zero() {
            return Err(PoolError::Config("maintenance period must be positive".into()));
        }
        let inner = Arc::new(SupervisorInner {
            name: name.into(),
            period,
            threshold,
            job,
            runtime,
            control: Mutex::new(Control {
                state: TaskState::Idle,
                generation: 0,
                cancel: CancellationToken::new(),
            }),
            consecutive_failures: AtomicU32::new(0),
            restarts: AtomicU64::new(0),
            passes: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        });
        {
            let mut control = inner.control.lock();
            SupervisorInner::spawn_generation(&inner, &mut control);
        }
        info!(task = %inner.name, period_ms = period.as_millis() as u64, "Started maintenance task");
        Ok(Self { inner })
    }

    pub fn state(&self) -> TaskState {
        self.inner.control.lock().state
    }

    pub fn stats(&self) -> MaintenanceStats {
        let control = self.inner.control.lock();
        MaintenanceStats {
            state: control.state,
            generation: control.generation,
            consecutive_failures: self.inner.consecutive_failures.load(Ordering::SeqCst),
            restarts: self.inner.restarts.load(Ordering::SeqCst),
            passes: self.inner.passes.load(Ordering::SeqCst),
            faults: self.inner.faults.load(Ordering::SeqCst),
        }
    }

    /// Cancel the task. No pass starts and no restart happens afterwards;
    /// a pass already running finishes on its own.
    pub fn shutdown(&self) {
        let mut control = self.inner.control.lock();
        if control.state == TaskState::Stopped {
            return;
        }
        control.state = TaskState::Stopped;
        control.cancel.cancel();
        info!(task = %self.inner.name, generation = control.generation, "Stopped maintenance task");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SupervisorInner {
    /// Spawn the next generation. Caller holds the control lock.
    fn spawn_generation(inner: &Arc<Self>, control: &mut Control) {
        control.generation += 1;
        control.cancel = CancellationToken::new();
        control.state = TaskState::Idle;
        let task = run_generation(Arc::clone(inner), control.cancel.clone(), control.generation);
        inner.runtime.spawn(task);
    }

    /// Set the state if `generation` is still the live one.
    fn transition(&self, generation: u64, state: TaskState) -> bool {
        let mut control = self.control.lock();
        if control.generation != generation || control.state == TaskState::Stopped {
            return false;
        }
        control.state = state;
        true
    }

    fn restart(self: &Arc<Self>, generation: u64) {
        let mut control = self.control.lock();
        if control.generation != generation || control.state == TaskState::Stopped {
            return;
        }
        warn!(
            task = %self.name,
            generation,
            "Restarting the maintenance task; idle documents were not being evicted"
        );
        control.state = TaskState::Restarting;
        control.cancel.cancel();
        warn!(task = %self.name, generation, "... abandoning maintenance task generation");

        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Self::spawn_generation(self, &mut control);
    }

    fn record(&self, generation: u64, outcome: Result<usize, MaintenanceFault>) -> u32 {
        self.passes.fetch_add(1, Ordering::SeqCst);
        match outcome {
            Ok(processed) => {
                if processed > 0 {
                    debug!(task = %self.name, processed, "Maintenance pass finished");
                }
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.transition(generation, TaskState::Idle);
                0
            }
            Err(fault) => {
                self.faults.fetch_add(1, Ordering::SeqCst);
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                error!(
                    task = %self.name,
                    generation,
                    failures,
                    error = %fault,
                    "Fault caught during maintenance pass"
                );
                self.transition(generation, TaskState::Faulted);
                failures
            }
        }
    }
}

async fn run_generation(inner: Arc<SupervisorInner>, cancel: CancellationToken, generation: u64) {
    let mut ticker = tokio::time::interval_at(Instant::now() + inner.period, inner.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(task = %inner.name, generation, "Maintenance generation cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }
        if !inner.transition(generation, TaskState::Running) {
            return;
        }

        let job = Arc::clone(&inner.job);
        let outcome = match tokio::task::spawn_blocking(move || job.run_pass()).await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(MaintenanceFault::Panicked(join_error.to_string())),
        };
        if cancel.is_cancelled() {
            return;
        }

        let failures = inner.record(generation, outcome);
        if failures > inner.threshold {
            inner.restart(generation);
            return;
        }
        if failures > 0 {
            inner.transition(generation, TaskState::Idle);
        }
    }
}
