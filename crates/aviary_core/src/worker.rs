//! # Periodic Worker
//!
//! A named background thread that runs a callback, waits a fixed interval,
//! and repeats. It can be paused, resumed and stopped from any thread.
//!
//! ## Architecture
//!
//! ```text
//!   pause() ──┐
//!   resume() ─┼──> [control channel] ──> worker thread
//!   stop() ───┘                            loop {
//!                                            tick()
//!                                            wait interval, or
//!                                              Pause  -> block until Resume | Stop
//!                                              Resume -> ignored while running
//!                                              Stop   -> exit
//!                                          }
//! ```
//!
//! Every control message wakes the wait, so `stop()` also terminates a
//! paused worker. `resume()` starts the next tick immediately.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::{TickError, WorkerError};

/// Lifecycle of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, thread not spawned yet.
    Idle,
    /// Ticking.
    Running,
    /// Suspended until resumed or stopped.
    Paused,
    /// Terminated. Final.
    Stopped,
}

/// Advisory scheduling priority.
///
/// Std threads expose no portable priority control, so the hint is
/// recorded and reported but does not change scheduling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchedulingHint {
    /// Background work.
    Low,
    /// Default.
    #[default]
    Normal,
    /// Latency sensitive work.
    High,
}

/// Callback run once per tick.
pub type TickFn = Box<dyn FnMut() -> Result<(), TickError> + Send + 'static>;

enum Control {
    Pause,
    Resume,
    Stop,
}

/// State shared between the handle and the worker thread.
struct Shared {
    state: Mutex<WorkerState>,
    changed: Condvar,
    ticks: AtomicU64,
    failures: AtomicU64,
    hint: Mutex<SchedulingHint>,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
        self.changed.notify_all();
    }
}

/// A pausable, stoppable periodic task.
pub struct PeriodicWorker {
    name: String,
    interval: Duration,
    tick: Option<TickFn>,
    control_tx: Sender<Control>,
    control_rx: Option<Receiver<Control>>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicWorker {
    /// Creates an idle worker.
    pub fn new<F>(name: impl Into<String>, interval: Duration, tick: F) -> Self
    where
        F: FnMut() -> Result<(), TickError> + Send + 'static,
    {
        let (control_tx, control_rx) = unbounded();
        Self {
            name: name.into(),
            interval,
            tick: Some(Box::new(tick)),
            control_tx,
            control_rx: Some(control_rx),
            shared: Arc::new(Shared {
                state: Mutex::new(WorkerState::Idle),
                changed: Condvar::new(),
                ticks: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                hint: Mutex::new(SchedulingHint::Normal),
            }),
            handle: None,
        }
    }

    /// Spawns the worker thread. The first tick runs immediately.
    ///
    /// # Errors
    ///
    /// Fails if the worker is not idle or the thread cannot be spawned.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                WorkerState::Idle => *state = WorkerState::Running,
                WorkerState::Stopped => return Err(WorkerError::AlreadyStopped(self.name.clone())),
                WorkerState::Running | WorkerState::Paused => {
                    return Err(WorkerError::AlreadyStarted(self.name.clone()))
                }
            }
        }

        let (Some(tick), Some(control_rx)) = (self.tick.take(), self.control_rx.take()) else {
            self.shared.set_state(WorkerState::Stopped);
            return Err(WorkerError::AlreadyStarted(self.name.clone()));
        };

        let name = self.name.clone();
        let interval = self.interval;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_loop(&name, interval, tick, &control_rx, &shared));

        match spawned {
            Ok(handle) => {
                tracing::info!(worker = %self.name, interval_ms = interval.as_millis(), "worker started");
                self.handle = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.set_state(WorkerState::Stopped);
                Err(WorkerError::Spawn(err))
            }
        }
    }

    /// Suspends the worker after its current tick. Idempotent.
    pub fn pause(&self) {
        let _ = self.control_tx.send(Control::Pause);
    }

    /// Wakes a paused worker; its next tick runs immediately.
    pub fn resume(&self) {
        let _ = self.control_tx.send(Control::Resume);
    }

    /// Terminates the worker, waking it if paused. Does not wait.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == WorkerState::Idle {
                *state = WorkerState::Stopped;
                self.shared.changed.notify_all();
                return;
            }
        }
        let _ = self.control_tx.send(Control::Stop);
    }

    /// Waits for the worker thread to exit.
    ///
    /// Returns immediately if the thread was never started.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(worker = %self.name, "worker thread panicked");
                self.shared.set_state(WorkerState::Stopped);
            }
        }
    }

    /// Records an advisory scheduling priority.
    pub fn set_scheduling_hint(&self, hint: SchedulingHint) {
        *self.shared.hint.lock() = hint;
        tracing::debug!(worker = %self.name, ?hint, "scheduling hint recorded (advisory)");
    }

    /// Latest scheduling hint.
    #[must_use]
    pub fn scheduling_hint(&self) -> SchedulingHint {
        *self.shared.hint.lock()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock()
    }

    /// Blocks until the worker reaches `target` or `timeout` elapses.
    ///
    /// Returns true if `target` was reached.
    pub fn wait_for_state(&self, target: WorkerState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while *state != target {
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return *state == target;
            }
        }
        true
    }

    /// Number of completed ticks, failed ones included.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    /// Number of ticks whose callback returned an error.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.shared.failures.load(Ordering::Acquire)
    }

    /// Worker name, also used as the thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait between ticks.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for PeriodicWorker {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

impl std::fmt::Debug for PeriodicWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicWorker")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("state", &self.state())
            .field("ticks", &self.ticks())
            .finish_non_exhaustive()
    }
}

/// Worker thread main loop.
fn run_loop(
    name: &str,
    interval: Duration,
    mut tick: TickFn,
    control: &Receiver<Control>,
    shared: &Shared,
) {
    'ticking: loop {
        match panic::catch_unwind(AssertUnwindSafe(&mut tick)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                shared.failures.fetch_add(1, Ordering::AcqRel);
                tracing::warn!(worker = %name, error = %err, "tick failed, continuing");
            }
            Err(payload) => {
                shared.failures.fetch_add(1, Ordering::AcqRel);
                tracing::warn!(
                    worker = %name,
                    panic = panic_message(payload.as_ref()),
                    "tick panicked, continuing"
                );
            }
        }
        shared.ticks.fetch_add(1, Ordering::AcqRel);

        let deadline = Instant::now() + interval;
        loop {
            match control.recv_deadline(deadline) {
                Err(RecvTimeoutError::Timeout) => break,
                Ok(Control::Resume) => {}
                Ok(Control::Pause) => {
                    if wait_while_paused(name, control, shared) {
                        break;
                    }
                    break 'ticking;
                }
                Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break 'ticking,
            }
        }
    }

    shared.set_state(WorkerState::Stopped);
    tracing::info!(worker = %name, "worker stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Blocks until resumed (true) or stopped (false).
fn wait_while_paused(name: &str, control: &Receiver<Control>, shared: &Shared) -> bool {
    shared.set_state(WorkerState::Paused);
    tracing::debug!(worker = %name, "worker paused");
    loop {
        match control.recv() {
            Ok(Control::Pause) => {}
            Ok(Control::Resume) => {
                shared.set_state(WorkerState::Running);
                tracing::debug!(worker = %name, "worker resumed");
                return true;
            }
            Ok(Control::Stop) | Err(_) => return false,
        }
    }
}
