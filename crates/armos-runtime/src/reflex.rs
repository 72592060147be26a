//! Reflex unit – the control thread.
//!
//! Runs [`TaskExecutor::tick`] on a dedicated OS thread at a fixed cadence
//! until the shared shutdown flag is raised, then drives the arm home and
//! releases the link.  Progress is published to a [`StatusBoard`] that other
//! threads (the operator console) can read without touching the executor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use armos_types::{ArmError, Task};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::cadence::{FpsMeter, LoopRate};
use crate::executor::TaskExecutor;

/// Default control cadence.
pub const DEFAULT_CONTROL_HZ: f64 = 20.0;

const REPORT_WINDOW: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Status board
// ─────────────────────────────────────────────────────────────────────────────

/// Latest externally visible state of the reflex unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflexStatus {
    pub task: Task,
    pub fps: f64,
    pub last_loop: Duration,
    pub ticks: u64,
    pub running: bool,
}

impl Default for ReflexStatus {
    fn default() -> Self {
        Self {
            task: Task::Stop,
            fps: 0.0,
            last_loop: Duration::ZERO,
            ticks: 0,
            running: false,
        }
    }
}

/// Shared, cheaply cloneable view of [`ReflexStatus`].
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<ReflexStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ReflexStatus {
        self.inner.lock().clone()
    }

    fn update(&self, f: impl FnOnce(&mut ReflexStatus)) {
        f(&mut self.inner.lock());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReflexUnit
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to the running control thread.
pub struct ReflexUnit {
    handle: JoinHandle<()>,
}

impl ReflexUnit {
    /// Start ticking `executor` at `control_hz` until `shutdown` is raised.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Io`] if the thread cannot be spawned.
    pub fn spawn(
        mut executor: TaskExecutor,
        control_hz: f64,
        shutdown: Arc<AtomicBool>,
        status: StatusBoard,
    ) -> Result<Self, ArmError> {
        let handle = std::thread::Builder::new()
            .name("reflex".to_string())
            .spawn(move || {
                let mut rate = LoopRate::from_hz(control_hz);
                let mut meter = FpsMeter::new(REPORT_WINDOW);
                info!(hz = control_hz, "reflex unit started");
                status.update(|s| s.running = true);

                while !shutdown.load(Ordering::Relaxed) {
                    let started = Instant::now();
                    let task = executor.tick().clone();
                    let loop_time = started.elapsed();

                    let report = meter.record(loop_time);
                    if let Some(r) = report {
                        info!(
                            state = task.label(),
                            loop_ms = r.last_loop.as_secs_f64() * 1000.0,
                            fps = r.fps,
                            "reflex loop"
                        );
                    }
                    status.update(|s| {
                        s.task = task;
                        s.last_loop = loop_time;
                        s.ticks += 1;
                        if let Some(r) = report {
                            s.fps = r.fps;
                        }
                    });

                    if rate.sleep() {
                        warn!(
                            loop_ms = loop_time.as_secs_f64() * 1000.0,
                            budget_ms = rate.period().as_secs_f64() * 1000.0,
                            "reflex cycle overran"
                        );
                    }
                }

                executor.shutdown();
                let final_task = executor.task().clone();
                status.update(|s| {
                    s.task = final_task;
                    s.running = false;
                });
                info!("reflex unit stopped");
            })?;
        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the control thread to finish its shutdown sequence.
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("reflex thread panicked");
        }
    }
}
