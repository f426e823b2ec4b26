//! Background decay processor.
//!
//! States: Stopped -> Running -> Stopped. `start` and `stop` are idempotent
//! and the processor can be restarted any number of times. While running, a
//! dedicated thread wakes every `decay_interval` and decays each active field
//! by the real time elapsed since its previous tick.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::ModulatorConfig;
use crate::error::{ModulatorError, Result};
use crate::field::FieldSet;

/// Aggregate outcome of decaying every active field once.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickReport {
    /// Fields decayed successfully.
    pub fields: usize,
    /// Sites pruned as negligible.
    pub pruned: usize,
    /// Corrupted sites removed.
    pub corrupted: usize,
    /// Fields whose decay failed.
    pub failures: usize,
}

/// Decay every active field by `elapsed`.
///
/// Each field is isolated: a failure in one is logged and counted, and the
/// remaining fields are still decayed.
pub fn decay_fields(fields: &FieldSet, elapsed: Duration) -> TickReport {
    let mut report = TickReport::default();
    for field in fields.active() {
        match panic::catch_unwind(AssertUnwindSafe(|| field.decay(elapsed))) {
            Ok(decayed) => {
                report.fields += 1;
                report.pruned += decayed.pruned;
                report.corrupted += decayed.corrupted;
            }
            Err(_) => {
                report.failures += 1;
                error!(ligand = %field.ligand(), "Decay failed for field");
            }
        }
    }
    report
}

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn raise(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    /// Sleep up to `interval`. Returns true once stop has been raised.
    fn wait(&self, interval: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.wake.wait_for(&mut stopped, interval);
        }
        *stopped
    }
}

struct Worker {
    signal: Arc<StopSignal>,
    handle: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    failures: AtomicU64,
    pruned: AtomicU64,
}

/// Time-driven decay loop over a [`FieldSet`].
pub struct BackgroundProcessor {
    fields: Arc<FieldSet>,
    interval: Duration,
    grace: Duration,
    worker: Mutex<Option<Worker>>,
    counters: Arc<Counters>,
}

impl BackgroundProcessor {
    pub fn new(fields: Arc<FieldSet>, config: &ModulatorConfig) -> Self {
        Self {
            fields,
            interval: config.decay_interval,
            grace: config.stop_grace,
            worker: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Start the decay loop. No-op when already running.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            debug!("Decay processor already running");
            return Ok(());
        }

        let signal = Arc::new(StopSignal::default());
        let (done_tx, done) = mpsc::channel();
        let fields = Arc::clone(&self.fields);
        let counters = Arc::clone(&self.counters);
        let thread_signal = Arc::clone(&signal);
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("ligand-decay".into())
            .spawn(move || {
                run(&fields, &thread_signal, interval, &counters);
                let _ = done_tx.send(());
            })
            .map_err(|e| {
                error!(error = %e, "Failed to spawn decay thread");
                ModulatorError::ResourceExhausted {
                    resource: "decay thread",
                    limit: 1,
                }
            })?;

        *worker = Some(Worker {
            signal,
            handle,
            done,
        });
        info!(interval_ms = interval.as_millis() as u64, "Decay processor started");
        Ok(())
    }

    /// Stop the decay loop. No-op when already stopped.
    ///
    /// Waits at most the configured grace period for the loop to exit. The
    /// control lock is released before waiting, so an in-flight tick never
    /// blocks a concurrent `start` or `stop`.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        worker.signal.raise();

        match worker.done.recv_timeout(self.grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    warn!("Decay thread panicked");
                }
                info!("Decay processor stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    grace_ms = self.grace.as_millis() as u64,
                    "Decay thread did not stop within grace period, detaching"
                );
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Ticks completed across every run.
    pub fn tick_count(&self) -> u64 {
        self.counters.ticks.load(Ordering::Relaxed)
    }

    /// Field decays that failed across every run.
    pub fn failure_count(&self) -> u64 {
        self.counters.failures.load(Ordering::Relaxed)
    }

    /// Sites pruned by background ticks.
    pub fn pruned_count(&self) -> u64 {
        self.counters.pruned.load(Ordering::Relaxed)
    }
}

impl Drop for BackgroundProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(fields: &FieldSet, signal: &StopSignal, interval: Duration, counters: &Counters) {
    let mut last = Instant::now();
    while !signal.wait(interval) {
        let now = Instant::now();
        let report = decay_fields(fields, now.duration_since(last));
        last = now;

        counters.ticks.fetch_add(1, Ordering::Relaxed);
        counters
            .pruned
            .fetch_add(report.pruned as u64, Ordering::Relaxed);
        if report.failures > 0 {
            counters
                .failures
                .fetch_add(report.failures as u64, Ordering::Relaxed);
        }
    }
    debug!("Decay loop exited");
}
