//! Observer pattern for chemical signaling - best-effort event delivery
//!
//! Successful releases and bindings are reported to an optional observer.
//! Events go through one bounded queue drained by a single worker thread:
//! emitting never blocks, and when the queue is full the event is dropped
//! and counted instead of growing the backlog.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{ModulatorError, Result};
use crate::ligand::LigandType;
use crate::position::{ComponentId, Position};

/// Event emitted after a successful release or binding
#[derive(Clone, Debug, PartialEq)]
pub enum ChemicalEvent {
    /// A source deposited a ligand
    Released {
        ligand: LigandType,
        source: ComponentId,
        concentration: f32,
        position: Position,
    },
    /// A binding target was notified of a nearby ligand
    Bound {
        ligand: LigandType,
        target: ComponentId,
        /// Concentration seen at the target
        concentration: f32,
        /// Release position
        position: Position,
    },
}

impl ChemicalEvent {
    pub fn ligand(&self) -> LigandType {
        match self {
            Self::Released { ligand, .. } | Self::Bound { ligand, .. } => *ligand,
        }
    }
}

/// Observer that receives chemical events
pub trait ChemicalObserver: Send + Sync {
    /// Called on the dispatcher thread for each event
    fn on_event(&self, event: ChemicalEvent);
}

/// Function-based observer for simple cases
pub struct FnObserver<F: Fn(ChemicalEvent) + Send + Sync>(pub F);

impl<F: Fn(ChemicalEvent) + Send + Sync> ChemicalObserver for FnObserver<F> {
    fn on_event(&self, event: ChemicalEvent) {
        (self.0)(event);
    }
}

/// Channel-based observer - sends events to a channel
pub struct ChannelObserver {
    sender: mpsc::Sender<ChemicalEvent>,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::Sender<ChemicalEvent>) -> Self {
        Self { sender }
    }
}

impl ChemicalObserver for ChannelObserver {
    fn on_event(&self, event: ChemicalEvent) {
        let _ = self.sender.send(event);
    }
}

/// Single bounded queue plus worker feeding one observer.
pub struct EventDispatcher {
    sender: Option<SyncSender<ChemicalEvent>>,
    worker: Option<JoinHandle<()>>,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl EventDispatcher {
    /// Spawn the worker draining a queue of `capacity` events into `observer`.
    pub fn spawn(observer: Arc<dyn ChemicalObserver>, capacity: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<ChemicalEvent>(capacity);

        let worker = thread::Builder::new()
            .name("chemical-events".into())
            .spawn(move || {
                for event in receiver {
                    let delivered =
                        panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
                    if delivered.is_err() {
                        warn!("Chemical observer panicked while handling an event");
                    }
                }
                debug!("Event dispatcher drained");
            })
            .map_err(|e| {
                warn!(error = %e, "Failed to spawn event dispatcher");
                ModulatorError::ResourceExhausted {
                    resource: "event dispatcher thread",
                    limit: 1,
                }
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Queue an event without blocking. Returns false if it was dropped.
    pub fn emit(&self, event: ChemicalEvent) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(event) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!(dropped, "Observer queue full, dropping chemical events");
                }
                false
            }
        }
    }

    /// Events accepted into the queue.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        // Closing the channel ends the worker once the backlog is delivered.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Event dispatcher worker panicked");
            }
        }
    }
}
