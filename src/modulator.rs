//! Chemical Modulator - the release / query facade
//!
//! Validates input, resolves source positions, gates releases through the
//! rate limiter, deposits into the ligand's field, notifies binding targets
//! and reports to the optional observer. Owns the decay lifecycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::binding::{BindingTarget, BindingTargetRegistry};
use crate::config::ModulatorConfig;
use crate::error::{ModulatorError, Result};
use crate::field::{ConcentrationField, FieldSet};
use crate::ligand::LigandType;
use crate::limiter::ReleaseRateLimiter;
use crate::observer::{ChemicalEvent, ChemicalObserver, EventDispatcher};
use crate::position::{ComponentId, Position, PositionResolver};
use crate::processor::{decay_fields, BackgroundProcessor, TickReport};

/// Receipt for one accepted release.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReleaseEvent {
    pub ligand: LigandType,
    pub source: ComponentId,
    /// Position the source resolved to.
    pub position: Position,
    /// Amount deposited.
    pub amount: f32,
    pub timestamp: Instant,
    /// Binding targets notified.
    pub bindings: usize,
}

/// Point-in-time counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModulatorStats {
    pub releases: u64,
    pub rate_limited: u64,
    /// Releases refused for any reason other than rate limiting.
    pub rejected: u64,
    pub queries: u64,
    pub bindings: u64,
    pub events_emitted: u64,
    pub events_dropped: u64,
    pub decay_ticks: u64,
    pub decay_failures: u64,
    pub active_fields: usize,
    pub registered_targets: usize,
    pub tracked_rate_pairs: usize,
}

#[derive(Debug, Default)]
struct Counters {
    releases: AtomicU64,
    rate_limited: AtomicU64,
    rejected: AtomicU64,
    queries: AtomicU64,
    bindings: AtomicU64,
    /// Failures from manual decay; the processor counts its own.
    decay_failures: AtomicU64,
}

/// Facade over the concentration fields, rate limiter, binding registry and
/// decay processor.
///
/// Release and query are valid in every lifecycle state; only decay
/// progression depends on [`start`](Self::start).
pub struct ChemicalModulator {
    config: ModulatorConfig,
    fields: Arc<FieldSet>,
    limiter: ReleaseRateLimiter,
    registry: BindingTargetRegistry,
    processor: BackgroundProcessor,
    resolver: Arc<dyn PositionResolver>,
    events: Option<EventDispatcher>,
    started: AtomicBool,
    counters: Counters,
}

impl ChemicalModulator {
    /// Create a modulator without an observer.
    pub fn new(config: ModulatorConfig, resolver: Arc<dyn PositionResolver>) -> Result<Self> {
        Self::build(config, resolver, None)
    }

    /// Create a modulator reporting to `observer` through a bounded queue.
    pub fn with_observer(
        config: ModulatorConfig,
        resolver: Arc<dyn PositionResolver>,
        observer: Arc<dyn ChemicalObserver>,
    ) -> Result<Self> {
        Self::build(config, resolver, Some(observer))
    }

    fn build(
        config: ModulatorConfig,
        resolver: Arc<dyn PositionResolver>,
        observer: Option<Arc<dyn ChemicalObserver>>,
    ) -> Result<Self> {
        config.validate()?;

        let fields = Arc::new(FieldSet::new(&config));
        let events = match observer {
            Some(observer) => Some(EventDispatcher::spawn(
                observer,
                config.event_queue_capacity,
            )?),
            None => None,
        };

        Ok(Self {
            limiter: ReleaseRateLimiter::new(&config),
            registry: BindingTargetRegistry::new(&config),
            processor: BackgroundProcessor::new(Arc::clone(&fields), &config),
            fields,
            resolver,
            events,
            started: AtomicBool::new(false),
            counters: Counters::default(),
            config,
        })
    }

    // =========================================================================
    // RELEASE
    // =========================================================================

    /// Release `concentration` of `ligand` at the position of `source`.
    ///
    /// # Errors
    ///
    /// - [`ModulatorError::InvalidConcentration`] for non-finite, negative or zero amounts
    /// - [`ModulatorError::UnknownSource`] when the source has no finite position
    /// - [`ModulatorError::RateExceeded`] when the source releases too often (non-fatal)
    /// - [`ModulatorError::ResourceExhausted`] when a capacity ceiling is reached
    pub fn release(
        &self,
        ligand: LigandType,
        source: ComponentId,
        concentration: f32,
    ) -> Result<ReleaseEvent> {
        let outcome = self.try_release(ligand, source, concentration);
        match &outcome {
            Ok(_) => self.counters.releases.fetch_add(1, Ordering::Relaxed),
            Err(e) if e.is_rate_limited() => {
                self.counters.rate_limited.fetch_add(1, Ordering::Relaxed)
            }
            Err(_) => self.counters.rejected.fetch_add(1, Ordering::Relaxed),
        };
        outcome
    }

    /// Release by ligand name.
    ///
    /// # Errors
    ///
    /// [`ModulatorError::InvalidLigand`] for unrecognized names, otherwise as
    /// [`release`](Self::release).
    pub fn release_named(
        &self,
        ligand: &str,
        source: ComponentId,
        concentration: f32,
    ) -> Result<ReleaseEvent> {
        match ligand.parse::<LigandType>() {
            Ok(ligand) => self.release(ligand, source, concentration),
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn try_release(
        &self,
        ligand: LigandType,
        source: ComponentId,
        concentration: f32,
    ) -> Result<ReleaseEvent> {
        if !concentration.is_finite() || concentration <= 0.0 {
            return Err(ModulatorError::InvalidConcentration {
                ligand,
                value: concentration,
            });
        }

        let position = self
            .resolver
            .position_of(source)
            .filter(Position::is_finite)
            .ok_or(ModulatorError::UnknownSource(source))?;

        // Refuse for capacity before a rate token is spent. A racing release
        // can still fill the last site, in which case deposit reports it.
        let field = self.fields.get_or_create(ligand);
        if !field.has_room(&position) {
            return Err(ModulatorError::ResourceExhausted {
                resource: "field sites",
                limit: self.config.max_sites_per_field,
            });
        }

        let now = Instant::now();
        if let Err(e) = self.limiter.check(source, ligand, now) {
            debug!(%ligand, %source, error = %e, "Release refused by rate limiter");
            return Err(e);
        }

        field.deposit(position, concentration)?;

        let bindings = self
            .registry
            .snapshot(ligand)
            .deliver(position, concentration);
        self.counters
            .bindings
            .fetch_add(bindings.len() as u64, Ordering::Relaxed);

        if let Some(events) = &self.events {
            events.emit(ChemicalEvent::Released {
                ligand,
                source,
                concentration,
                position,
            });
            for binding in &bindings {
                events.emit(ChemicalEvent::Bound {
                    ligand,
                    target: binding.target,
                    concentration: binding.concentration,
                    position,
                });
            }
        }

        debug!(
            %ligand,
            %source,
            %position,
            concentration,
            bindings = bindings.len(),
            "Ligand released"
        );
        Ok(ReleaseEvent {
            ligand,
            source,
            position,
            amount: concentration,
            timestamp: now,
            bindings: bindings.len(),
        })
    }

    // =========================================================================
    // QUERY
    // =========================================================================

    /// Concentration of `ligand` at `position`. Always finite and non-negative.
    pub fn concentration(&self, ligand: LigandType, position: Position) -> f32 {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        self.fields
            .get(ligand)
            .map_or(0.0, |field| field.query(position))
    }

    /// Concentration by ligand name. Unrecognized names read as zero.
    pub fn concentration_named(&self, ligand: &str, position: Position) -> f32 {
        match ligand.parse::<LigandType>() {
            Ok(ligand) => self.concentration(ligand, position),
            Err(_) => {
                debug!(ligand, "Concentration query for unrecognized ligand");
                0.0
            }
        }
    }

    /// Field for `ligand`, if any release has created it.
    pub fn field(&self, ligand: LigandType) -> Option<&ConcentrationField> {
        self.fields.get(ligand)
    }

    // =========================================================================
    // BINDING TARGETS
    // =========================================================================

    /// Register a binding target. Re-registering an identity replaces it.
    pub fn register_target(&self, target: &Arc<dyn BindingTarget>) -> Result<()> {
        self.registry.register(target)
    }

    /// Unregister a binding target. Unknown identities are a no-op.
    ///
    /// Returns whether the target was registered.
    pub fn unregister_target(&self, id: ComponentId) -> bool {
        self.registry.unregister(id)
    }

    pub fn registry(&self) -> &BindingTargetRegistry {
        &self.registry
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Start background decay. No-op when already started.
    pub fn start(&self) -> Result<()> {
        self.processor.start()?;
        if !self.started.swap(true, Ordering::AcqRel) {
            info!("Chemical modulator started");
        }
        Ok(())
    }

    /// Stop background decay. No-op when already stopped.
    pub fn stop(&self) {
        self.processor.stop();
        if self.started.swap(false, Ordering::AcqRel) {
            info!("Chemical modulator stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Decay every field by `elapsed` now, independent of the background loop.
    pub fn decay_now(&self, elapsed: Duration) -> TickReport {
        let report = decay_fields(&self.fields, elapsed);
        if report.failures > 0 {
            self.counters
                .decay_failures
                .fetch_add(report.failures as u64, Ordering::Relaxed);
        }
        report
    }

    /// Forget all release history.
    pub fn reset_rate_limits(&self) {
        self.limiter.reset();
    }

    // =========================================================================
    // METRICS
    // =========================================================================

    pub fn config(&self) -> &ModulatorConfig {
        &self.config
    }

    pub fn stats(&self) -> ModulatorStats {
        let (events_emitted, events_dropped) = self
            .events
            .as_ref()
            .map_or((0, 0), |e| (e.emitted(), e.dropped()));

        ModulatorStats {
            releases: self.counters.releases.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            queries: self.counters.queries.load(Ordering::Relaxed),
            bindings: self.counters.bindings.load(Ordering::Relaxed),
            events_emitted,
            events_dropped,
            decay_ticks: self.processor.tick_count(),
            decay_failures: self.processor.failure_count()
                + self.counters.decay_failures.load(Ordering::Relaxed),
            active_fields: self.fields.active_count(),
            registered_targets: self.registry.len(),
            tracked_rate_pairs: self.limiter.tracked_pairs(),
        }
    }
}

impl Drop for ChemicalModulator {
    fn drop(&mut self) {
        self.stop();
    }
}
