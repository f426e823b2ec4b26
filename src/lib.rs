//! Chemical Field - ligand release, decay and binding for spatial simulations
//!
//! A source releases a ligand at its position. The ligand's concentration
//! spreads over a bounded range, halves every half-life and is eventually
//! pruned. Binding targets carrying a matching receptor are notified when a
//! release lands within range.
//!
//! # Core Types
//!
//! - **LigandType**: fixed set of transmitters and neuromodulators with static kinetics
//! - **ConcentrationField**: decaying spatial store of one ligand
//! - **ReleaseRateLimiter**: per (source, ligand) frequency gate
//! - **BindingTargetRegistry**: non-owning registry of receptor-bearing targets
//! - **BackgroundProcessor**: time-driven decay loop
//! - **ChemicalModulator**: the facade tying them together
//!
//! # Architecture: Sources / Field / Targets
//!
//! 1. **Sources** - components that release ligands at their resolved position
//! 2. **Field** - one concentration store per ligand, decaying over time
//! 3. **Targets** - BindingTargets notified when a compatible ligand lands nearby
//!
//! Each field has its own lock, the rate limiter is sharded by key and the
//! registry lock is only held to snapshot targets. Unrelated ligands never
//! contend, and the decay loop never holds more than one field lock.
//!
//! # Fast vs Slow
//!
//! Glutamate and GABA reach about two units and fade within milliseconds.
//! Neuromodulators reach tens of units and linger for hundreds of
//! milliseconds to seconds. Both use the same field with different constants.
//!
//! # Example: Synaptic Release
//!
//! ```rust
//! use chemical_field::{
//!     BindingTarget, ChemicalModulator, ComponentId, LigandType, ModulatorConfig, Position,
//!     PositionTable, ReceptorSet,
//! };
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! // A dendrite listening for glutamate.
//! struct Dendrite {
//!     hits: AtomicUsize,
//! }
//!
//! impl BindingTarget for Dendrite {
//!     fn id(&self) -> ComponentId {
//!         ComponentId(2)
//!     }
//!     fn position(&self) -> Position {
//!         Position::new(0.5, 0.0, 0.0)
//!     }
//!     fn receptors(&self) -> ReceptorSet {
//!         ReceptorSet::empty().with(LigandType::Glutamate)
//!     }
//!     fn notify(&self, _ligand: LigandType, _concentration: f32, _position: Position) {
//!         self.hits.fetch_add(1, Ordering::Relaxed);
//!     }
//! }
//!
//! // 1. Positions come from the embedding simulation
//! let positions = Arc::new(PositionTable::new());
//! positions.place(ComponentId(1), Position::ORIGIN);
//!
//! // 2. Build the modulator
//! let modulator = ChemicalModulator::new(ModulatorConfig::default(), positions).unwrap();
//!
//! // 3. Register a target (the registry never owns it)
//! let dendrite = Arc::new(Dendrite { hits: AtomicUsize::new(0) });
//! let target: Arc<dyn BindingTarget> = dendrite.clone();
//! modulator.register_target(&target).unwrap();
//!
//! // 4. Release from the presynaptic source
//! modulator.release(LigandType::Glutamate, ComponentId(1), 1.0).unwrap();
//! assert_eq!(dendrite.hits.load(Ordering::Relaxed), 1);
//!
//! // 5. Read the field
//! assert!(modulator.concentration(LigandType::Glutamate, Position::ORIGIN) > 0.0);
//! assert_eq!(
//!     modulator.concentration(LigandType::Glutamate, Position::new(1000.0, 0.0, 0.0)),
//!     0.0
//! );
//!
//! // 6. Time advances - decay happens in the background once started
//! modulator.start().unwrap();
//! modulator.stop();
//! ```
//!
//! # Key Insight
//!
//! The field doesn't know what a synapse is. It only records where a ligand
//! was released and how much of it is left. Binding emerges from proximity.

mod binding;
mod config;
mod error;
mod field;
mod ligand;
mod limiter;
mod modulator;
mod observer;
mod position;
mod processor;

pub use binding::{Binding, BindingTarget, BindingTargetRegistry, TargetSnapshot};
pub use config::{ModulatorConfig, MIN_CELL_SIZE_FRACTION};
pub use error::{ConfigError, ModulatorError, Result};
pub use field::{ConcentrationField, DecayReport, FieldSet};
pub use ligand::{LigandKinetics, LigandType, ReceptorSet};
pub use limiter::ReleaseRateLimiter;
pub use modulator::{ChemicalModulator, ModulatorStats, ReleaseEvent};
pub use observer::{ChannelObserver, ChemicalEvent, ChemicalObserver, EventDispatcher, FnObserver};
pub use position::{ComponentId, FnResolver, Position, PositionResolver, PositionTable, WORLD_LIMIT};
pub use processor::{decay_fields, BackgroundProcessor, TickReport};
