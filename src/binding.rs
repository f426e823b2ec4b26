//! Binding targets and notification dispatch.
//!
//! The registry never owns a target: it keeps a `Weak` reference keyed by
//! identity together with the receptor set captured at registration. Dispatch
//! snapshots the matching entries under a short read lock and notifies them
//! after the lock is released, so a target may unregister (or be dropped by
//! its owner) mid-dispatch without harm.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::ModulatorConfig;
use crate::error::{ModulatorError, Result};
use crate::ligand::{LigandType, ReceptorSet};
use crate::position::{ComponentId, Position};

/// An externally owned entity that can receive ligands.
pub trait BindingTarget: Send + Sync {
    /// Stable identity.
    fn id(&self) -> ComponentId;

    /// Current position. Read on every dispatch, so targets may move.
    fn position(&self) -> Position;

    /// Ligand types this target carries receptors for.
    ///
    /// Read once at registration. Re-register to change it.
    fn receptors(&self) -> ReceptorSet;

    /// Called when a compatible ligand is released within range.
    ///
    /// `concentration` is the amount seen at the target after distance
    /// falloff; `position` is where the release happened.
    fn notify(&self, ligand: LigandType, concentration: f32, position: Position);
}

#[derive(Clone)]
struct TargetEntry {
    target: Weak<dyn BindingTarget>,
    receptors: ReceptorSet,
}

/// A delivered notification.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Binding {
    pub target: ComponentId,
    pub ligand: LigandType,
    /// Concentration seen at the target.
    pub concentration: f32,
    /// Release position.
    pub position: Position,
}

/// Targets eligible for one ligand, captured at a single instant.
pub struct TargetSnapshot {
    ligand: LigandType,
    targets: Vec<(ComponentId, Weak<dyn BindingTarget>)>,
}

impl TargetSnapshot {
    pub fn ligand(&self) -> LigandType {
        self.ligand
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Notify every live target within range of `position`.
    ///
    /// A target that panics is skipped; delivery continues with the rest.
    pub fn deliver(&self, position: Position, concentration: f32) -> Vec<Binding> {
        let kinetics = self.ligand.kinetics();
        let mut bindings = Vec::new();

        for (id, weak) in &self.targets {
            let Some(target) = weak.upgrade() else {
                continue;
            };
            let at = target.position();
            if !at.is_finite() {
                debug!(target = %id, "Skipping target with non-finite position");
                continue;
            }
            let distance = at.distance(&position);
            if distance > kinetics.range as f64 {
                continue;
            }
            let local = concentration * kinetics.falloff(distance);

            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                target.notify(self.ligand, local, position)
            }));
            match delivered {
                Ok(()) => bindings.push(Binding {
                    target: *id,
                    ligand: self.ligand,
                    concentration: local,
                    position,
                }),
                Err(_) => warn!(
                    target = %id,
                    ligand = %self.ligand,
                    "Binding target panicked during notification"
                ),
            }
        }
        bindings
    }
}

/// Registry of receptor-bearing targets.
pub struct BindingTargetRegistry {
    targets: RwLock<HashMap<ComponentId, TargetEntry>>,
    max_targets: usize,
}

impl BindingTargetRegistry {
    pub fn new(config: &ModulatorConfig) -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
            max_targets: config.max_targets,
        }
    }

    /// Add or replace a target by identity.
    ///
    /// # Errors
    ///
    /// [`ModulatorError::ResourceExhausted`] when a new identity would exceed
    /// the configured ceiling after dropped targets are purged.
    pub fn register(&self, target: &Arc<dyn BindingTarget>) -> Result<()> {
        let id = target.id();
        let entry = TargetEntry {
            target: Arc::downgrade(target),
            receptors: target.receptors(),
        };

        let mut targets = self.targets.write();
        if !targets.contains_key(&id) && targets.len() >= self.max_targets {
            targets.retain(|_, e| e.target.strong_count() > 0);
            if targets.len() >= self.max_targets {
                return Err(ModulatorError::ResourceExhausted {
                    resource: "binding targets",
                    limit: self.max_targets,
                });
            }
        }
        targets.insert(id, entry);
        Ok(())
    }

    /// Remove a target. Absent identities are a no-op.
    ///
    /// Returns whether the target was registered.
    pub fn unregister(&self, id: ComponentId) -> bool {
        self.targets.write().remove(&id).is_some()
    }

    /// Capture the live targets carrying receptors for `ligand`.
    pub fn snapshot(&self, ligand: LigandType) -> TargetSnapshot {
        let targets = self
            .targets
            .read()
            .iter()
            .filter(|(_, e)| e.receptors.contains(ligand))
            .map(|(id, e)| (*id, e.target.clone()))
            .collect();
        TargetSnapshot { ligand, targets }
    }

    /// Notify matching targets within range of `position`. Returns the number notified.
    pub fn dispatch(&self, ligand: LigandType, position: Position, concentration: f32) -> usize {
        self.snapshot(ligand).deliver(position, concentration).len()
    }

    /// Remove entries whose target has been dropped by its owner.
    pub fn prune_dropped(&self) -> usize {
        let mut targets = self.targets.write();
        let before = targets.len();
        targets.retain(|_, e| e.target.strong_count() > 0);
        before - targets.len()
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.targets.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;

    /// Target that records every notification.
    pub(crate) struct RecordingTarget {
        pub id: ComponentId,
        pub position: Position,
        pub receptors: ReceptorSet,
        pub received: Mutex<Vec<(LigandType, f32)>>,
    }

    impl RecordingTarget {
        pub(crate) fn new(id: u64, position: Position, receptors: ReceptorSet) -> Arc<Self> {
            Arc::new(Self {
                id: ComponentId(id),
                position,
                receptors,
                received: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn count(&self) -> usize {
            self.received.lock().len()
        }
    }

    impl BindingTarget for RecordingTarget {
        fn id(&self) -> ComponentId {
            self.id
        }

        fn position(&self) -> Position {
            self.position
        }

        fn receptors(&self) -> ReceptorSet {
            self.receptors
        }

        fn notify(&self, ligand: LigandType, concentration: f32, _position: Position) {
            self.received.lock().push((ligand, concentration));
        }
    }

    struct PanickingTarget;

    impl BindingTarget for PanickingTarget {
        fn id(&self) -> ComponentId {
            ComponentId(666)
        }

        fn position(&self) -> Position {
            Position::ORIGIN
        }

        fn receptors(&self) -> ReceptorSet {
            ReceptorSet::all()
        }

        fn notify(&self, _: LigandType, _: f32, _: Position) {
            panic!("receptor malfunction");
        }
    }

    fn registry() -> BindingTargetRegistry {
        BindingTargetRegistry::new(&ModulatorConfig::default())
    }

    fn as_dyn(target: &Arc<RecordingTarget>) -> Arc<dyn BindingTarget> {
        target.clone()
    }

    #[test]
    fn test_register_and_dispatch() {
        let reg = registry();
        let near = RecordingTarget::new(1, Position::new(1.0, 0.0, 0.0), ReceptorSet::all());
        let far = RecordingTarget::new(2, Position::new(500.0, 0.0, 0.0), ReceptorSet::all());
        reg.register(&as_dyn(&near)).unwrap();
        reg.register(&as_dyn(&far)).unwrap();

        let notified = reg.dispatch(LigandType::Glutamate, Position::ORIGIN, 1.0);
        assert_eq!(notified, 1);
        assert_eq!(near.count(), 1);
        assert_eq!(far.count(), 0);

        let (ligand, local) = near.received.lock()[0];
        assert_eq!(ligand, LigandType::Glutamate);
        assert!(local > 0.0 && local < 1.0);
    }

    #[test]
    fn test_receptor_filtering() {
        let reg = registry();
        let gaba_only = RecordingTarget::new(
            1,
            Position::ORIGIN,
            ReceptorSet::empty().with(LigandType::Gaba),
        );
        reg.register(&as_dyn(&gaba_only)).unwrap();

        assert_eq!(reg.dispatch(LigandType::Glutamate, Position::ORIGIN, 1.0), 0);
        assert_eq!(reg.dispatch(LigandType::Gaba, Position::ORIGIN, 1.0), 1);
        assert_eq!(reg.snapshot(LigandType::Glutamate).len(), 0);
    }

    #[test]
    fn test_register_overwrites_by_identity() {
        let reg = registry();
        let first = RecordingTarget::new(7, Position::ORIGIN, ReceptorSet::all());
        let second = RecordingTarget::new(7, Position::ORIGIN, ReceptorSet::all());
        reg.register(&as_dyn(&first)).unwrap();
        reg.register(&as_dyn(&second)).unwrap();
        assert_eq!(reg.len(), 1);

        reg.dispatch(LigandType::Dopamine, Position::ORIGIN, 1.0);
        assert_eq!(first.count(), 0);
        assert_eq!(second.count(), 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let reg = registry();
        assert!(!reg.unregister(ComponentId(99)));

        let t = RecordingTarget::new(3, Position::ORIGIN, ReceptorSet::all());
        reg.register(&as_dyn(&t)).unwrap();
        assert!(reg.unregister(ComponentId(3)));
        assert!(!reg.unregister(ComponentId(3)));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_registry_does_not_own_targets() {
        let reg = registry();
        let t = RecordingTarget::new(4, Position::ORIGIN, ReceptorSet::all());
        reg.register(&as_dyn(&t)).unwrap();
        assert_eq!(Arc::strong_count(&t), 1);

        drop(t);
        assert_eq!(reg.dispatch(LigandType::Dopamine, Position::ORIGIN, 1.0), 0);
        assert_eq!(reg.prune_dropped(), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_snapshot_is_stable_across_unregister() {
        let reg = registry();
        let t = RecordingTarget::new(5, Position::ORIGIN, ReceptorSet::all());
        reg.register(&as_dyn(&t)).unwrap();

        let snapshot = reg.snapshot(LigandType::Serotonin);
        reg.unregister(ComponentId(5));
        assert_eq!(snapshot.deliver(Position::ORIGIN, 1.0).len(), 1);
        assert_eq!(reg.dispatch(LigandType::Serotonin, Position::ORIGIN, 1.0), 0);
    }

    #[test]
    fn test_panicking_target_is_isolated() {
        let reg = registry();
        let bad: Arc<dyn BindingTarget> = Arc::new(PanickingTarget);
        let good = RecordingTarget::new(1, Position::ORIGIN, ReceptorSet::all());
        reg.register(&bad).unwrap();
        reg.register(&as_dyn(&good)).unwrap();

        let notified = reg.dispatch(LigandType::Dopamine, Position::ORIGIN, 1.0);
        assert_eq!(notified, 1);
        assert_eq!(good.count(), 1);
    }

    #[test]
    fn test_skips_non_finite_target_position() {
        let reg = registry();
        let lost = RecordingTarget::new(1, Position::new(f32::NAN, 0.0, 0.0), ReceptorSet::all());
        reg.register(&as_dyn(&lost)).unwrap();
        assert_eq!(reg.dispatch(LigandType::Dopamine, Position::ORIGIN, 1.0), 0);
    }

    #[test]
    fn test_target_ceiling() {
        let reg = BindingTargetRegistry::new(&ModulatorConfig::default().with_max_targets(1));
        let a = RecordingTarget::new(1, Position::ORIGIN, ReceptorSet::all());
        let b = RecordingTarget::new(2, Position::ORIGIN, ReceptorSet::all());
        reg.register(&as_dyn(&a)).unwrap();
        assert!(matches!(
            reg.register(&as_dyn(&b)),
            Err(ModulatorError::ResourceExhausted { limit: 1, .. })
        ));
        // A dropped target frees its slot.
        drop(a);
        assert!(reg.register(&as_dyn(&b)).is_ok());
    }

    #[test]
    fn test_concurrent_register_unregister() {
        let reg = Arc::new(registry());
        let targets: Vec<_> = (0..5)
            .map(|i| RecordingTarget::new(i, Position::ORIGIN, ReceptorSet::all()))
            .collect();

        let handles: Vec<_> = (0..10)
            .map(|w| {
                let reg = Arc::clone(&reg);
                let targets: Vec<Arc<dyn BindingTarget>> =
                    targets.iter().map(as_dyn).collect();
                thread::spawn(move || {
                    for cycle in 0..20 {
                        let t = &targets[(w + cycle) % targets.len()];
                        reg.register(t).unwrap();
                        reg.dispatch(LigandType::Gaba, Position::ORIGIN, 1.0);
                        reg.unregister(t.id());
                        reg.unregister(t.id());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("registry worker panicked");
        }
        assert!(reg.is_empty());
    }
}
