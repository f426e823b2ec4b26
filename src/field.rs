//! Concentration Field - the decaying spatial store of one ligand

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::ModulatorConfig;
use crate::error::{ModulatorError, Result};
use crate::ligand::{LigandKinetics, LigandType};
use crate::position::Position;

/// Spatial hash cell coordinates.
type CellKey = (i64, i64, i64);

/// One occupied cell: amount-weighted centroid of its deposits plus the amount.
///
/// The centroid keeps the true deposit coordinates; only the cell key is
/// computed from the clamped position.
#[derive(Clone, Copy, Debug)]
struct Site {
    centroid: Position,
    amount: f32,
}

#[derive(Debug, Default)]
struct FieldStore {
    sites: HashMap<CellKey, Site>,
    /// Cached maximum site amount.
    max: f32,
}

/// Outcome of one decay pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DecayReport {
    /// Sites still present after pruning.
    pub retained: usize,
    /// Sites removed for falling below the prune threshold.
    pub pruned: usize,
    /// Sites removed because they held a non-finite or negative amount.
    pub corrupted: usize,
    /// Maximum site amount after decay.
    pub max: f32,
}

/// The spatial store of one ligand's concentration.
///
/// Deposits accumulate into spatial hash cells sized as a fraction of the
/// ligand range. A query sums every site within range, weighted by the
/// ligand's distance falloff. All values decay by half-life and sites that
/// fall below the prune threshold are removed.
///
/// One read-write lock guards the store, so unrelated ligands never contend.
#[derive(Debug)]
pub struct ConcentrationField {
    ligand: LigandType,
    kinetics: LigandKinetics,
    cell_size: f32,
    /// Cells scanned per axis on each side of the query cell.
    reach: i64,
    prune_threshold: f32,
    max_sites: usize,
    store: RwLock<FieldStore>,
    corrupted_reads: AtomicU64,
    decay_passes: AtomicU64,
    #[cfg(test)]
    fail_decay: std::sync::atomic::AtomicBool,
}

impl ConcentrationField {
    /// Create an empty field for `ligand`.
    pub fn new(ligand: LigandType, config: &ModulatorConfig) -> Self {
        let kinetics = ligand.kinetics();
        let cell_size = kinetics.range * config.cell_size_fraction;
        // One extra ring covers centroids rounded across a cell boundary.
        let reach = (1.0 / config.cell_size_fraction).ceil() as i64 + 1;

        Self {
            ligand,
            kinetics,
            cell_size,
            reach,
            prune_threshold: config.prune_threshold,
            max_sites: config.max_sites_per_field,
            store: RwLock::new(FieldStore::default()),
            corrupted_reads: AtomicU64::new(0),
            decay_passes: AtomicU64::new(0),
            #[cfg(test)]
            fail_decay: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Cell holding `position`. Coordinates beyond the world limit share the
    /// boundary cells.
    fn cell_of(&self, position: &Position) -> CellKey {
        let position = position.clamped();
        (
            (position.x / self.cell_size).floor() as i64,
            (position.y / self.cell_size).floor() as i64,
            (position.z / self.cell_size).floor() as i64,
        )
    }

    // =========================================================================
    // WRITING
    // =========================================================================

    /// Accumulate `amount` at `position` (additive).
    ///
    /// Returns the amount now held by the receiving site. Non-finite positions
    /// and non-finite or non-positive amounts are ignored and return `0.0`.
    ///
    /// # Errors
    ///
    /// [`ModulatorError::ResourceExhausted`] when a new site would exceed the
    /// configured per-field ceiling.
    pub fn deposit(&self, position: Position, amount: f32) -> Result<f32> {
        if !position.is_finite() || !amount.is_finite() || amount <= 0.0 {
            debug!(
                ligand = %self.ligand,
                %position,
                amount,
                "Ignoring deposit with unusable position or amount"
            );
            return Ok(0.0);
        }

        let key = self.cell_of(&position);
        let mut guard = self.store.write();
        let store = &mut *guard;
        let occupied = store.sites.len();

        let site = match store.sites.get_mut(&key) {
            Some(site) => {
                if !site.amount.is_finite() || site.amount < 0.0 || !site.centroid.is_finite() {
                    warn!(
                        ligand = %self.ligand,
                        amount = site.amount,
                        "Resetting corrupted site before deposit"
                    );
                    site.amount = 0.0;
                    site.centroid = position;
                }
                let total = site.amount + amount;
                site.centroid = site.centroid.lerp(&position, amount / total);
                site.amount = total.min(f32::MAX);
                *site
            }
            None => {
                if occupied >= self.max_sites {
                    return Err(ModulatorError::ResourceExhausted {
                        resource: "field sites",
                        limit: self.max_sites,
                    });
                }
                let site = Site {
                    centroid: position,
                    amount,
                };
                store.sites.insert(key, site);
                site
            }
        };

        if site.amount > store.max {
            store.max = site.amount;
        }
        Ok(site.amount)
    }

    /// Whether a deposit at `position` would fit under the site ceiling.
    pub fn has_room(&self, position: &Position) -> bool {
        let key = self.cell_of(position);
        let store = self.store.read();
        store.sites.len() < self.max_sites || store.sites.contains_key(&key)
    }

    // =========================================================================
    // READING
    // =========================================================================

    /// Concentration at `position`.
    ///
    /// Always finite and non-negative. Non-finite query positions read as zero,
    /// and corrupted stored values are skipped.
    pub fn query(&self, position: Position) -> f32 {
        if !position.is_finite() {
            return 0.0;
        }
        let store = self.store.read();
        if store.sites.is_empty() {
            return 0.0;
        }

        let mut total = 0.0f64;
        let mut corrupted = 0u64;
        let mut accumulate = |site: &Site| {
            if !site.amount.is_finite() || site.amount < 0.0 || !site.centroid.is_finite() {
                corrupted += 1;
                return;
            }
            let weight = self.kinetics.falloff(position.distance(&site.centroid));
            total += site.amount as f64 * weight as f64;
        };

        let span = (2 * self.reach + 1) as usize;
        if store.sites.len() <= span * span * span {
            store.sites.values().for_each(&mut accumulate);
        } else {
            let (cx, cy, cz) = self.cell_of(&position);
            for dx in -self.reach..=self.reach {
                for dy in -self.reach..=self.reach {
                    for dz in -self.reach..=self.reach {
                        if let Some(site) = store.sites.get(&(cx + dx, cy + dy, cz + dz)) {
                            accumulate(site);
                        }
                    }
                }
            }
        }
        drop(store);

        if corrupted > 0 {
            self.corrupted_reads.fetch_add(corrupted, Ordering::Relaxed);
            warn!(
                ligand = %self.ligand,
                corrupted,
                "Skipped corrupted sites while reading concentration"
            );
        }

        if total.is_nan() {
            return 0.0;
        }
        total.clamp(0.0, f32::MAX as f64) as f32
    }

    // =========================================================================
    // TIME ADVANCEMENT
    // =========================================================================

    /// Decay every site by `0.5^(elapsed / half_life)` and prune the negligible.
    pub fn decay(&self, elapsed: Duration) -> DecayReport {
        #[cfg(test)]
        if self.fail_decay.load(Ordering::Relaxed) {
            panic!("injected decay failure in {} field", self.ligand);
        }

        let factor = self.kinetics.decay_factor(elapsed);
        let threshold = self.prune_threshold;
        let mut report = DecayReport::default();

        let mut store = self.store.write();
        let before = store.sites.len();
        let mut max = 0.0f32;
        store.sites.retain(|_, site| {
            if !site.amount.is_finite() || site.amount < 0.0 || !site.centroid.is_finite() {
                report.corrupted += 1;
                return false;
            }
            site.amount *= factor;
            let keep = site.amount > 0.0 && site.amount >= threshold;
            if keep && site.amount > max {
                max = site.amount;
            }
            keep
        });
        store.max = max;
        report.retained = store.sites.len();
        drop(store);

        report.pruned = before - report.retained - report.corrupted;
        report.max = max;
        self.decay_passes.fetch_add(1, Ordering::Relaxed);

        if report.corrupted > 0 {
            let err = ModulatorError::InternalInconsistency(format!(
                "{} corrupted sites in {} field",
                report.corrupted, self.ligand
            ));
            warn!(ligand = %self.ligand, error = %err, "Pruned corrupted sites during decay");
        }
        report
    }

    /// Remove every site.
    pub fn clear(&self) {
        let mut store = self.store.write();
        store.sites.clear();
        store.max = 0.0;
    }

    // =========================================================================
    // METRICS
    // =========================================================================

    pub fn ligand(&self) -> LigandType {
        self.ligand
    }

    pub fn kinetics(&self) -> &LigandKinetics {
        &self.kinetics
    }

    /// Edge length of one spatial hash cell.
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of occupied sites.
    pub fn site_count(&self) -> usize {
        self.store.read().sites.len()
    }

    /// Cached maximum site amount.
    pub fn max_concentration(&self) -> f32 {
        self.store.read().max
    }

    /// Sum of all sane site amounts.
    pub fn total_amount(&self) -> f64 {
        self.store
            .read()
            .sites
            .values()
            .filter(|s| s.amount.is_finite() && s.amount >= 0.0)
            .map(|s| s.amount as f64)
            .sum()
    }

    /// Corrupted sites skipped by queries so far.
    pub fn corrupted_reads(&self) -> u64 {
        self.corrupted_reads.load(Ordering::Relaxed)
    }

    /// Decay passes applied so far.
    pub fn decay_passes(&self) -> u64 {
        self.decay_passes.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn set_fail_decay(&self, fail: bool) {
        self.fail_decay.store(fail, Ordering::Relaxed);
    }

    #[cfg(test)]
    fn corrupt_site(&self, position: Position, amount: f32) {
        let key = self.cell_of(&position);
        self.store.write().sites.insert(
            key,
            Site {
                centroid: position,
                amount,
            },
        );
    }
}

/// One lazily created field per ligand type.
///
/// Lookup is lock-free; a field is built on first use and then lives as long
/// as the set.
#[derive(Debug)]
pub struct FieldSet {
    config: ModulatorConfig,
    fields: [OnceLock<ConcentrationField>; LigandType::COUNT],
}

impl FieldSet {
    pub fn new(config: &ModulatorConfig) -> Self {
        Self {
            config: config.clone(),
            fields: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    /// Field for `ligand`, if any release has created it.
    pub fn get(&self, ligand: LigandType) -> Option<&ConcentrationField> {
        self.fields[ligand.index()].get()
    }

    /// Field for `ligand`, created on first call.
    pub fn get_or_create(&self, ligand: LigandType) -> &ConcentrationField {
        self.fields[ligand.index()].get_or_init(|| {
            debug!(%ligand, "Creating concentration field");
            ConcentrationField::new(ligand, &self.config)
        })
    }

    /// Fields created so far, in ligand order.
    pub fn active(&self) -> impl Iterator<Item = &ConcentrationField> {
        self.fields.iter().filter_map(OnceLock::get)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }
}
