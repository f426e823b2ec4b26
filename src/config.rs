//! Modulator configuration

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Smallest accepted `cell_size_fraction`. Bounds the cells a query visits.
pub const MIN_CELL_SIZE_FRACTION: f32 = 0.05;

/// Configuration for a chemical modulator.
///
/// Passed once at construction; there is no ambient global state.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModulatorConfig {
    /// Interval between background decay ticks.
    pub decay_interval: Duration,

    /// Maximum time `stop()` waits for the decay worker to exit.
    pub stop_grace: Duration,

    /// Amounts below this are pruned on decay.
    pub prune_threshold: f32,

    /// Spatial hash cell edge as a fraction of the ligand range, in [0.05, 1].
    pub cell_size_fraction: f32,

    /// Maximum occupied cells per field.
    pub max_sites_per_field: usize,

    /// Maximum tracked (source, ligand) pairs in the rate limiter.
    pub max_rate_keys: usize,

    /// Releases a source may burst before the frequency bound applies.
    pub rate_burst: f32,

    /// Maximum registered binding targets.
    pub max_targets: usize,

    /// Capacity of the observer event queue.
    pub event_queue_capacity: usize,
}

impl Default for ModulatorConfig {
    fn default() -> Self {
        Self {
            decay_interval: Duration::from_millis(10),
            stop_grace: Duration::from_millis(500),
            prune_threshold: 1.0e-6,
            cell_size_fraction: 0.25,
            max_sites_per_field: 65_536,
            max_rate_keys: 1 << 20,
            rate_burst: 1.0,
            max_targets: 65_536,
            event_queue_capacity: 4096,
        }
    }
}

impl ModulatorConfig {
    /// Create the standard configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decay_interval(mut self, interval: Duration) -> Self {
        self.decay_interval = interval;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_prune_threshold(mut self, threshold: f32) -> Self {
        self.prune_threshold = threshold;
        self
    }

    pub fn with_cell_size_fraction(mut self, fraction: f32) -> Self {
        self.cell_size_fraction = fraction;
        self
    }

    pub fn with_max_sites_per_field(mut self, max: usize) -> Self {
        self.max_sites_per_field = max;
        self
    }

    pub fn with_max_rate_keys(mut self, max: usize) -> Self {
        self.max_rate_keys = max;
        self
    }

    pub fn with_rate_burst(mut self, burst: f32) -> Self {
        self.rate_burst = burst;
        self
    }

    pub fn with_max_targets(mut self, max: usize) -> Self {
        self.max_targets = max;
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Decay ticks per second at the configured interval.
    pub fn tick_rate_hz(&self) -> f32 {
        1.0 / self.decay_interval.as_secs_f32()
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decay_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("decay_interval"));
        }
        if self.stop_grace.is_zero() {
            return Err(ConfigError::ZeroDuration("stop_grace"));
        }
        if !(self.prune_threshold.is_finite() && self.prune_threshold >= 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "prune_threshold",
                value: self.prune_threshold as f64,
                expected: "finite and >= 0",
            });
        }
        if !(self.cell_size_fraction >= MIN_CELL_SIZE_FRACTION && self.cell_size_fraction <= 1.0) {
            return Err(ConfigError::OutOfRange {
                name: "cell_size_fraction",
                value: self.cell_size_fraction as f64,
                expected: "[0.05, 1]",
            });
        }
        if !(self.rate_burst.is_finite() && self.rate_burst >= 1.0) {
            return Err(ConfigError::OutOfRange {
                name: "rate_burst",
                value: self.rate_burst as f64,
                expected: "finite and >= 1",
            });
        }
        if self.max_sites_per_field == 0 {
            return Err(ConfigError::ZeroCapacity("max_sites_per_field"));
        }
        if self.max_rate_keys == 0 {
            return Err(ConfigError::ZeroCapacity("max_rate_keys"));
        }
        if self.max_targets == 0 {
            return Err(ConfigError::ZeroCapacity("max_targets"));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("event_queue_capacity"));
        }
        Ok(())
    }
}
