//! Ligand types and their static kinetics.
//!
//! Two classes share one mechanism with different constants:
//!
//! - **Fast, short-range** transmitters (glutamate, GABA) act within a couple of
//!   units and vanish within milliseconds.
//! - **Slow, long-range** neuromodulators (dopamine, serotonin, acetylcholine,
//!   norepinephrine) spread across tens of units and linger for hundreds of
//!   milliseconds to seconds.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ModulatorError;

/// Static kinetic parameters of a ligand.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LigandKinetics {
    /// Effective spatial range. Deposits farther away contribute nothing.
    pub range: f32,
    /// Time for a deposited amount to halve.
    pub half_life: Duration,
    /// Maximum sustainable release frequency per source.
    pub max_frequency_hz: f32,
}

impl LigandKinetics {
    /// Multiplicative decay factor for an elapsed interval: `0.5^(elapsed / half_life)`.
    pub fn decay_factor(&self, elapsed: Duration) -> f32 {
        let half_lives = elapsed.as_secs_f64() / self.half_life.as_secs_f64();
        0.5f64.powf(half_lives) as f32
    }

    /// Spatial falloff weight at `distance`.
    ///
    /// Truncated Gaussian with sigma = range / 4: 1.0 at the source, strictly
    /// decreasing, ~3.4e-4 at the range edge and 0.0 beyond it or for
    /// non-finite distances.
    pub fn falloff(&self, distance: f64) -> f32 {
        let range = self.range as f64;
        if !distance.is_finite() || distance > range {
            return 0.0;
        }
        let sigma = range / 4.0;
        (-(distance * distance) / (2.0 * sigma * sigma)).exp() as f32
    }

    /// Minimum spacing between releases at the sustainable frequency.
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.max_frequency_hz as f64)
    }
}

/// Signaling substance types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LigandType {
    /// Fast excitatory transmitter
    Glutamate,
    /// Fast inhibitory transmitter
    Gaba,
    /// Slow neuromodulator: reward / salience
    Dopamine,
    /// Slow neuromodulator: mood / gain
    Serotonin,
    /// Slow neuromodulator: attention / learning rate
    Acetylcholine,
    /// Slow neuromodulator: arousal
    Norepinephrine,
}

impl LigandType {
    /// Number of ligand types.
    pub const COUNT: usize = 6;

    /// All ligand types in index order.
    pub const ALL: [LigandType; Self::COUNT] = [
        LigandType::Glutamate,
        LigandType::Gaba,
        LigandType::Dopamine,
        LigandType::Serotonin,
        LigandType::Acetylcholine,
        LigandType::Norepinephrine,
    ];

    /// Dense index in `0..COUNT`.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Stable numeric code.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Stable lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Glutamate => "glutamate",
            Self::Gaba => "gaba",
            Self::Dopamine => "dopamine",
            Self::Serotonin => "serotonin",
            Self::Acetylcholine => "acetylcholine",
            Self::Norepinephrine => "norepinephrine",
        }
    }

    /// Kinetic constants for this ligand.
    pub fn kinetics(self) -> LigandKinetics {
        match self {
            Self::Glutamate => LigandKinetics {
                range: 2.0,
                half_life: Duration::from_millis(5),
                max_frequency_hz: 1000.0,
            },
            Self::Gaba => LigandKinetics {
                range: 2.0,
                half_life: Duration::from_millis(10),
                max_frequency_hz: 500.0,
            },
            Self::Dopamine => LigandKinetics {
                range: 50.0,
                half_life: Duration::from_millis(500),
                max_frequency_hz: 20.0,
            },
            Self::Serotonin => LigandKinetics {
                range: 100.0,
                half_life: Duration::from_secs(2),
                max_frequency_hz: 10.0,
            },
            Self::Acetylcholine => LigandKinetics {
                range: 20.0,
                half_life: Duration::from_millis(200),
                max_frequency_hz: 50.0,
            },
            Self::Norepinephrine => LigandKinetics {
                range: 75.0,
                half_life: Duration::from_secs(1),
                max_frequency_hz: 15.0,
            },
        }
    }

    /// True for the fast, short-range transmitters.
    pub fn is_fast(self) -> bool {
        matches!(self, Self::Glutamate | Self::Gaba)
    }

    /// Look up by numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

impl fmt::Display for LigandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LigandType {
    type Err = ModulatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ModulatorError::InvalidLigand(s.to_string()))
    }
}

impl TryFrom<u8> for LigandType {
    type Error = ModulatorError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| ModulatorError::InvalidLigand(format!("code {}", code)))
    }
}

/// Compact set of ligand types a target carries receptors for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ReceptorSet(u8);

impl ReceptorSet {
    /// Empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every ligand type.
    pub fn all() -> Self {
        Self::ALL_BITS
    }

    const ALL_BITS: ReceptorSet = ReceptorSet((1u8 << LigandType::COUNT) - 1);

    /// Add a ligand type.
    pub fn with(mut self, ligand: LigandType) -> Self {
        self.insert(ligand);
        self
    }

    pub fn insert(&mut self, ligand: LigandType) {
        self.0 |= 1 << ligand.index();
    }

    pub fn remove(&mut self, ligand: LigandType) {
        self.0 &= !(1 << ligand.index());
    }

    #[inline]
    pub fn contains(&self, ligand: LigandType) -> bool {
        self.0 & (1 << ligand.index()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate the contained ligand types in index order.
    pub fn iter(&self) -> impl Iterator<Item = LigandType> {
        let set = *self;
        LigandType::ALL.into_iter().filter(move |l| set.contains(*l))
    }
}

impl FromIterator<LigandType> for ReceptorSet {
    fn from_iter<I: IntoIterator<Item = LigandType>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), ReceptorSet::with)
    }
}

impl From<&[LigandType]> for ReceptorSet {
    fn from(ligands: &[LigandType]) -> Self {
        ligands.iter().copied().collect()
    }
}
