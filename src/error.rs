//! Error types for the chemical field engine.
//!
//! Every fallible operation returns [`Result`]. Rate limiting is an expected
//! outcome under load, so callers can tell it apart from genuine failures with
//! [`ModulatorError::is_rate_limited`].

use thiserror::Error;

use crate::ligand::LigandType;
use crate::position::ComponentId;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ModulatorError>;

/// Errors surfaced by the modulator and its components.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModulatorError {
    /// The ligand name or code does not name a known ligand type.
    #[error("Unrecognized ligand type: {0}")]
    InvalidLigand(String),

    /// The release amount is non-finite, negative or zero.
    #[error("Invalid concentration {value} for {ligand}")]
    InvalidConcentration {
        /// Ligand the release was attempted for
        ligand: LigandType,
        /// Offending amount
        value: f32,
    },

    /// The source could not be resolved to a usable position.
    #[error("Unknown source {0}")]
    UnknownSource(ComponentId),

    /// The source released this ligand faster than its kinetics allow.
    ///
    /// # Recovery
    ///
    /// Expected under load. Retry after `1 / max_frequency_hz` seconds.
    #[error("Release rate exceeded for {ligand} from source {source_id}")]
    RateExceeded {
        /// Ligand being released
        ligand: LigandType,
        /// Releasing source
        source_id: ComponentId,
    },

    /// A configured capacity ceiling was reached.
    #[error("Resource exhausted: {resource} (limit {limit})")]
    ResourceExhausted {
        /// Name of the exhausted resource
        resource: &'static str,
        /// Configured ceiling
        limit: usize,
    },

    /// Stored state was found corrupted. Sanitized on read; reported for logging.
    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// Configuration failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ModulatorError {
    /// True for the steady-state rate limiting outcome.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateExceeded { .. })
    }

    /// True when retrying later may succeed without changing the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RateExceeded { .. } | Self::ResourceExhausted { .. }
        )
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A duration setting is zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// A numeric setting is outside its allowed range.
    #[error("{name} out of range: {value} (expected {expected})")]
    OutOfRange {
        /// Setting name
        name: &'static str,
        /// Provided value
        value: f64,
        /// Human-readable allowed range
        expected: &'static str,
    },

    /// A capacity setting is zero.
    #[error("{0} capacity must be greater than zero")]
    ZeroCapacity(&'static str),
}
