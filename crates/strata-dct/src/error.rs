//! Error types for the tracker, its bring-up path and configuration loading.

use thiserror::Error;

use crate::apn::ApnType;
use crate::gate::Blocker;

/// Errors returned by the public request surface (enable/disable, runtime).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// The string does not name any known APN type.
    #[error("unknown APN type: {0}")]
    UnknownType(String),

    /// The type is not registered, or no configuration can serve it.
    #[error("APN type {0} is not available")]
    TypeUnavailable(ApnType),

    /// The runtime worker has exited.
    #[error("tracker runtime is not running")]
    Disconnected,
}

/// Why a bring-up attempt did not issue a radio request.
///
/// Only [`SetupError::NoCandidateAvailable`] is surfaced to observers; the
/// rest are resolved locally (retry ticket, arbitration, next trigger).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("context {0} is not ready")]
    NotReady(ApnType),

    #[error("a bring-up or teardown is already in flight for {0}")]
    InFlight(ApnType),

    #[error("data not allowed: {0:?}")]
    DataNotAllowed(Vec<Blocker>),

    #[error("radio is in emergency-only service")]
    EmergencyOnly,

    #[error("no candidate configuration for {0}")]
    NoCandidateAvailable(ApnType),

    #[error("a higher priority context owns the single bearer")]
    HigherPriorityActive,

    /// The bearer pool is at the radio technology's concurrency limit.
    #[error("bearer pool exhausted")]
    ResourceExhausted,
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
}
