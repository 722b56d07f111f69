// Error kinds for the telemetry path
use thiserror::Error;

/// Only `UnauthenticatedConnection` ends a session; every other kind is
/// logged and the connection keeps going.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("unauthenticated connection: {0}")]
    UnauthenticatedConnection(String),

    #[error("unauthorized fix: {0}")]
    UnauthorizedFix(String),

    #[error("unknown vehicle: {0}")]
    UnknownVehicle(String),

    #[error("malformed fix: {0}")]
    MalformedFix(String),

    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("registry load failed: {0}")]
    RegistryLoadFailure(String),

    #[error("forbidden: {0}")]
    Forbidden(String),
}
