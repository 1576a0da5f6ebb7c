//! Errors, one enum per concern.

use thiserror::Error;

/// A message could not be delivered or acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no answer within {0:?}")]
    Timeout(std::time::Duration),

    /// The counterpart context is gone or not listening.
    #[error("counterpart unreachable")]
    Closed,

    #[error("rejected by counterpart: {0}")]
    Rejected(String),
}

/// Controller command errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("cannot start a batch while processing is active")]
    AlreadyRunning,

    #[error("controller service is not running")]
    ServiceClosed,
}

/// Relay errors surfaced to callers of the message bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("gave up after {attempts} attempts: {reason}")]
    Exhausted { attempts: u32, reason: String },
}

/// Settings / history persistence errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
