//! Error types and handling for perfwatch

use thiserror::Error;

/// Result type alias for perfwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Perfwatch error types
///
/// Probe failures and host measurement gaps are not represented here: the
/// former are recorded as data in a [`crate::probe::TestRunSession`], the
/// latter are absorbed by [`crate::memory::MemoryMonitor`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("A performance run is already in progress")]
    RunInProgress,

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("Failed to parse config: {}", err))
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(format!("Failed to serialize config: {}", err))
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(err: std::collections::TryReserveError) -> Self {
        Error::ResourceExhausted(format!("allocation failed: {}", err))
    }
}
