//! Error types for antiphon-core.

use std::time::Duration;
use thiserror::Error;

/// Error type for core operations and collaborator calls.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hub error: {0}")]
    Hub(String),

    #[error("Generator: {0}")]
    Generator(#[from] GeneratorError),
}

/// Failures of the external sequence generator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("generation failed: {0}")]
    Failed(String),

    #[error("generation timed out after {timeout:?}")]
    TimedOut { timeout: Duration },

    #[error("generator worker disconnected")]
    Disconnected,

    #[error("generation cancelled")]
    Cancelled,

    #[error("no generator installed")]
    NoGenerator,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
