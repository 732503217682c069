//! Error types for the batch processing engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::ValidationError(message.into())
    }
}

/// Errors related to the bounded resource pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create resource: {0:#}")]
    ResourceCreation(anyhow::Error),

    #[error("resource pool is closed")]
    Closed,
}

/// Errors surfaced by the dispatcher itself.
///
/// Per-batch failures never show up here; they are reported as
/// [`crate::models::BatchOutcome::Failed`] on the batch result.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("dispatcher is closed")]
    Closed,
}

/// Reason a batch gave up after exhausting its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The last attempt exceeded the per-batch timeout.
    Timeout,
    /// The processing function returned an error.
    ProcessingError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::ProcessingError => write!(f, "processing_error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
        assert_eq!(ErrorKind::ProcessingError.to_string(), "processing_error");
    }

    #[test]
    fn test_config_error_wraps_into_engine_error() {
        let err: EngineError = ConfigError::invalid("batch_size must be at least 1").into();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_pool_error_message_includes_cause() {
        let err = PoolError::ResourceCreation(anyhow::anyhow!("connection refused"));
        assert_eq!(err.to_string(), "failed to create resource: connection refused");
    }
}
