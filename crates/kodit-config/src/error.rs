//! Configuration error types

use kodit_common::{ErrorKind, IntoErrorKind};
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl IntoErrorKind for ConfigError {
    fn error_kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}
