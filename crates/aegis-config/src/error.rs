//! Configuration error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl From<ConfigError> for aegis_types::CoreError {
    fn from(value: ConfigError) -> Self {
        aegis_types::CoreError::Validation(value.to_string())
    }
}
