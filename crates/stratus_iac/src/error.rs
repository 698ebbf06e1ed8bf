//! Error types for stack configuration.

use thiserror::Error;

use stratus_core::DeclarationError;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading or overriding a stack configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid override: {0}")]
    InvalidOverride(String),

    #[error("Declaration error: {0}")]
    Declaration(#[from] DeclarationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
