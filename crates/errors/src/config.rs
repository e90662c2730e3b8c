//! Configuration errors

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    ReadFailed { path: String, message: String },

    #[error("failed to parse config {path}: {message}")]
    ParseFailed { path: String, message: String },

    #[error("invalid config value for `{key}`: {message}")]
    InvalidValue { key: String, message: String },

    #[error("no repository named {name}")]
    UnknownRepo { name: String },
}
