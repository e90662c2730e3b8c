#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for the portforge package manager
//!
//! This crate provides fine-grained error types organized by domain.
//! Every engine crate returns the cross-crate [`Error`] at its public
//! boundary and a domain error internally.

pub mod build;
pub mod config;
pub mod fetch;
pub mod recipe;
pub mod resolve;
pub mod sandbox;
pub mod state;
pub mod version;

// Re-export all error types at the root
pub use build::{BuildError, DeployError, PackagingError};
pub use config::ConfigError;
pub use fetch::FetchError;
pub use recipe::RecipeError;
pub use resolve::ResolveError;
pub use sandbox::SandboxError;
pub use state::StateError;
pub use version::VersionError;

use thiserror::Error;

/// Generic error type for cross-crate boundaries
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("recipe error: {0}")]
    Recipe(#[from] RecipeError),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("packaging error: {0}")]
    Packaging(#[from] PackagingError),

    #[error("deploy error: {0}")]
    Deploy(#[from] DeployError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
        path: Option<std::path::PathBuf>,
    },
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an Io error with an associated path
    pub fn io_with_path(err: &std::io::Error, path: impl Into<std::path::PathBuf>) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: Some(path.into()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::State(StateError::DatabaseError {
            message: err.to_string(),
        })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Recipe(RecipeError::ParseError {
            message: err.to_string(),
        })
    }
}

/// Result type alias for portforge operations
pub type Result<T> = std::result::Result<T, Error>;
