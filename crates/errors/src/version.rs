//! Version parsing errors

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum VersionError {
    #[error("invalid version: {input}")]
    InvalidVersion { input: String },

    #[error("invalid version constraint: {input}")]
    InvalidConstraint { input: String },

    #[error("invalid package spec: {input}")]
    InvalidSpec { input: String },
}
