//! State database errors

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error("database error: {message}")]
    DatabaseError { message: String },

    #[error("migration failed: {message}")]
    MigrationFailed { message: String },

    #[error("package {name} is not installed")]
    NotInstalled { name: String },

    #[error("state database is locked by another process: {message}")]
    Locked { message: String },
}
