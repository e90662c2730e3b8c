//! Build pipeline, packaging, and deployment errors

use thiserror::Error;

/// Pipeline stage wrapper carrying the stage name and recipe reference
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("stage `{stage}` failed for {recipe}: {message}")]
    StageFailed {
        stage: String,
        recipe: String,
        message: String,
    },

    #[error("hook `{hook}` failed for {recipe} at stage `{stage}`: {message}")]
    HookFailed {
        hook: String,
        stage: String,
        recipe: String,
        message: String,
    },

    #[error("patch {patch} failed to apply (strip level {strip}): {message}")]
    PatchFailed {
        patch: String,
        strip: u32,
        message: String,
    },

    #[error("extraction of {archive} failed: {message}")]
    ExtractFailed { archive: String, message: String },
}

/// Archive creation and manifest generation failures
#[derive(Debug, Clone, Error)]
pub enum PackagingError {
    #[error("failed to create archive {path}: {message}")]
    ArchiveFailed { path: String, message: String },

    #[error("failed to generate manifest: {message}")]
    ManifestFailed { message: String },

    #[error("unsupported archive compression for {path}")]
    UnsupportedCompression { path: String },

    #[error("archive {path} has no manifest.json")]
    MissingManifest { path: String },
}

/// Atomic deployment failures
#[derive(Debug, Clone, Error)]
pub enum DeployError {
    #[error("insufficient privilege to deploy into {target}")]
    InsufficientPrivilege { target: String },

    #[error("backup of {path} failed: {message}")]
    BackupFailed { path: String, message: String },

    #[error("transaction manifest write failed: {message}")]
    ManifestWriteFailed { message: String },

    #[error("extraction into {target} failed: {message}")]
    ExtractFailed { target: String, message: String },

    #[error("deploy transaction {deploy_id} not found under {backup_root}")]
    TransactionNotFound {
        deploy_id: String,
        backup_root: String,
    },

    #[error("rollback of {deploy_id} failed: {message}")]
    RollbackFailed { deploy_id: String, message: String },

    #[error("post-deploy verification failed for {package}: {message}")]
    VerificationFailed { package: String, message: String },
}
