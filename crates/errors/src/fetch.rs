//! Source fetching errors

use thiserror::Error;

/// Network, integrity, and protocol failures while fetching sources
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("invalid source URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("download of {url} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("integrity mismatch for {url}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("unsupported integrity algorithm `{algorithm}` for {url}")]
    UnsupportedAlgorithm { algorithm: String, url: String },

    #[error("vcs operation failed for {url}: {message}")]
    VcsFailed { url: String, message: String },

    #[error("download of {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("no usable source for {package}: all optional sources failed")]
    NoUsableSource { package: String },
}
