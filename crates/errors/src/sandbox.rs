//! Sandbox preparation and execution errors

use thiserror::Error;

/// Mount, privilege, and in-sandbox command failures
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    #[error("refusing to operate on the host root `/`")]
    RootRefused,

    #[error("insufficient privilege: {operation} requires euid 0")]
    InsufficientPrivilege { operation: String },

    #[error("sandbox root {root} does not exist")]
    MissingRoot { root: String },

    #[error("mount of {target} failed: {message}")]
    MountFailed { target: String, message: String },

    #[error("unmount of {target} failed: {message}")]
    UnmountFailed { target: String, message: String },

    #[error("overlay setup failed: {message}")]
    OverlayFailed { message: String },

    #[error("command `{command}` exited with status {code}")]
    CommandFailed { command: String, code: i32 },

    #[error("command `{command}` timed out after {seconds}s")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("command `{command}` could not be spawned: {message}")]
    SpawnFailed { command: String, message: String },

    #[error("sandbox for {root} is in state {state}, expected {expected}")]
    InvalidState {
        root: String,
        state: String,
        expected: String,
    },
}
