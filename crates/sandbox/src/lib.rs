#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Isolated build environments for portforge
//!
//! A [`Sandbox`] re-roots command execution into a prepared directory:
//! bind mounts for `/dev`, pseudo-filesystems, tmpfs scratch space,
//! read-only host binds, and optionally a copy-on-write overlay.
//! Every prepared root is tracked in a process-wide registry so the
//! mounts come down again on normal exit and on termination signals.
//!
//! The lifecycle is a strict state machine:
//! `Unprepared -> Preparing -> Ready -> Executing -> Cleaning -> Done`.
//! A failure while preparing unwinds whatever was already mounted.

pub mod exec;
pub mod mounts;
pub mod quote;
pub mod registry;
mod sandbox;

pub use exec::CommandSpec;
pub use quote::shell_quote;
pub use sandbox::{Sandbox, SandboxState};

/// Effective-uid check used by the privilege guards
#[must_use]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    #[allow(unsafe_code)]
    let euid = unsafe { libc::geteuid() };
    euid == 0
}
