#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! The per-package build pipeline and atomic deployment
//!
//! Drives fetch -> extract -> patch -> build -> install -> strip ->
//! package for one recipe, then (optionally) deploys the resulting
//! archive onto the target root under a crash-safe transaction with a
//! byte-identical backup of every file it replaces.

pub mod context;
pub mod deploy;
pub mod extract;
pub mod packaging;
pub mod patch;
pub mod pipeline;
pub mod remove;
pub mod strip;
pub mod upgrade;

pub use context::{standard_overrides, BuildContext, BuildRequest};
pub use deploy::{atomic_deploy, rollback, DeployTransaction};
pub use pipeline::{BuildOutcome, BuildPipeline};
pub use remove::{remove_package, RemoveOutcome};
pub use upgrade::upgrade_deployed;
