//! Domain-driven event types
//!
//! Events are grouped by the component that emits them. The CLI
//! renders them; tests assert on them.

use portforge_types::Version;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppEvent {
    General(GeneralEvent),
    Fetch(FetchEvent),
    Resolver(ResolverEvent),
    Sandbox(SandboxEvent),
    Build(BuildEvent),
    Deploy(DeployEvent),
    State(StateEvent),
}

/// Cross-cutting events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GeneralEvent {
    Debug {
        message: String,
    },
    Warning {
        message: String,
        context: Option<String>,
    },
    Error {
        message: String,
    },
    OperationStarted {
        operation: String,
    },
    OperationCompleted {
        operation: String,
        success: bool,
    },
}

/// Source fetching events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FetchEvent {
    Started {
        url: String,
        package: Option<String>,
    },
    CacheHit {
        url: String,
        path: PathBuf,
    },
    Retrying {
        url: String,
        attempt: u32,
        delay: Duration,
    },
    Completed {
        url: String,
        path: PathBuf,
        size: u64,
    },
    Failed {
        url: String,
        error: String,
    },
}

/// Resolver events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResolverEvent {
    Started { requests: Vec<String> },
    Completed { plan_size: usize },
}

/// Sandbox lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SandboxEvent {
    Preparing {
        root: PathBuf,
    },
    Mounted {
        target: PathBuf,
    },
    Ready {
        root: PathBuf,
    },
    Unmounted {
        target: PathBuf,
        lazy: bool,
    },
    CleanupCompleted {
        root: PathBuf,
        success: bool,
    },
}

/// Build pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BuildEvent {
    StageStarted {
        package: String,
        stage: String,
    },
    StageCompleted {
        package: String,
        stage: String,
    },
    CommandOutput {
        package: String,
        line: String,
    },
    HookRunning {
        package: String,
        stage: String,
        command: String,
    },
    Stripped {
        package: String,
        files: usize,
    },
    Packaged {
        package: String,
        version: Version,
        archive: PathBuf,
    },
    Failed {
        package: String,
        stage: String,
        error: String,
    },
}

/// Atomic deployment events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeployEvent {
    Started {
        deploy_id: String,
        package: String,
        version: Version,
        target_root: PathBuf,
    },
    FilesBackedUp {
        deploy_id: String,
        count: usize,
    },
    Completed {
        deploy_id: String,
        package: String,
    },
    RolledBack {
        deploy_id: String,
        restored: usize,
    },
    RollbackFailed {
        deploy_id: String,
        error: String,
    },
}

/// State database events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StateEvent {
    PackageInstalled {
        name: String,
        version: Version,
        explicit: bool,
    },
    PackageRemoved {
        name: String,
        files_removed: usize,
    },
}
