//! Sandbox lifecycle tests
//!
//! Real mounts need privilege; these tests drive the state machine and
//! guards in dry-run mode and verify the planning logic stays pure.

use portforge_config::SandboxSettings;
use portforge_sandbox::{registry, CommandSpec, Sandbox, SandboxState};
use std::collections::HashMap;
use tempfile::tempdir;

fn settings() -> SandboxSettings {
    SandboxSettings {
        copy_resolv_conf: false,
        ..SandboxSettings::default()
    }
}

#[tokio::test]
async fn test_refuses_host_root() {
    let mut sandbox = Sandbox::new("/", settings()).with_dry_run(true);
    let err = sandbox.prepare().await.unwrap_err();
    assert!(err.to_string().contains("refusing"));
    // nothing was mounted, nothing registered
    assert!(!registry::is_registered(std::path::Path::new("/")));
}

#[tokio::test]
async fn test_lifecycle_states() {
    let dir = tempdir().unwrap();
    let mut sandbox = Sandbox::new(dir.path(), settings()).with_dry_run(true);
    assert_eq!(sandbox.state(), SandboxState::Unprepared);

    sandbox.prepare().await.unwrap();
    assert_eq!(sandbox.state(), SandboxState::Ready);
    assert!(registry::is_registered(sandbox.root()));

    let code = sandbox
        .run(&CommandSpec::shell("make"), &HashMap::new(), "/build")
        .await
        .unwrap();
    assert_eq!(code, 0);
    assert_eq!(sandbox.state(), SandboxState::Ready);

    // pre-tokenized argv form works the same way
    sandbox
        .run_checked(
            &CommandSpec::argv(vec!["install".to_string(), "-m".to_string(), "0755".to_string()]),
            &HashMap::new(),
            "/build",
        )
        .await
        .unwrap();

    assert!(sandbox.cleanup().await);
    assert_eq!(sandbox.state(), SandboxState::Done);
    assert!(!registry::is_registered(sandbox.root()));
}

#[tokio::test]
async fn test_double_prepare_rejected() {
    let dir = tempdir().unwrap();
    let mut sandbox = Sandbox::new(dir.path(), settings()).with_dry_run(true);
    sandbox.prepare().await.unwrap();

    let err = sandbox.prepare().await.unwrap_err();
    assert!(err.to_string().contains("expected unprepared"));
    sandbox.cleanup().await;
}

#[tokio::test]
async fn test_run_before_prepare_rejected() {
    let dir = tempdir().unwrap();
    let mut sandbox = Sandbox::new(dir.path(), settings()).with_dry_run(true);

    let err = sandbox
        .run(&CommandSpec::shell("true"), &HashMap::new(), "/")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("expected ready"));
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let dir = tempdir().unwrap();
    let mut sandbox = Sandbox::new(dir.path(), settings()).with_dry_run(true);
    sandbox.prepare().await.unwrap();

    assert!(sandbox.cleanup().await);
    // second call is a no-op success
    assert!(sandbox.cleanup().await);
}

#[tokio::test]
async fn test_host_mode_runs_commands_without_privilege() {
    let dir = tempdir().unwrap();
    let mut settings = settings();
    settings.isolate = false;
    let mut sandbox = Sandbox::new(dir.path(), settings);

    sandbox.prepare().await.unwrap();
    assert_eq!(sandbox.state(), SandboxState::Ready);

    // real exit codes come back, not dry-run zeros
    let code = sandbox
        .run(&CommandSpec::shell("exit 7"), &HashMap::new(), "/")
        .await
        .unwrap();
    assert_eq!(code, 7);
    sandbox
        .run_checked(&CommandSpec::shell("test -d ."), &HashMap::new(), "/")
        .await
        .unwrap();

    assert!(sandbox.cleanup().await);
}

#[tokio::test]
async fn test_cleanup_without_prepare_is_noop() {
    let dir = tempdir().unwrap();
    let mut sandbox = Sandbox::new(dir.path(), settings()).with_dry_run(true);
    assert!(sandbox.cleanup().await);
    assert_eq!(sandbox.state(), SandboxState::Unprepared);
}
