//! Command execution inside a prepared root
//!
//! Commands run through `chroot` with a minimal, explicit environment.
//! Output is streamed live to the event sink and mirrored into the
//! per-package log file.

use crate::quote::{join_quoted, shell_quote};
use portforge_errors::{Error, SandboxError};
use portforge_events::{AppEvent, BuildEvent, EventEmitter, EventSender};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;

/// A command: a shell string routed through `sh -c`, or pre-tokenized
/// argv (preferred; joined with safe quoting)
#[derive(Debug, Clone)]
pub enum CommandSpec {
    Shell(String),
    Argv(Vec<String>),
}

impl CommandSpec {
    #[must_use]
    pub fn shell(script: impl Into<String>) -> Self {
        Self::Shell(script.into())
    }

    #[must_use]
    pub fn argv(args: Vec<String>) -> Self {
        Self::Argv(args)
    }

    /// The command as one `sh` script
    #[must_use]
    pub fn as_script(&self) -> String {
        match self {
            Self::Shell(script) => script.clone(),
            Self::Argv(args) => join_quoted(args),
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_script())
    }
}

/// Parameters for one in-sandbox command
pub struct ExecRequest<'a> {
    pub spec: &'a CommandSpec,
    pub env: &'a HashMap<String, String>,
    /// Working directory inside the root
    pub cwd: &'a str,
    /// Route through fakeroot so install-style ownership succeeds
    pub fakeroot: bool,
    /// False runs the command on the host (no chroot, no fakeroot),
    /// with `cwd` mapped under the root directory
    pub isolate: bool,
    /// Zero disables the timeout
    pub timeout_secs: u64,
}

/// Execute a command chrooted into `root`, returning the exit code
///
/// # Errors
///
/// Returns an error if the process cannot be spawned or the timeout
/// expires (the child is killed first).
pub async fn run_in_root(
    root: &Path,
    request: &ExecRequest<'_>,
    tx: Option<&EventSender>,
    log_file: Option<&Path>,
    label: &str,
) -> Result<i32, Error> {
    let body = if request.fakeroot && request.isolate {
        format!("fakeroot /bin/sh -c {}", shell_quote(&request.spec.as_script()))
    } else {
        request.spec.as_script()
    };
    let cwd = if request.isolate {
        request.cwd.to_string()
    } else {
        root.join(request.cwd.trim_start_matches('/'))
            .display()
            .to_string()
    };
    let script = format!("cd {} && {}", shell_quote(&cwd), body);

    let mut command = if request.isolate {
        let mut command = Command::new("chroot");
        command.arg(root).args(["/bin/sh", "-c", &script]);
        command
    } else {
        let mut command = Command::new("/bin/sh");
        command.args(["-c", &script]);
        command
    };
    command
        .env_clear()
        .env("PATH", "/usr/bin:/usr/sbin:/bin:/sbin")
        .env("HOME", "/root")
        .env("LANG", "C")
        .envs(request.env)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| SandboxError::SpawnFailed {
        command: request.spec.to_string(),
        message: e.to_string(),
    })?;

    let log = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|e| Error::io_with_path(&e, path))?;
            Some(Arc::new(Mutex::new(file)))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::internal("child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::internal("child stderr not captured"))?;

    let out_task = tokio::spawn(stream_lines(
        stdout,
        tx.cloned(),
        log.clone(),
        label.to_string(),
    ));
    let err_task = tokio::spawn(stream_lines(
        stderr,
        tx.cloned(),
        log.clone(),
        label.to_string(),
    ));

    let status = if request.timeout_secs > 0 {
        match tokio::time::timeout(Duration::from_secs(request.timeout_secs), child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                let _ = out_task.await;
                let _ = err_task.await;
                return Err(SandboxError::CommandTimeout {
                    command: request.spec.to_string(),
                    seconds: request.timeout_secs,
                }
                .into());
            }
        }
    } else {
        child.wait().await?
    };

    let _ = out_task.await;
    let _ = err_task.await;

    Ok(status.code().unwrap_or(-1))
}

async fn stream_lines<R: AsyncRead + Unpin>(
    reader: R,
    tx: Option<EventSender>,
    log: Option<Arc<Mutex<tokio::fs::File>>>,
    label: String,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tx.emit(AppEvent::Build(BuildEvent::CommandOutput {
            package: label.clone(),
            line: line.clone(),
        }));
        if let Some(log) = &log {
            let mut file = log.lock().await;
            let _ = file.write_all(line.as_bytes()).await;
            let _ = file.write_all(b"\n").await;
        }
    }
}
