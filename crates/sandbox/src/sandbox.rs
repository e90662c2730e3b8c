//! Sandbox lifecycle

use crate::exec::{run_in_root, CommandSpec, ExecRequest};
use crate::mounts::{self, plan_mounts};
use crate::registry::{self, PreparedRoot};
use portforge_config::SandboxSettings;
use portforge_errors::{Error, SandboxError};
use portforge_events::{AppEvent, EventEmitter, EventSender, SandboxEvent};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lifecycle states of a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Unprepared,
    Preparing,
    Ready,
    Executing,
    Cleaning,
    Done,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unprepared => "unprepared",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Cleaning => "cleaning",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// An isolated execution context rooted at one directory
///
/// Multiple sandboxes may coexist provided their roots are disjoint;
/// the process-wide registry is the coordination point. Within one
/// sandbox, commands run strictly sequentially.
pub struct Sandbox {
    root: PathBuf,
    settings: SandboxSettings,
    state: SandboxState,
    /// Targets we mounted, in mount order
    mounted: Vec<PathBuf>,
    /// Overlay (upper, work) dirs when stacked
    overlay: Option<(PathBuf, PathBuf)>,
    tx: Option<EventSender>,
    label: String,
    log_file: Option<PathBuf>,
    dry_run: bool,
}

impl EventEmitter for Sandbox {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl Sandbox {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, settings: SandboxSettings) -> Self {
        Self {
            root: root.into(),
            settings,
            state: SandboxState::Unprepared,
            mounted: Vec::new(),
            overlay: None,
            tx: None,
            label: String::new(),
            log_file: None,
            dry_run: false,
        }
    }

    #[must_use]
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Label used in streamed output events (package name)
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Log and validate without touching mounts or spawning commands
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn state(&self) -> SandboxState {
        self.state
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Prepare the sandbox: guards, overlay, mounts, DNS, registry
    ///
    /// # Errors
    ///
    /// Refuses the host root `/`, a missing root directory,
    /// insufficient privilege, and double preparation. Any mount
    /// failure unwinds the partial setup before returning.
    pub async fn prepare(&mut self) -> Result<(), Error> {
        if self.state != SandboxState::Unprepared {
            return Err(self.invalid_state("unprepared"));
        }

        if self.root == Path::new("/") {
            return Err(SandboxError::RootRefused.into());
        }
        let root = if self.dry_run {
            self.root.clone()
        } else {
            let canonical = self.root.canonicalize().map_err(|_| SandboxError::MissingRoot {
                root: self.root.display().to_string(),
            })?;
            if canonical == Path::new("/") {
                return Err(SandboxError::RootRefused.into());
            }
            // mounts need privilege; host-mode execution does not
            if self.settings.isolate && !crate::is_root() {
                return Err(SandboxError::InsufficientPrivilege {
                    operation: "sandbox mounts".to_string(),
                }
                .into());
            }
            canonical
        };
        self.root = root;

        self.state = SandboxState::Preparing;
        self.emit(AppEvent::Sandbox(SandboxEvent::Preparing {
            root: self.root.clone(),
        }));

        if !self.settings.isolate {
            // no mounts, no chroot; commands run straight on the host
            self.emit_warning(
                "build isolation disabled; commands run directly on the host",
            );
            self.state = SandboxState::Ready;
            self.emit(AppEvent::Sandbox(SandboxEvent::Ready {
                root: self.root.clone(),
            }));
            return Ok(());
        }

        if let Err(err) = self.prepare_inner().await {
            self.unwind().await;
            self.state = SandboxState::Done;
            return Err(err);
        }

        registry::register(PreparedRoot {
            root: self.root.clone(),
            mounts: self.mounted.clone(),
            overlay: self.overlay.clone(),
            force_lazy: self.settings.force_lazy_unmount,
        });
        registry::install_signal_cleanup();

        self.state = SandboxState::Ready;
        self.emit(AppEvent::Sandbox(SandboxEvent::Ready {
            root: self.root.clone(),
        }));
        Ok(())
    }

    async fn prepare_inner(&mut self) -> Result<(), Error> {
        if self.settings.use_overlay {
            let scratch = self.settings.overlay_scratch.join(overlay_slug(&self.root));
            let upper = scratch.join("upper");
            let work = scratch.join("work");
            if self.dry_run {
                self.emit_debug(format!("would mount overlay over {}", self.root.display()));
            } else {
                tokio::fs::create_dir_all(&upper).await?;
                tokio::fs::create_dir_all(&work).await?;
                mounts::mount_overlay(&self.root, &upper, &work).await?;
            }
            self.overlay = Some((upper, work));
        }

        for step in plan_mounts(&self.root, &self.settings) {
            if self.dry_run {
                self.emit_debug(format!("would mount {}", step.target.display()));
                self.mounted.push(step.target);
                continue;
            }
            if mounts::is_mounted(&step.target) {
                debug!(target = %step.target.display(), "already mounted, skipping");
                continue;
            }
            mounts::mount_step(&step).await?;
            self.emit(AppEvent::Sandbox(SandboxEvent::Mounted {
                target: step.target.clone(),
            }));
            self.mounted.push(step.target);
        }

        if self.settings.copy_resolv_conf && !self.dry_run {
            let etc = self.root.join("etc");
            tokio::fs::create_dir_all(&etc).await?;
            if let Err(e) = tokio::fs::copy("/etc/resolv.conf", etc.join("resolv.conf")).await {
                self.emit_warning(format!("resolv.conf copy failed: {e}"));
            }
        }

        Ok(())
    }

    /// Run a command inside the sandbox
    ///
    /// Returns the exit code; a non-zero exit is not an error here.
    ///
    /// # Errors
    ///
    /// Returns an error when the sandbox is not ready, the process
    /// cannot be spawned, or the per-command timeout expires.
    pub async fn run(
        &mut self,
        spec: &CommandSpec,
        env: &HashMap<String, String>,
        cwd: &str,
    ) -> Result<i32, Error> {
        self.run_inner(spec, env, cwd, false).await
    }

    /// Run a command with exit-code checking
    ///
    /// # Errors
    ///
    /// Additionally returns [`SandboxError::CommandFailed`] on a
    /// non-zero exit.
    pub async fn run_checked(
        &mut self,
        spec: &CommandSpec,
        env: &HashMap<String, String>,
        cwd: &str,
    ) -> Result<(), Error> {
        let code = self.run(spec, env, cwd).await?;
        if code == 0 {
            Ok(())
        } else {
            Err(SandboxError::CommandFailed {
                command: spec.to_string(),
                code,
            }
            .into())
        }
    }

    /// Run an install-style command under fakeroot
    ///
    /// File-ownership recording succeeds without real privilege.
    ///
    /// # Errors
    ///
    /// Same as [`Sandbox::run_checked`].
    pub async fn run_as_installer(
        &mut self,
        spec: &CommandSpec,
        env: &HashMap<String, String>,
        cwd: &str,
    ) -> Result<(), Error> {
        let code = self.run_inner(spec, env, cwd, true).await?;
        if code == 0 {
            Ok(())
        } else {
            Err(SandboxError::CommandFailed {
                command: spec.to_string(),
                code,
            }
            .into())
        }
    }

    async fn run_inner(
        &mut self,
        spec: &CommandSpec,
        env: &HashMap<String, String>,
        cwd: &str,
        fakeroot: bool,
    ) -> Result<i32, Error> {
        if self.state != SandboxState::Ready {
            return Err(self.invalid_state("ready"));
        }

        if self.dry_run {
            self.emit_debug(format!("would run in {}: {spec}", self.root.display()));
            return Ok(0);
        }

        self.state = SandboxState::Executing;
        let request = ExecRequest {
            spec,
            env,
            cwd,
            fakeroot,
            isolate: self.settings.isolate,
            timeout_secs: self.settings.command_timeout_secs,
        };
        let result = run_in_root(
            &self.root,
            &request,
            self.tx.as_ref(),
            self.log_file.as_deref(),
            &self.label,
        )
        .await;
        self.state = SandboxState::Ready;
        result
    }

    /// Tear the sandbox down
    ///
    /// Unmounts in strict reverse order, eager first with an optional
    /// lazy fallback. Failures are reported but never raised; the
    /// return value is the conjunction of all unmount successes.
    pub async fn cleanup(&mut self) -> bool {
        match self.state {
            SandboxState::Unprepared | SandboxState::Done => return true,
            SandboxState::Cleaning => return false,
            SandboxState::Preparing | SandboxState::Ready | SandboxState::Executing => {}
        }

        self.state = SandboxState::Cleaning;
        let success = self.unwind().await;
        registry::unregister(&self.root);
        self.state = SandboxState::Done;
        self.emit(AppEvent::Sandbox(SandboxEvent::CleanupCompleted {
            root: self.root.clone(),
            success,
        }));
        success
    }

    async fn unwind(&mut self) -> bool {
        let mut success = true;
        for target in self.mounted.iter().rev() {
            if self.dry_run {
                self.emit_debug(format!("would unmount {}", target.display()));
                continue;
            }
            match mounts::unmount(target, self.settings.force_lazy_unmount).await {
                Ok(()) => self.emit(AppEvent::Sandbox(SandboxEvent::Unmounted {
                    target: target.clone(),
                    lazy: false,
                })),
                Err(e) => {
                    warn!(target = %target.display(), error = %e, "unmount failed");
                    success = false;
                }
            }
        }
        self.mounted.clear();

        if let Some((upper, work)) = self.overlay.take() {
            if self.dry_run {
                self.emit_debug(format!("would unmount overlay on {}", self.root.display()));
            } else {
                if let Err(e) = mounts::unmount(&self.root, self.settings.force_lazy_unmount).await
                {
                    warn!(root = %self.root.display(), error = %e, "overlay unmount failed");
                    success = false;
                }
                let _ = tokio::fs::remove_dir_all(&upper).await;
                let _ = tokio::fs::remove_dir_all(&work).await;
            }
        }

        success
    }

    fn invalid_state(&self, expected: &str) -> Error {
        SandboxError::InvalidState {
            root: self.root.display().to_string(),
            state: self.state.to_string(),
            expected: expected.to_string(),
        }
        .into()
    }
}

fn overlay_slug(root: &Path) -> String {
    root.display()
        .to_string()
        .trim_start_matches('/')
        .replace('/', "_")
}
