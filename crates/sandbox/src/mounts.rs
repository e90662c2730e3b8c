//! Mount planning and mount/umount execution
//!
//! Mount and unmount go through the system binaries; the planning
//! step is pure so the sequence can be inspected and tested without
//! privilege.

use portforge_config::SandboxSettings;
use portforge_errors::{Error, SandboxError};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// What kind of mount a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Bind,
    ReadOnlyBind,
    Tmpfs,
    Proc,
    Sysfs,
    Overlay,
}

/// One step of the mount sequence
#[derive(Debug, Clone)]
pub struct MountStep {
    pub kind: MountKind,
    /// Host source (bind mounts) or filesystem source name
    pub source: PathBuf,
    /// Target inside the sandbox root
    pub target: PathBuf,
}

/// Compute the mount sequence for a root
///
/// Order matters: `/dev` first so `devpts`/`shm` land inside it, then
/// pseudo-filesystems and scratch tmpfs, read-only host binds last.
/// Read-only binds whose host path is missing are skipped silently.
#[must_use]
pub fn plan_mounts(root: &Path, settings: &SandboxSettings) -> Vec<MountStep> {
    let mut steps = vec![
        MountStep {
            kind: MountKind::Bind,
            source: PathBuf::from("/dev"),
            target: root.join("dev"),
        },
        MountStep {
            kind: MountKind::Proc,
            source: PathBuf::from("proc"),
            target: root.join("proc"),
        },
        MountStep {
            kind: MountKind::Sysfs,
            source: PathBuf::from("sysfs"),
            target: root.join("sys"),
        },
        MountStep {
            kind: MountKind::Tmpfs,
            source: PathBuf::from("tmpfs"),
            target: root.join("run"),
        },
        MountStep {
            kind: MountKind::Tmpfs,
            source: PathBuf::from("tmpfs"),
            target: root.join("tmp"),
        },
        MountStep {
            kind: MountKind::Bind,
            source: PathBuf::from("/dev/pts"),
            target: root.join("dev/pts"),
        },
        MountStep {
            kind: MountKind::Bind,
            source: PathBuf::from("/dev/shm"),
            target: root.join("dev/shm"),
        },
    ];

    for host in &settings.ro_binds {
        if !host.exists() {
            continue;
        }
        let relative = host
            .strip_prefix("/")
            .map_or_else(|_| host.clone(), Path::to_path_buf);
        steps.push(MountStep {
            kind: MountKind::ReadOnlyBind,
            source: host.clone(),
            target: root.join(relative),
        });
    }

    steps
}

/// Check `/proc/mounts` for an entry whose target is `path`
#[must_use]
pub fn is_mounted(path: &Path) -> bool {
    let target = match path.canonicalize() {
        Ok(target) => target,
        Err(_) => return false,
    };
    let Ok(mounts) = std::fs::read_to_string("/proc/mounts") else {
        return false;
    };
    mounts.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .is_some_and(|mountpoint| Path::new(mountpoint) == target)
    })
}

/// Execute one mount step, creating the target directory first
///
/// # Errors
///
/// Returns [`SandboxError::MountFailed`] when the mount command exits
/// non-zero or cannot be spawned.
pub async fn mount_step(step: &MountStep) -> Result<(), Error> {
    tokio::fs::create_dir_all(&step.target).await?;

    match step.kind {
        MountKind::Bind => {
            run_mount(&["--bind", &path_arg(&step.source), &path_arg(&step.target)], &step.target)
                .await
        }
        MountKind::ReadOnlyBind => {
            run_mount(&["--bind", &path_arg(&step.source), &path_arg(&step.target)], &step.target)
                .await?;
            run_mount(
                &["-o", "remount,bind,ro", &path_arg(&step.target)],
                &step.target,
            )
            .await
        }
        MountKind::Tmpfs => {
            run_mount(
                &["-t", "tmpfs", "tmpfs", &path_arg(&step.target)],
                &step.target,
            )
            .await
        }
        MountKind::Proc => {
            run_mount(&["-t", "proc", "proc", &path_arg(&step.target)], &step.target).await
        }
        MountKind::Sysfs => {
            run_mount(
                &["-t", "sysfs", "sysfs", &path_arg(&step.target)],
                &step.target,
            )
            .await
        }
        MountKind::Overlay => Err(Error::internal("overlay steps use mount_overlay")),
    }
}

/// Mount an overlay over `root` with the given upper and work dirs
///
/// # Errors
///
/// Returns [`SandboxError::OverlayFailed`] on failure.
pub async fn mount_overlay(root: &Path, upper: &Path, work: &Path) -> Result<(), Error> {
    let options = format!(
        "lowerdir={},upperdir={},workdir={}",
        root.display(),
        upper.display(),
        work.display()
    );
    let output = Command::new("mount")
        .args(["-t", "overlay", "overlay", "-o", &options, &path_arg(root)])
        .output()
        .await
        .map_err(|e| SandboxError::OverlayFailed {
            message: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(SandboxError::OverlayFailed {
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into())
    }
}

/// Unmount a target; eager first, lazily when requested
///
/// # Errors
///
/// Returns [`SandboxError::UnmountFailed`] when every attempt fails.
pub async fn unmount(target: &Path, force_lazy: bool) -> Result<(), Error> {
    let eager = run_umount(&[&path_arg(target)], target).await;
    match eager {
        Ok(()) => Ok(()),
        Err(err) => {
            if force_lazy && run_umount(&["-l", &path_arg(target)], target).await.is_ok() {
                return Ok(());
            }
            Err(err)
        }
    }
}

async fn run_umount(args: &[&str], target: &Path) -> Result<(), Error> {
    let output = Command::new("umount")
        .args(args)
        .output()
        .await
        .map_err(|e| SandboxError::UnmountFailed {
            target: target.display().to_string(),
            message: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(SandboxError::UnmountFailed {
            target: target.display().to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into())
    }
}

async fn run_mount(args: &[&str], target: &Path) -> Result<(), Error> {
    let output = Command::new("mount")
        .args(args)
        .output()
        .await
        .map_err(|e| SandboxError::MountFailed {
            target: target.display().to_string(),
            message: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(SandboxError::MountFailed {
            target: target.display().to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into())
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_order_dev_first_ro_binds_last() {
        let settings = SandboxSettings::default();
        let root = Path::new("/var/portforge/build/foo/root");
        let steps = plan_mounts(root, &settings);

        assert_eq!(steps[0].target, root.join("dev"));
        assert_eq!(steps[1].kind, MountKind::Proc);
        assert_eq!(steps[2].kind, MountKind::Sysfs);
        assert!(steps[3..5].iter().all(|s| s.kind == MountKind::Tmpfs));
        assert_eq!(steps[5].target, root.join("dev/pts"));
        assert_eq!(steps[6].target, root.join("dev/shm"));
        // everything after the fixed prefix is a read-only host bind
        assert!(steps[7..].iter().all(|s| s.kind == MountKind::ReadOnlyBind));
    }

    #[test]
    fn test_missing_ro_bind_skipped() {
        let mut settings = SandboxSettings::default();
        settings.ro_binds = vec![PathBuf::from("/definitely/not/here")];
        let steps = plan_mounts(Path::new("/sandbox"), &settings);
        assert!(steps.iter().all(|s| s.kind != MountKind::ReadOnlyBind));
    }

    #[test]
    fn test_ro_bind_lands_under_root() {
        let mut settings = SandboxSettings::default();
        settings.ro_binds = vec![PathBuf::from("/usr")];
        let steps = plan_mounts(Path::new("/sandbox"), &settings);
        let ro = steps.iter().find(|s| s.kind == MountKind::ReadOnlyBind).unwrap();
        assert_eq!(ro.target, PathBuf::from("/sandbox/usr"));
    }
}
