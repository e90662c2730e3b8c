//! Process-wide registry of prepared sandbox roots
//!
//! The registry exists so that mounts come down even when the process
//! is killed mid-build: a one-shot signal task tears down every
//! registered root on SIGINT, SIGTERM, and SIGHUP. Everything else in
//! the engine owns its state explicitly; this is the one intentional
//! global, because the signal handler is.

use crate::mounts;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing::{error, warn};

/// Cleanup data for one prepared root
#[derive(Debug, Clone)]
pub struct PreparedRoot {
    pub root: PathBuf,
    /// Mounted targets in mount order
    pub mounts: Vec<PathBuf>,
    /// Overlay upper/work dirs, when an overlay is stacked
    pub overlay: Option<(PathBuf, PathBuf)>,
    pub force_lazy: bool,
}

fn table() -> &'static Mutex<HashMap<PathBuf, PreparedRoot>> {
    static TABLE: OnceLock<Mutex<HashMap<PathBuf, PreparedRoot>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register (or refresh) a prepared root
pub fn register(entry: PreparedRoot) {
    if let Ok(mut map) = table().lock() {
        map.insert(entry.root.clone(), entry);
    }
}

/// Remove a root from the registry
pub fn unregister(root: &Path) {
    if let Ok(mut map) = table().lock() {
        map.remove(root);
    }
}

/// Whether a root is currently registered
#[must_use]
pub fn is_registered(root: &Path) -> bool {
    table().lock().is_ok_and(|map| map.contains_key(root))
}

/// Tear down every registered root, best effort
///
/// Returns true when every unmount succeeded.
pub async fn cleanup_all() -> bool {
    let entries = {
        match table().lock() {
            Ok(mut map) => map.drain().map(|(_, v)| v).collect::<Vec<_>>(),
            Err(_) => return false,
        }
    };

    let mut all_ok = true;
    for entry in entries {
        for target in entry.mounts.iter().rev() {
            if let Err(e) = mounts::unmount(target, entry.force_lazy).await {
                warn!(target = %target.display(), error = %e, "emergency unmount failed");
                all_ok = false;
            }
        }
        if entry.overlay.is_some() {
            if let Err(e) = mounts::unmount(&entry.root, entry.force_lazy).await {
                warn!(root = %entry.root.display(), error = %e, "overlay unmount failed");
                all_ok = false;
            }
        }
    }
    all_ok
}

/// Install the one-shot signal cleanup task
///
/// Fires on interrupt, terminate, and hangup; tears down all
/// registered roots, then exits with the conventional signal status.
pub fn install_signal_cleanup() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        tokio::spawn(async {
            use tokio::signal::unix::{signal, SignalKind};

            let mut interrupt = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "signal handler install failed");
                    return;
                }
            };
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "signal handler install failed");
                    return;
                }
            };
            let mut hangup = match signal(SignalKind::hangup()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "signal handler install failed");
                    return;
                }
            };

            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
                _ = hangup.recv() => {}
            }

            warn!("termination signal received, tearing down sandboxes");
            cleanup_all().await;
            std::process::exit(130);
        });
    });
}
