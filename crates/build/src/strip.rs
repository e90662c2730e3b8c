//! Binary stripping over the staging tree

use globset::{Glob, GlobSet, GlobSetBuilder};
use portforge_errors::Error;
use portforge_events::{EventEmitter, EventSender};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;
use walkdir::WalkDir;

/// Strip executables in `staging` matching the glob patterns
///
/// Patterns are relative to the staging root. Only regular files with
/// an executable bit are touched. A missing `strip` tool is a warning,
/// not a failure; individual strip failures are warnings too.
///
/// # Errors
///
/// Returns an error only for unusable glob patterns.
pub async fn strip_staging(
    staging: &Path,
    patterns: &[String],
    tx: Option<&EventSender>,
) -> Result<usize, Error> {
    let globs = build_globset(patterns)?;

    let Ok(strip_tool) = which::which("strip") else {
        tx.emit_warning("strip tool not found, skipping binary stripping");
        return Ok(0);
    };

    let mut stripped = 0;
    for entry in WalkDir::new(staging).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(staging) else {
            continue;
        };
        if !globs.is_match(rel) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.permissions().mode() & 0o111 == 0 {
            continue;
        }

        let output = Command::new(&strip_tool).arg(entry.path()).output().await;
        match output {
            Ok(output) if output.status.success() => {
                debug!(file = %rel.display(), "stripped");
                stripped += 1;
            }
            Ok(output) => tx.emit_warning(format!(
                "strip failed for {}: {}",
                rel.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Err(e) => tx.emit_warning(format!("strip failed for {}: {e}", rel.display())),
        }
    }

    Ok(stripped)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::internal(format!("bad strip pattern `{pattern}`: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::internal(format!("strip pattern set: {e}")))
}
