//! Patch application
//!
//! Patches run on the host against the extracted source tree with the
//! system `patch` tool, honoring the declared strip level.

use portforge_errors::{BuildError, Error};
use portforge_recipes::PatchEntry;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Apply one patch to `source_dir`
///
/// `recipe_dir` anchors relative patch paths.
///
/// # Errors
///
/// Returns [`BuildError::PatchFailed`] when the patch does not apply
/// or the tool cannot be spawned.
pub async fn apply_patch(
    entry: &PatchEntry,
    recipe_dir: Option<&Path>,
    source_dir: &Path,
) -> Result<(), Error> {
    let patch_path = resolve_patch_path(&entry.path, recipe_dir);
    debug!(patch = %patch_path.display(), strip = entry.strip_level, "applying patch");

    let output = Command::new("patch")
        .arg(format!("-p{}", entry.strip_level))
        .args(["-N", "-i"])
        .arg(&patch_path)
        .current_dir(source_dir)
        .output()
        .await
        .map_err(|e| BuildError::PatchFailed {
            patch: entry.path.clone(),
            strip: entry.strip_level,
            message: format!("patch tool could not be spawned: {e}"),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(BuildError::PatchFailed {
            patch: entry.path.clone(),
            strip: entry.strip_level,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into())
    }
}

fn resolve_patch_path(path: &str, recipe_dir: Option<&Path>) -> std::path::PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    match recipe_dir {
        Some(dir) => dir.join(candidate),
        None => candidate.to_path_buf(),
    }
}
