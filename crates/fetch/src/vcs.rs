//! VCS sources: clone-or-update through the system `git`

use crate::cache::slug_for_url;
use portforge_errors::{Error, FetchError};
use portforge_events::{EventEmitter, EventSender};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Clone a repository into the cache, or update an existing checkout
///
/// URLs may carry a `#ref` fragment naming a branch or tag. Initial
/// clones are shallow when a ref is implied; updates fetch, hard-reset
/// to the declared ref, and prune untracked files.
///
/// # Errors
///
/// Returns [`FetchError::VcsFailed`] when any git command exits
/// non-zero or cannot be spawned.
pub async fn clone_or_update(
    cache_dir: &Path,
    url: &str,
    tx: Option<&EventSender>,
) -> Result<PathBuf, Error> {
    let bare_url = url.strip_prefix("git+").unwrap_or(url);
    let (remote, reference) = match bare_url.split_once('#') {
        Some((remote, reference)) => (remote, Some(reference)),
        None => (bare_url, None),
    };
    let dest = cache_dir.join(slug_for_url(url));

    if dest.join(".git").exists() {
        tx.emit_debug(format!("updating checkout {}", dest.display()));
        git(url, &dest, &["fetch", "--tags", "origin"]).await?;
        let target = reference.map_or_else(
            || "FETCH_HEAD".to_string(),
            |r| format!("origin/{r}"),
        );
        // a tag is not a remote ref; fall back to the plain name
        if git(url, &dest, &["reset", "--hard", &target]).await.is_err() {
            let fallback = reference.unwrap_or("FETCH_HEAD");
            git(url, &dest, &["reset", "--hard", fallback]).await?;
        }
        git(url, &dest, &["clean", "-fdx"]).await?;
    } else {
        tx.emit_debug(format!("cloning {remote}"));
        let dest_str = dest.display().to_string();
        let mut args = vec!["clone", "--depth", "1"];
        if let Some(reference) = reference {
            args.extend(["--branch", reference]);
        }
        args.extend([remote, dest_str.as_str()]);
        git(url, cache_dir, &args).await?;
    }

    Ok(dest)
}

async fn git(url: &str, cwd: &Path, args: &[&str]) -> Result<(), Error> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| FetchError::VcsFailed {
            url: url.to_string(),
            message: format!("git could not be spawned: {e}"),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(FetchError::VcsFailed {
            url: url.to_string(),
            message: format!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
        .into())
    }
}
