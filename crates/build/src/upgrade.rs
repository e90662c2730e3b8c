//! Upgrade: deploy-new plus removal of the old file set
//!
//! The replacement's own deploy transaction is the pre-upgrade
//! snapshot; when post-deploy verification fails, rollback is
//! automatic (configurable).

use crate::deploy::{atomic_deploy, rollback, DeployParams};
use crate::packaging;
use portforge_errors::{DeployError, Error};
use portforge_events::{EventEmitter, EventLevel, EventSender};
use portforge_fetch::cache;
use portforge_recipes::Recipe;
use portforge_state::EventRecord;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

/// Deploy a new version over an installed one
///
/// Stale files owned by the previous version and absent from the new
/// manifest are deleted after the deploy. Verification checks that
/// every manifest file landed with its recorded size; on failure the
/// transaction is rolled back and the previous state record restored
/// (unless `rollback_on_verify_failure` is off, in which case a WARN
/// event is appended and the upgrade stands).
///
/// # Errors
///
/// Returns [`DeployError::VerificationFailed`] after a rolled-back
/// verification failure, or any deploy error.
pub async fn upgrade_deployed(
    archive: &Path,
    recipe: &Recipe,
    params: &DeployParams<'_>,
    rollback_on_verify_failure: bool,
    tx: Option<&EventSender>,
) -> Result<String, Error> {
    let previous = params.state.get_installed(&recipe.name).await?;
    let manifest = packaging::read_manifest(archive).await?;

    let deploy_id = atomic_deploy(archive, recipe, params, tx).await?;

    // drop files the old version owned that the new one does not
    if let Some(previous) = &previous {
        let new_files: HashSet<String> = manifest
            .files
            .iter()
            .map(|f| params.target_root.join(&f.relpath).display().to_string())
            .collect();
        for stale in previous.files.iter().filter(|f| !new_files.contains(*f)) {
            if let Err(e) = tokio::fs::remove_file(Path::new(stale)).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(file = %stale, error = %e, "stale file removal failed");
                }
            }
        }
    }

    if let Some(problem) = verify(&manifest, params.target_root).await {
        if rollback_on_verify_failure {
            if let Err(e) = rollback(params.backup_root, &deploy_id, params.state, tx).await {
                warn!(deploy_id, error = %e, "post-upgrade rollback failed");
            }
            match &previous {
                Some(previous) => params.state.upsert_installed(previous).await?,
                None => {
                    let _ = params.state.remove_installed(&recipe.name).await?;
                }
            }
            return Err(DeployError::VerificationFailed {
                package: recipe.name.clone(),
                message: problem,
            }
            .into());
        }

        params
            .state
            .append_event(&EventRecord::new(
                Some(recipe.name.clone()),
                "upgrade",
                EventLevel::Warn,
                format!("verification failed but rollback disabled: {problem}"),
            ))
            .await;
        tx.emit_warning(format!(
            "upgrade of {} kept despite failed verification: {problem}",
            recipe.name
        ));
    }

    Ok(deploy_id)
}

async fn verify(manifest: &portforge_types::PackageManifest, target_root: &Path) -> Option<String> {
    for file in &manifest.files {
        let dest = target_root.join(&file.relpath);
        match tokio::fs::metadata(&dest).await {
            Ok(metadata) if metadata.len() == file.size => {}
            Ok(metadata) => {
                return Some(format!(
                    "{} has size {} (expected {})",
                    dest.display(),
                    metadata.len(),
                    file.size
                ))
            }
            Err(_) => return Some(format!("{} missing after deploy", dest.display())),
        }
        // size alone misses same-length corruption; check the content
        match cache::verify_sha256(&dest, &file.sha256).await {
            Ok(true) => {}
            Ok(false) => {
                return Some(format!("{} content digest mismatch", dest.display()))
            }
            Err(e) => {
                return Some(format!("{} unreadable during verification: {e}", dest.display()))
            }
        }
    }
    None
}
