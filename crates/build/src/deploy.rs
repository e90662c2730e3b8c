//! Atomic deployment with crash-safe rollback
//!
//! Before the first byte lands in the target root, every file the
//! archive will replace is copied byte-identically into the
//! transaction's backup directory and the transaction manifest is
//! fsync'd. A crash mid-extraction therefore always leaves enough on
//! disk for `rollback` to restore the previous state.

use crate::packaging;
use filetime::FileTime;
use portforge_errors::{DeployError, Error};
use portforge_events::{AppEvent, DeployEvent, EventEmitter, EventSender, StateEvent};
use portforge_recipes::Recipe;
use portforge_state::{DependencyRow, DeployLock, EventRecord, InstalledRecord, StateDb};
use portforge_types::PackageSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use walkdir::WalkDir;

/// On-disk record of one deployment, written before any mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTransaction {
    pub deploy_id: String,
    pub package: String,
    pub version: String,
    pub target_root: PathBuf,
    pub backup_dir: PathBuf,
    /// Relative paths of every regular file the archive carries
    pub affected_files: Vec<String>,
    pub ts: i64,
}

/// Mint a unique deploy id: unix seconds plus a randomized suffix
#[must_use]
pub fn mint_deploy_id() -> String {
    let suffix: u32 = rand::random();
    format!("deploy_{}_{suffix:08x}", chrono::Utc::now().timestamp())
}

/// Everything a deploy needs besides the archive itself
pub struct DeployParams<'a> {
    pub target_root: &'a Path,
    pub backup_root: &'a Path,
    pub lock_path: &'a Path,
    pub state: &'a StateDb,
    pub explicit: bool,
}

/// Atomically deploy a package archive onto the target root
///
/// Returns the deploy id of the transaction. Failures after extraction
/// began trigger an automatic rollback; the original error is still
/// returned.
///
/// # Errors
///
/// Returns [`DeployError`] variants for privilege, backup, manifest,
/// and extraction failures.
pub async fn atomic_deploy(
    archive: &Path,
    recipe: &Recipe,
    params: &DeployParams<'_>,
    tx: Option<&EventSender>,
) -> Result<String, Error> {
    if params.target_root == Path::new("/") && !portforge_sandbox::is_root() {
        return Err(DeployError::InsufficientPrivilege {
            target: params.target_root.display().to_string(),
        }
        .into());
    }

    // one deployer per target at a time
    let lock_path = params.lock_path.to_path_buf();
    let _lock: DeployLock =
        tokio::task::spawn_blocking(move || DeployLock::acquire(&lock_path))
            .await
            .map_err(|e| Error::internal(format!("lock task failed: {e}")))??;

    let manifest = packaging::read_manifest(archive).await?;
    let deploy_id = mint_deploy_id();
    let backup_dir = params.backup_root.join(&deploy_id);
    let backup_files_dir = backup_dir.join("backup");
    tokio::fs::create_dir_all(&backup_files_dir).await?;

    tx.emit(AppEvent::Deploy(DeployEvent::Started {
        deploy_id: deploy_id.clone(),
        package: recipe.name.clone(),
        version: recipe.version.clone(),
        target_root: params.target_root.to_path_buf(),
    }));

    // backup every file that already exists at its destination
    let mut backed_up = 0;
    for file in &manifest.files {
        let dest = params.target_root.join(&file.relpath);
        if !dest.is_file() {
            continue;
        }
        let backup_path = backup_files_dir.join(&file.relpath);
        copy_preserving(&dest, &backup_path).map_err(|e| DeployError::BackupFailed {
            path: dest.display().to_string(),
            message: e.to_string(),
        })?;
        backed_up += 1;
    }
    tx.emit(AppEvent::Deploy(DeployEvent::FilesBackedUp {
        deploy_id: deploy_id.clone(),
        count: backed_up,
    }));

    let transaction = DeployTransaction {
        deploy_id: deploy_id.clone(),
        package: recipe.name.clone(),
        version: recipe.version.to_string(),
        target_root: params.target_root.to_path_buf(),
        backup_dir: backup_dir.clone(),
        affected_files: manifest.files.iter().map(|f| f.relpath.clone()).collect(),
        ts: chrono::Utc::now().timestamp(),
    };
    write_transaction(&backup_dir, &transaction).await?;

    // the point of no return: mutate, and roll back on any failure
    let mutate = async {
        packaging::extract_into(archive, params.target_root)
            .await
            .map_err(|e| -> Error {
                DeployError::ExtractFailed {
                    target: params.target_root.display().to_string(),
                    message: e.to_string(),
                }
                .into()
            })?;

        let record = installed_record(recipe, &manifest.files, params)?;
        params.state.upsert_installed(&record).await?;
        Ok::<(), Error>(())
    };

    if let Err(err) = mutate.await {
        params
            .state
            .append_event(&EventRecord::new(
                Some(recipe.name.clone()),
                "deploy",
                portforge_events::EventLevel::Error,
                format!("deploy {deploy_id} failed, rolling back: {err}"),
            ))
            .await;
        match rollback(params.backup_root, &deploy_id, params.state, tx).await {
            Ok(_) => {}
            Err(rollback_err) => {
                warn!(deploy_id, error = %rollback_err, "automatic rollback failed");
            }
        }
        return Err(err);
    }

    params
        .state
        .append_event(&EventRecord::new(
            Some(recipe.name.clone()),
            "deploy",
            portforge_events::EventLevel::Info,
            format!("deploy {deploy_id} completed ({} files)", manifest.files.len()),
        ))
        .await;
    tx.emit(AppEvent::Deploy(DeployEvent::Completed {
        deploy_id: deploy_id.clone(),
        package: recipe.name.clone(),
    }));
    tx.emit(AppEvent::State(StateEvent::PackageInstalled {
        name: recipe.name.clone(),
        version: recipe.version.clone(),
        explicit: params.explicit,
    }));

    Ok(deploy_id)
}

/// Restore a deployment's backed-up files
///
/// Reads the transaction manifest, copies every file under `backup/`
/// back to its recorded location (creating parents as needed), appends
/// an event, and removes the consumed transaction directory.
///
/// # Errors
///
/// Returns [`DeployError::TransactionNotFound`] for an unknown id and
/// [`DeployError::RollbackFailed`] when a restore fails.
pub async fn rollback(
    backup_root: &Path,
    deploy_id: &str,
    state: &StateDb,
    tx: Option<&EventSender>,
) -> Result<usize, Error> {
    let backup_dir = backup_root.join(deploy_id);
    let manifest_path = backup_dir.join("manifest.json");
    if !manifest_path.is_file() {
        return Err(DeployError::TransactionNotFound {
            deploy_id: deploy_id.to_string(),
            backup_root: backup_root.display().to_string(),
        }
        .into());
    }

    let content = tokio::fs::read_to_string(&manifest_path).await?;
    let transaction: DeployTransaction =
        serde_json::from_str(&content).map_err(|e| DeployError::RollbackFailed {
            deploy_id: deploy_id.to_string(),
            message: format!("unreadable transaction manifest: {e}"),
        })?;

    let backup_files_dir = backup_dir.join("backup");
    let mut restored = 0;
    for entry in WalkDir::new(&backup_files_dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(&backup_files_dir)
            .map_err(|e| Error::internal(e.to_string()))?;
        let dest = transaction.target_root.join(rel);
        copy_preserving(entry.path(), &dest).map_err(|e| DeployError::RollbackFailed {
            deploy_id: deploy_id.to_string(),
            message: format!("{}: {e}", dest.display()),
        })?;
        restored += 1;
    }

    state
        .append_event(&EventRecord::new(
            Some(transaction.package.clone()),
            "rollback",
            portforge_events::EventLevel::Info,
            format!("rollback of {deploy_id} restored {restored} files"),
        ))
        .await;
    tx.emit(AppEvent::Deploy(DeployEvent::RolledBack {
        deploy_id: deploy_id.to_string(),
        restored,
    }));

    // the transaction is consumed
    tokio::fs::remove_dir_all(&backup_dir).await?;
    Ok(restored)
}

fn installed_record(
    recipe: &Recipe,
    files: &[portforge_types::ManifestFile],
    params: &DeployParams<'_>,
) -> Result<InstalledRecord, Error> {
    let mut dependencies = Vec::new();
    for dep in &recipe.dependencies.runtime {
        let spec = PackageSpec::parse(dep)?;
        dependencies.push(DependencyRow {
            dep_name: spec.name.clone(),
            dep_version_expr: if spec.spec.is_any() {
                String::new()
            } else {
                spec.spec.to_string()
            },
        });
    }

    Ok(InstalledRecord {
        name: recipe.name.clone(),
        version: recipe.version.to_string(),
        install_date: chrono::Utc::now().timestamp(),
        build_options: recipe
            .variant
            .clone()
            .unwrap_or_default(),
        explicit: params.explicit,
        files: files
            .iter()
            .map(|f| params.target_root.join(&f.relpath).display().to_string())
            .collect(),
        dependencies,
    })
}

async fn write_transaction(backup_dir: &Path, transaction: &DeployTransaction) -> Result<(), Error> {
    let json = serde_json::to_string_pretty(transaction).map_err(|e| {
        DeployError::ManifestWriteFailed {
            message: e.to_string(),
        }
    })?;
    let path = backup_dir.join("manifest.json");
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| DeployError::ManifestWriteFailed {
            message: e.to_string(),
        })?;
    file.write_all(json.as_bytes())
        .await
        .map_err(|e| DeployError::ManifestWriteFailed {
            message: e.to_string(),
        })?;
    // the manifest is the commit point; it must be durable before
    // extraction mutates the target
    file.sync_all()
        .await
        .map_err(|e| DeployError::ManifestWriteFailed {
            message: e.to_string(),
        })?;
    Ok(())
}

/// Copy a file byte-identically, preserving mode and mtime
fn copy_preserving(src: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dest)?;
    let metadata = std::fs::metadata(src)?;
    filetime::set_file_mtime(dest, FileTime::from_last_modification_time(&metadata))?;
    Ok(())
}
