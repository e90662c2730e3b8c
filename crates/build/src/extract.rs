//! Source extraction into the work directory

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use portforge_errors::{BuildError, Error};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use xz2::read::XzDecoder;

/// Extract or copy one fetched artifact into `dest`
///
/// Tar archives are unpacked preserving permissions; directories (VCS
/// checkouts) and loose files are copied.
///
/// # Errors
///
/// Returns [`BuildError::ExtractFailed`] on unpack or copy failure.
pub async fn extract_artifact(artifact: &Path, dest: &Path) -> Result<(), Error> {
    tokio::fs::create_dir_all(dest).await?;

    if artifact.is_dir() {
        return copy_tree(artifact, &dest.join(dir_name(artifact))).await;
    }

    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if is_tarball(&name) {
        return unpack_tarball(artifact, dest).await;
    }

    // loose file (a patch, a standalone script)
    tokio::fs::copy(artifact, dest.join(&name))
        .await
        .map_err(|e| {
            BuildError::ExtractFailed {
                archive: artifact.display().to_string(),
                message: e.to_string(),
            }
        })?;
    Ok(())
}

fn is_tarball(name: &str) -> bool {
    [".tar", ".tar.gz", ".tgz", ".tar.xz", ".txz", ".tar.bz2", ".tbz2"]
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

async fn unpack_tarball(archive: &Path, dest: &Path) -> Result<(), Error> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), Error> {
        let file = std::fs::File::open(&archive).map_err(|e| Error::io_with_path(&e, &archive))?;
        let name = archive.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();

        let reader: Box<dyn Read> = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Box::new(GzDecoder::new(file))
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Box::new(XzDecoder::new(file))
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Box::new(BzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut tar = tar::Archive::new(reader);
        tar.set_preserve_permissions(true);
        tar.unpack(&dest).map_err(|e| {
            BuildError::ExtractFailed {
                archive: archive.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
    })
    .await
    .map_err(|e| Error::internal(format!("extract task failed: {e}")))?
}

/// Recursive copy of a source tree, skipping `.git`
async fn copy_tree(src: &Path, dest: &Path) -> Result<(), Error> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), Error> {
        for entry in WalkDir::new(&src).into_iter().filter_map(Result::ok) {
            let rel = entry
                .path()
                .strip_prefix(&src)
                .map_err(|e| Error::internal(e.to_string()))?;
            if rel.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            let target = dest.join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &target)
                    .map_err(|e| Error::io_with_path(&e, entry.path()))?;
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| Error::internal(format!("copy task failed: {e}")))?
}

fn dir_name(path: &Path) -> PathBuf {
    path.file_name().map_or_else(|| PathBuf::from("src"), PathBuf::from)
}

/// The working directory for build commands
///
/// When extraction produced exactly one top-level directory (the usual
/// tarball layout), commands run inside it.
#[must_use]
pub fn source_subdir(work_dir: &Path) -> PathBuf {
    let entries: Vec<_> = std::fs::read_dir(work_dir)
        .map(|iter| iter.filter_map(Result::ok).collect())
        .unwrap_or_default();
    if entries.len() == 1 && entries[0].path().is_dir() {
        entries[0].path()
    } else {
        work_dir.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_loose_file_copied() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("fix.patch");
        std::fs::write(&src, "--- a\n+++ b\n").unwrap();
        let dest = dir.path().join("work");

        extract_artifact(&src, &dest).await.unwrap();
        assert!(dest.join("fix.patch").exists());
    }

    #[tokio::test]
    async fn test_tarball_round_trip() {
        let dir = tempdir().unwrap();

        // build a small gzipped tarball
        let tree = dir.path().join("tree");
        std::fs::create_dir_all(tree.join("pkg-1.0/src")).unwrap();
        std::fs::write(tree.join("pkg-1.0/src/main.c"), "int main(){}\n").unwrap();
        let tarball = dir.path().join("pkg-1.0.tar.gz");
        {
            let file = std::fs::File::create(&tarball).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all("pkg-1.0", tree.join("pkg-1.0")).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let work = dir.path().join("work");
        extract_artifact(&tarball, &work).await.unwrap();
        assert!(work.join("pkg-1.0/src/main.c").exists());
        assert_eq!(source_subdir(&work), work.join("pkg-1.0"));
    }

    #[tokio::test]
    async fn test_vcs_tree_copied_without_git_dir() {
        let dir = tempdir().unwrap();
        let checkout = dir.path().join("https_example_tool.git");
        std::fs::create_dir_all(checkout.join(".git")).unwrap();
        std::fs::create_dir_all(checkout.join("src")).unwrap();
        std::fs::write(checkout.join(".git/HEAD"), "ref").unwrap();
        std::fs::write(checkout.join("src/lib.rs"), "").unwrap();

        let work = dir.path().join("work");
        extract_artifact(&checkout, &work).await.unwrap();
        let copied = work.join("https_example_tool.git");
        assert!(copied.join("src/lib.rs").exists());
        assert!(!copied.join(".git").exists());
    }

    #[test]
    fn test_source_subdir_multiple_entries() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        assert_eq!(source_subdir(dir.path()), dir.path());
    }
}
