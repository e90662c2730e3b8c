//! Package archive creation and reading
//!
//! An archive is one tar (gzip or xz) holding `manifest.json` at the
//! root plus the staging tree with modes preserved. Writes go to a
//! temporary file and are renamed into place.

use flate2::write::GzEncoder;
use portforge_errors::{Error, PackagingError};
use portforge_fetch::cache::sha256_of;
use portforge_types::{ManifestFile, PackageManifest};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use xz2::write::XzEncoder;

/// Name of the manifest entry at the tar root
pub const MANIFEST_NAME: &str = "manifest.json";

/// Build the manifest for a staging tree
///
/// Regular files only, sorted by relative path, each with size and
/// SHA-256.
///
/// # Errors
///
/// Returns an error if the tree cannot be read or hashed.
pub async fn manifest_for_staging(
    staging: &Path,
    name: &str,
    version: &str,
    metadata: BTreeMap<String, String>,
) -> Result<PackageManifest, Error> {
    let mut files = Vec::new();
    for entry in WalkDir::new(staging)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(staging)
            .map_err(|e| Error::internal(e.to_string()))?;
        files.push(ManifestFile {
            relpath: rel.to_string_lossy().replace('\\', "/"),
            size: entry.metadata().map(|m| m.len()).unwrap_or(0),
            sha256: sha256_of(entry.path()).await?,
        });
    }
    files.sort_by(|a, b| a.relpath.cmp(&b.relpath));

    Ok(PackageManifest {
        created_at: chrono::Utc::now().to_rfc3339(),
        name: name.to_string(),
        version: version.to_string(),
        files,
        metadata,
    })
}

/// Create the package archive for a staging tree
///
/// `compression` is `"gz"` or `"xz"`. The write is atomic: a temporary
/// file in the destination directory is renamed over `out_path` only
/// once the archive is complete.
///
/// # Errors
///
/// Returns [`PackagingError`] on archive or manifest failures.
pub async fn create_package(
    staging: &Path,
    out_path: &Path,
    manifest: &PackageManifest,
    compression: &str,
) -> Result<(), Error> {
    if !matches!(compression, "gz" | "xz") {
        return Err(PackagingError::UnsupportedCompression {
            path: out_path.display().to_string(),
        }
        .into());
    }

    let out_dir = out_path
        .parent()
        .ok_or_else(|| Error::internal("archive path has no parent"))?;
    tokio::fs::create_dir_all(out_dir).await?;

    let manifest_json = manifest.to_json()?;
    let staging = staging.to_path_buf();
    let out_path_owned = out_path.to_path_buf();
    let out_dir = out_dir.to_path_buf();
    let compression = compression.to_string();

    tokio::task::spawn_blocking(move || -> Result<(), Error> {
        let temp = tempfile::NamedTempFile::new_in(&out_dir)
            .map_err(|e| archive_error(&out_path_owned, &e.to_string()))?;
        let file = temp
            .reopen()
            .map_err(|e| archive_error(&out_path_owned, &e.to_string()))?;

        let writer = if compression == "gz" {
            PkgWriter::Gz(GzEncoder::new(file, flate2::Compression::default()))
        } else {
            PkgWriter::Xz(XzEncoder::new(file, 6))
        };

        let mut builder = tar::Builder::new(writer);
        builder.follow_symlinks(false);

        // manifest first so readers can stop early
        let bytes = manifest_json.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(chrono::Utc::now().timestamp().unsigned_abs());
        header.set_cksum();
        builder
            .append_data(&mut header, MANIFEST_NAME, bytes)
            .map_err(|e| archive_error(&out_path_owned, &e.to_string()))?;

        for entry in WalkDir::new(&staging)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let rel = entry
                .path()
                .strip_prefix(&staging)
                .map_err(|e| Error::internal(e.to_string()))?;
            if entry.file_type().is_dir() {
                builder
                    .append_dir(rel, entry.path())
                    .map_err(|e| archive_error(&out_path_owned, &e.to_string()))?;
            } else {
                builder
                    .append_path_with_name(entry.path(), rel)
                    .map_err(|e| archive_error(&out_path_owned, &e.to_string()))?;
            }
        }

        let writer = builder
            .into_inner()
            .map_err(|e| archive_error(&out_path_owned, &e.to_string()))?;
        // finish the compression stream before the rename
        let file = writer
            .finish()
            .map_err(|e| archive_error(&out_path_owned, &e.to_string()))?;
        file.sync_all()
            .map_err(|e| archive_error(&out_path_owned, &e.to_string()))?;

        temp.persist(&out_path_owned)
            .map_err(|e| archive_error(&out_path_owned, &e.to_string()))?;
        Ok(())
    })
    .await
    .map_err(|e| Error::internal(format!("packaging task failed: {e}")))?
}

/// Read the manifest out of a package archive
///
/// # Errors
///
/// Returns [`PackagingError::MissingManifest`] when the archive has no
/// `manifest.json`.
pub async fn read_manifest(archive: &Path) -> Result<PackageManifest, Error> {
    let archive = archive.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<PackageManifest, Error> {
        let mut tar = open_archive(&archive)?;
        for entry in tar
            .entries()
            .map_err(|e| archive_error(&archive, &e.to_string()))?
        {
            let mut entry = entry.map_err(|e| archive_error(&archive, &e.to_string()))?;
            let is_manifest = entry
                .path()
                .map(|p| p == Path::new(MANIFEST_NAME))
                .unwrap_or(false);
            if is_manifest {
                let mut content = String::new();
                entry
                    .read_to_string(&mut content)
                    .map_err(|e| archive_error(&archive, &e.to_string()))?;
                return PackageManifest::from_json(&content);
            }
        }
        Err(PackagingError::MissingManifest {
            path: archive.display().to_string(),
        }
        .into())
    })
    .await
    .map_err(|e| Error::internal(format!("manifest read task failed: {e}")))?
}

/// Extract a package archive into `target`, skipping the manifest
///
/// Modes recorded in the archive are preserved; entries cannot escape
/// the target directory.
///
/// # Errors
///
/// Returns an error when extraction fails partway.
pub async fn extract_into(archive: &Path, target: &Path) -> Result<(), Error> {
    let archive = archive.to_path_buf();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), Error> {
        std::fs::create_dir_all(&target)?;
        let mut tar = open_archive(&archive)?;
        tar.set_preserve_permissions(true);
        for entry in tar
            .entries()
            .map_err(|e| archive_error(&archive, &e.to_string()))?
        {
            let mut entry = entry.map_err(|e| archive_error(&archive, &e.to_string()))?;
            let is_manifest = entry
                .path()
                .map(|p| p == Path::new(MANIFEST_NAME))
                .unwrap_or(false);
            if is_manifest {
                continue;
            }
            entry
                .unpack_in(&target)
                .map_err(|e| archive_error(&archive, &e.to_string()))?;
        }
        Ok(())
    })
    .await
    .map_err(|e| Error::internal(format!("extract task failed: {e}")))?
}

/// Compressed writer with an explicit finish step
enum PkgWriter {
    Gz(GzEncoder<std::fs::File>),
    Xz(XzEncoder<std::fs::File>),
}

impl PkgWriter {
    fn finish(self) -> std::io::Result<std::fs::File> {
        match self {
            Self::Gz(encoder) => encoder.finish(),
            Self::Xz(encoder) => encoder.finish(),
        }
    }
}

impl Write for PkgWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Gz(encoder) => encoder.write(buf),
            Self::Xz(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Gz(encoder) => encoder.flush(),
            Self::Xz(encoder) => encoder.flush(),
        }
    }
}

fn open_archive(path: &Path) -> Result<tar::Archive<Box<dyn Read>>, Error> {
    let file = std::fs::File::open(path).map_err(|e| Error::io_with_path(&e, path))?;
    let name = path.to_string_lossy();
    let reader: Box<dyn Read> = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Box::new(flate2::read::GzDecoder::new(file))
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        Box::new(xz2::read::XzDecoder::new(file))
    } else {
        return Err(PackagingError::UnsupportedCompression {
            path: path.display().to_string(),
        }
        .into());
    };
    Ok(tar::Archive::new(reader))
}

fn archive_error(path: &PathBuf, message: &str) -> Error {
    PackagingError::ArchiveFailed {
        path: path.display().to_string(),
        message: message.to_string(),
    }
    .into()
}
