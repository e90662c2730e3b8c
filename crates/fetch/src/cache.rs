//! Cache naming and integrity verification

use portforge_errors::{Error, FetchError};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Deterministic cache slug for a URL
///
/// `://` and every `/` become `_`; a `#fragment` (VCS ref) is not part
/// of the slug. VCS checkouts are directories under the same rule.
#[must_use]
pub fn slug_for_url(url: &str) -> String {
    let url = url.strip_prefix("git+").unwrap_or(url);
    let url = url.split('#').next().unwrap_or(url);
    url.replace("://", "_").replace('/', "_")
}

/// Cache path for a URL
#[must_use]
pub fn cache_path(cache_dir: &Path, url: &str) -> PathBuf {
    cache_dir.join(slug_for_url(url))
}

/// Parse a declared integrity value into bare hex
///
/// Accepts a bare 64-char hex digest or `sha256:<hex>`.
///
/// # Errors
///
/// Returns an error for any other algorithm prefix or a malformed
/// digest.
pub fn parse_integrity(raw: &str, url: &str) -> Result<String, Error> {
    let raw = raw.trim();
    let hex = match raw.split_once(':') {
        Some(("sha256", hex)) => hex,
        Some((algorithm, _)) => {
            return Err(FetchError::UnsupportedAlgorithm {
                algorithm: algorithm.to_string(),
                url: url.to_string(),
            }
            .into())
        }
        None => raw,
    };

    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FetchError::UnsupportedAlgorithm {
            algorithm: raw.to_string(),
            url: url.to_string(),
        }
        .into());
    }
    Ok(hex.to_ascii_lowercase())
}

/// Compute the SHA-256 of a file, hex-encoded
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn sha256_of(path: &Path) -> Result<String, Error> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String, Error> {
        let mut file = std::fs::File::open(&path).map_err(|e| Error::io_with_path(&e, &path))?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| Error::internal(format!("hash task failed: {e}")))?
}

/// Check a file against an expected hex digest
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn verify_sha256(path: &Path, expected_hex: &str) -> Result<bool, Error> {
    let actual = sha256_of(path).await?;
    Ok(actual.eq_ignore_ascii_case(expected_hex))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_replaces_scheme_and_slashes() {
        assert_eq!(
            slug_for_url("https://zlib.net/zlib-1.3.tar.gz"),
            "https_zlib.net_zlib-1.3.tar.gz"
        );
        assert_eq!(
            slug_for_url("git+https://git.example.org/a/b.git#v1"),
            "https_git.example.org_a_b.git"
        );
    }

    #[test]
    fn test_parse_integrity_accepts_bare_and_prefixed() {
        let hex = "a".repeat(64);
        assert_eq!(parse_integrity(&hex, "u").unwrap(), hex);
        assert_eq!(parse_integrity(&format!("sha256:{hex}"), "u").unwrap(), hex);
        assert_eq!(
            parse_integrity(&hex.to_uppercase(), "u").unwrap(),
            hex
        );
    }

    #[test]
    fn test_parse_integrity_rejects_other_algorithms() {
        let err = parse_integrity(&format!("md5:{}", "a".repeat(32)), "u").unwrap_err();
        assert!(err.to_string().contains("md5"));
        assert!(parse_integrity("deadbeef", "u").is_err());
    }

    #[tokio::test]
    async fn test_sha256_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"hello world\n").unwrap();
        let digest = sha256_of(&path).await.unwrap();
        assert_eq!(
            digest,
            "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447"
        );
        assert!(verify_sha256(&path, &digest).await.unwrap());
        assert!(!verify_sha256(&path, &"0".repeat(64)).await.unwrap());
    }
}
