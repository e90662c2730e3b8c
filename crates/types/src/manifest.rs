//! Package archive manifest
//!
//! Every package archive carries a `manifest.json` at the tar root
//! describing the regular files it installs.

use portforge_errors::{Error, PackagingError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One regular file recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Path relative to the would-be installed root
    pub relpath: String,
    /// Size in bytes
    pub size: u64,
    /// SHA-256 of the file content, hex-encoded
    pub sha256: String,
}

/// Top-level `manifest.json` of a package archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    /// RFC 3339 creation timestamp
    pub created_at: String,
    pub name: String,
    pub version: String,
    pub files: Vec<ManifestFile>,
    /// Free-form metadata (build options, variant, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Serialize to pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| {
            PackagingError::ManifestFailed {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Parse from JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not a valid manifest.
    pub fn from_json(content: &str) -> Result<Self, Error> {
        serde_json::from_str(content).map_err(|e| {
            PackagingError::ManifestFailed {
                message: e.to_string(),
            }
            .into()
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_round_trip() {
        let manifest = PackageManifest {
            created_at: "2024-01-01T00:00:00Z".to_string(),
            name: "zlib".to_string(),
            version: "1.3".to_string(),
            files: vec![ManifestFile {
                relpath: "usr/lib/libz.so.1.3".to_string(),
                size: 109_204,
                sha256: "ab".repeat(32),
            }],
            metadata: BTreeMap::new(),
        };

        let json = manifest.to_json().unwrap();
        let parsed = PackageManifest::from_json(&json).unwrap();
        assert_eq!(parsed.name, "zlib");
        assert_eq!(parsed.files, manifest.files);
    }
}
