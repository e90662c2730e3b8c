#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration for portforge
//!
//! One TOML file configures the whole engine. Every section has
//! working defaults so a missing file yields a usable configuration.

pub mod constants;

use portforge_errors::{ConfigError, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub fetch: FetchConfig,
    pub sandbox: SandboxSettings,
    pub build: BuildSettings,
    /// Named upstream recipe repositories, keyed by name
    pub repos: BTreeMap<String, RepoConfig>,
}

/// Filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Ports trees scanned for recipes
    pub ports_dirs: Vec<PathBuf>,
    /// Content-addressed source cache
    pub dist_dir: PathBuf,
    /// Per-package build scratch roots
    pub build_root: PathBuf,
    /// Finished package archives
    pub package_dir: PathBuf,
    /// Deploy transaction backups
    pub backup_root: PathBuf,
    /// State database file
    pub state_db: PathBuf,
    /// Per-package log files
    pub log_dir: PathBuf,
    /// Deployment target root
    pub target_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            ports_dirs: vec![PathBuf::from(constants::PORTS_DIR)],
            dist_dir: PathBuf::from(constants::DIST_DIR),
            build_root: PathBuf::from(constants::BUILD_ROOT),
            package_dir: PathBuf::from(constants::PACKAGE_DIR),
            backup_root: PathBuf::from(constants::BACKUP_ROOT),
            state_db: PathBuf::from(constants::DB_PATH),
            log_dir: PathBuf::from(constants::LOG_DIR),
            target_root: PathBuf::from("/"),
        }
    }
}

/// Fetcher limits and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Concurrent source downloads per package
    pub parallel_limit: usize,
    /// Retry attempts per source
    pub max_retries: u32,
    /// Linear backoff step between attempts, seconds
    pub retry_delay_secs: u64,
    /// TCP connect timeout, seconds
    pub connect_timeout_secs: u64,
    /// Total per-source timeout, seconds
    pub total_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            parallel_limit: 4,
            max_retries: 3,
            retry_delay_secs: 2,
            connect_timeout_secs: 30,
            total_timeout_secs: 600,
        }
    }
}

/// Sandbox mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Disabling isolation runs build commands directly on the host
    /// with no mounts or chroot; loudly warned about, unprivileged
    /// bring-up only
    pub isolate: bool,
    /// Host paths bound read-only into the sandbox; missing ones are skipped
    pub ro_binds: Vec<PathBuf>,
    /// Copy the host resolv.conf so name resolution works inside
    pub copy_resolv_conf: bool,
    /// Stack a copy-on-write overlay over the sandbox root
    pub use_overlay: bool,
    /// Scratch location for overlay upper/work directories
    pub overlay_scratch: PathBuf,
    /// Fall back to lazy unmount when an eager unmount fails
    pub force_lazy_unmount: bool,
    /// Per-command timeout, seconds (0 disables)
    pub command_timeout_secs: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            isolate: true,
            ro_binds: ["/usr", "/lib", "/lib64", "/opt"]
                .iter()
                .map(PathBuf::from)
                .collect(),
            copy_resolv_conf: true,
            use_overlay: false,
            overlay_scratch: PathBuf::from(constants::OVERLAY_SCRATCH),
            force_lazy_unmount: false,
            command_timeout_secs: 0,
        }
    }
}

/// Build pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Glob patterns relative to the staging root that select files to strip
    pub strip_patterns: Vec<String>,
    /// Package archive compression: "gz" or "xz"
    pub compression: String,
    /// Keep work trees after a failed build
    pub keep_work_on_failure: bool,
    /// Roll back automatically when post-upgrade verification fails
    pub rollback_on_verify_failure: bool,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            strip_patterns: ["bin/**", "sbin/**", "usr/bin/**", "usr/sbin/**"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            compression: "xz".to_string(),
            keep_work_on_failure: false,
            rollback_on_verify_failure: true,
        }
    }
}

/// One named upstream recipe repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// git URL or rsync-able directory
    pub url: String,
    /// Local checkout inside the ports tree
    pub path: PathBuf,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConfigError::ReadFailed {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;

        toml::from_str(&content).map_err(|e| {
            ConfigError::ParseFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Load from a path if it exists, otherwise fall back to defaults
    ///
    /// # Errors
    ///
    /// Returns an error only when an existing file fails to parse.
    pub async fn load_or_default(path: &Path) -> Result<Self, Error> {
        if path.exists() {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Merge overrides from the environment
    ///
    /// Recognized: `PORTFORGE_PORTS_DIR`, `PORTFORGE_TARGET_ROOT`,
    /// `PORTFORGE_PARALLEL_FETCH`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable carries an unparsable value.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        if let Ok(dir) = std::env::var("PORTFORGE_PORTS_DIR") {
            self.paths.ports_dirs = dir.split(':').map(PathBuf::from).collect();
        }
        if let Ok(root) = std::env::var("PORTFORGE_TARGET_ROOT") {
            self.paths.target_root = PathBuf::from(root);
        }
        if let Ok(n) = std::env::var("PORTFORGE_PARALLEL_FETCH") {
            self.fetch.parallel_limit =
                n.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "PORTFORGE_PARALLEL_FETCH".to_string(),
                    message: format!("`{n}` is not a number"),
                })?;
        }
        Ok(())
    }

    /// Look up a named repository
    ///
    /// # Errors
    ///
    /// Returns an error if no repository carries that name.
    pub fn repo(&self, name: &str) -> Result<&RepoConfig, Error> {
        self.repos.get(name).ok_or_else(|| {
            ConfigError::UnknownRepo {
                name: name.to_string(),
            }
            .into()
        })
    }
}
