//! Per-build paths and request parameters

use portforge_recipes::Recipe;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Staging mount point inside the sandbox; install commands see it as
/// `DESTDIR`
pub const STAGE_DIR: &str = "stage";

/// Source tree location inside the sandbox
pub const BUILD_DIR: &str = "build";

/// The expansion overrides every build provides to recipe loading
#[must_use]
pub fn standard_overrides(name: &str, version: &str) -> BTreeMap<String, String> {
    let jobs = std::cmp::max(1, num_cpus::get());
    let mut overrides = BTreeMap::new();
    overrides.insert("NAME".to_string(), name.to_string());
    overrides.insert("VERSION".to_string(), version.to_string());
    overrides.insert("DESTDIR".to_string(), format!("/{STAGE_DIR}"));
    overrides.insert("PREFIX".to_string(), "/usr".to_string());
    overrides.insert("JOBS".to_string(), jobs.to_string());
    overrides
}

/// One build request
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub recipe: Recipe,
    /// Directory of the recipe file, for resolving patch paths
    pub recipe_dir: Option<PathBuf>,
    /// Keep the work tree when the build fails
    pub keep_work: bool,
    /// Continue into atomic deployment after packaging
    pub deploy: bool,
    /// The operator asked for this package (not a dependency pull-in)
    pub explicit: bool,
    /// Log and validate without executing
    pub dry_run: bool,
}

impl BuildRequest {
    #[must_use]
    pub fn new(recipe: Recipe) -> Self {
        Self {
            recipe,
            recipe_dir: None,
            keep_work: false,
            deploy: false,
            explicit: true,
            dry_run: false,
        }
    }
}

/// Resolved filesystem layout for one build
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// `<build_root>/<name>-<version>`
    pub prefix: PathBuf,
    /// Sandbox root under the prefix
    pub sandbox_root: PathBuf,
    /// Source tree on the host (== `/build` inside the sandbox)
    pub work_dir: PathBuf,
    /// Staging tree on the host (== `/stage` inside the sandbox)
    pub staging_dir: PathBuf,
    /// Per-package log file
    pub log_file: PathBuf,
    /// Final archive path
    pub archive_path: PathBuf,
}

impl BuildContext {
    #[must_use]
    pub fn new(
        build_root: &Path,
        package_dir: &Path,
        log_dir: &Path,
        name: &str,
        version: &str,
        compression: &str,
    ) -> Self {
        let prefix = build_root.join(format!("{name}-{version}"));
        let sandbox_root = prefix.join("root");
        let extension = if compression == "gz" { "tar.gz" } else { "tar.xz" };
        Self {
            work_dir: sandbox_root.join(BUILD_DIR),
            staging_dir: sandbox_root.join(STAGE_DIR),
            sandbox_root,
            log_file: log_dir.join(format!("{name}.log")),
            archive_path: package_dir.join(format!("{name}-{version}.{extension}")),
            prefix,
        }
    }
}
