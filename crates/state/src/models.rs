//! Row models for the state database

use portforge_events::EventLevel;

/// One declared dependency of an installed package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRow {
    pub dep_name: String,
    /// Constraint expression as declared by the recipe, may be empty
    pub dep_version_expr: String,
}

/// An installed package with its files and dependencies
#[derive(Debug, Clone)]
pub struct InstalledRecord {
    pub name: String,
    pub version: String,
    /// Unix seconds of the deployment that produced this record
    pub install_date: i64,
    pub build_options: String,
    /// Requested by the operator rather than pulled in as a dependency
    pub explicit: bool,
    /// Absolute paths of every regular file the archive installed
    pub files: Vec<String>,
    pub dependencies: Vec<DependencyRow>,
}

/// An event to append to the log
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub pkg_name: Option<String>,
    pub stage: String,
    pub level: EventLevel,
    pub message: String,
}

impl EventRecord {
    #[must_use]
    pub fn new(
        pkg_name: impl Into<Option<String>>,
        stage: impl Into<String>,
        level: EventLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            pkg_name: pkg_name.into(),
            stage: stage.into(),
            level,
            message: message.into(),
        }
    }
}

/// A persisted event row
#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub pkg_name: Option<String>,
    pub stage: String,
    pub level: String,
    pub message: String,
    pub ts: i64,
}
