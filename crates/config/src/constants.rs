//! Default filesystem locations
//!
//! Overridable through the TOML config; these are only the fallbacks.

pub const PORTS_DIR: &str = "/usr/ports";
pub const DIST_DIR: &str = "/var/cache/portforge/distfiles";
pub const BUILD_ROOT: &str = "/var/portforge/build";
pub const PACKAGE_DIR: &str = "/var/cache/portforge/packages";
pub const BACKUP_ROOT: &str = "/var/lib/portforge/backups";
pub const DB_PATH: &str = "/var/lib/portforge/state.sqlite3";
pub const LOG_DIR: &str = "/var/log/portforge";
pub const OVERLAY_SCRATCH: &str = "/var/portforge/overlay";

/// Lock file taken for the duration of a deploy transaction
pub const DEPLOY_LOCK: &str = "/var/lib/portforge/deploy.lock";
