//! Command-line definition

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "portforge", about = "Source-based package manager", version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Configuration file
    #[arg(long, global = true, default_value = "/etc/portforge/config.toml")]
    pub config: PathBuf,

    /// Show debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage named upstream recipe repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Rebuild the recipe index
    Scan,
    /// Substring search over package names
    Search { query: String },
    /// Show the normalized recipe for a package
    Info { pkgref: String },
    /// Materialize a package's sources into the cache
    Fetch { pkgref: String },
    /// Build a package archive
    Build {
        pkgref: String,
        /// Keep the work tree even on success
        #[arg(long)]
        keep: bool,
        /// Continue into atomic deployment
        #[arg(long)]
        deploy: bool,
        /// Log the would-be actions without executing
        #[arg(long)]
        dry_run: bool,
    },
    /// Resolve, build, and deploy packages
    Install {
        #[arg(required = true)]
        pkgrefs: Vec<String>,
        /// Print the would-be actions without mutating anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove installed packages
    Remove {
        #[arg(required = true)]
        pkgrefs: Vec<String>,
        /// Remove even when reverse dependents exist
        #[arg(long)]
        force: bool,
        /// Print the would-be actions without mutating anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Upgrade one package with automatic rollback on failure
    Upgrade { pkgref: String },
    /// Upgrade everything that has a newer recipe
    UpgradeAll,
    /// List orphans, or remove them with --apply
    Depclean {
        #[arg(long)]
        apply: bool,
    },
    /// Show installed packages that depend on a package
    Revdep { pkgref: String },
    /// Tail a log file
    Logs {
        /// Log file (defaults to the most recent per-package log)
        #[arg(long)]
        file: Option<PathBuf>,
        /// How many trailing bytes to show
        #[arg(long, default_value_t = 4096)]
        bytes: u64,
    },
    /// List installed packages with timestamps
    History,
    /// Roll back a recorded deploy transaction
    Rollback { deploy_id: String },
}

#[derive(Debug, Subcommand)]
pub enum RepoCommands {
    /// Register a repository
    Add {
        name: String,
        url: String,
        /// Checkout location (defaults under the first ports dir)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Unregister a repository
    Remove { name: String },
    /// List registered repositories
    List,
    /// Synchronize one repository, or all of them
    Sync { name: Option<String> },
}
