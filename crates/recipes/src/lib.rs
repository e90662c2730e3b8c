#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Recipe parsing and the ports-tree index for portforge
//!
//! Recipes are TOML documents. The raw format is permissive (bare
//! strings, lists, or tables for sources, patches, and dependencies);
//! ingestion normalizes everything into one canonical [`Recipe`] so
//! downstream code never sees the variants. Parsing is pure: nothing
//! here writes to the filesystem.

pub mod expand;
pub mod format;
pub mod recipe;
pub mod store;

pub use recipe::{
    Dependencies, PatchEntry, Recipe, RecipeKey, RecipeOptions, SourceEntry, SourceKind,
    HOOK_STAGES, PATCH_STAGE,
};
pub use store::{LoadedRecipe, RecipeStore, ScanIssue, ScanReport};
