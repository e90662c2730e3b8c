//! Canonical, normalized recipe model
//!
//! Immutable after parse. All permissive input shapes collapse here.

use crate::format::{RawDependencies, RawPatch, RawRecipe, RawSource};
use portforge_errors::{Error, RecipeError};
use portforge_types::Version;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Hook points around every pipeline stage
pub const HOOK_STAGES: &[&str] = &[
    "pre_fetch",
    "post_fetch",
    "pre_extract",
    "post_extract",
    "pre_patch",
    "post_patch",
    "pre_configure",
    "post_configure",
    "pre_build",
    "post_build",
    "pre_install",
    "post_install",
    "pre_strip",
    "post_strip",
    "pre_package",
    "post_package",
    "pre_deploy",
    "post_deploy",
    "pre_remove",
    "post_remove",
];

/// The dedicated pipeline stage at which untagged patches apply
pub const PATCH_STAGE: &str = "patch";

/// Index key: unique per (name, version, variant)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecipeKey {
    pub name: String,
    pub version: Version,
    pub variant: Option<String>,
}

impl fmt::Display for RecipeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}-{} ({variant})", self.name, self.version),
            None => write!(f, "{}-{}", self.name, self.version),
        }
    }
}

/// How a source is retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Downloadable archive or loose file
    Archive,
    /// Version-controlled tree
    Vcs,
}

/// One normalized source entry
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub url: String,
    pub kind: SourceKind,
    /// SHA-256, bare hex or `sha256:<hex>`
    pub integrity: Option<String>,
    pub priority: i64,
    /// Optional sources are fallbacks; only the first success is kept
    pub optional: bool,
}

/// One normalized patch entry
#[derive(Debug, Clone)]
pub struct PatchEntry {
    pub path: String,
    pub strip_level: u32,
    /// Hook point at which the patch applies
    pub stage: String,
}

/// Build-time and runtime dependency constraint expressions
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    pub build: Vec<String>,
    pub runtime: Vec<String>,
}

impl Dependencies {
    /// build ∪ runtime, in declaration order
    #[must_use]
    pub fn all(&self) -> Vec<&str> {
        self.build
            .iter()
            .chain(self.runtime.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Recognized entries of the free-form `[options]` table
#[derive(Debug, Clone, Default)]
pub struct RecipeOptions {
    /// Meta recipes declare no sources
    pub meta: bool,
    /// Overrides the configured strip patterns
    pub strip_patterns: Option<Vec<String>>,
    /// Hooks listed here may fail without aborting the pipeline
    pub optional_hooks: Vec<String>,
    /// The full table as written
    pub raw: toml::Table,
}

/// A parsed, normalized, immutable recipe
#[derive(Debug, Clone)]
pub struct Recipe {
    pub name: String,
    pub version: Version,
    pub variant: Option<String>,
    pub sources: Vec<SourceEntry>,
    pub patches: Vec<PatchEntry>,
    pub environment: BTreeMap<String, String>,
    pub hooks: BTreeMap<String, Vec<String>>,
    pub build_commands: Vec<String>,
    pub install_commands: Vec<String>,
    pub dependencies: Dependencies,
    pub options: RecipeOptions,
    /// Unknown top-level keys, preserved verbatim
    pub extra: toml::Table,
}

impl Recipe {
    /// The recipe's index key
    #[must_use]
    pub fn key(&self) -> RecipeKey {
        RecipeKey {
            name: self.name.clone(),
            version: self.version.clone(),
            variant: self.variant.clone(),
        }
    }

    /// Hook commands for one stage, empty when none are declared
    #[must_use]
    pub fn hooks_for(&self, stage: &str) -> &[String] {
        self.hooks.get(stage).map_or(&[], Vec::as_slice)
    }

    /// Whether a failing hook at `stage` should abort the pipeline
    #[must_use]
    pub fn hook_is_fatal(&self, stage: &str) -> bool {
        !self.options.optional_hooks.iter().any(|s| s == stage)
    }

    /// Parse and normalize a recipe document
    ///
    /// `origin` is used in diagnostics only. Returns the recipe plus
    /// non-fatal validation warnings.
    ///
    /// # Errors
    ///
    /// Returns an error on TOML syntax errors, a missing/empty name or
    /// version, an unparsable version, an invalid source kind, or a
    /// non-meta recipe without sources.
    pub fn parse(content: &str, origin: &Path) -> Result<(Self, Vec<String>), Error> {
        let raw: RawRecipe = toml::from_str(content).map_err(|e| RecipeError::ParseError {
            message: format!("{}: {e}", origin.display()),
        })?;
        Self::from_raw(raw, origin)
    }

    fn from_raw(raw: RawRecipe, origin: &Path) -> Result<(Self, Vec<String>), Error> {
        let mut warnings = Vec::new();
        let origin_str = origin.display().to_string();

        if raw.package.name.trim().is_empty() {
            return Err(RecipeError::MissingField {
                path: origin_str,
                field: "package.name".to_string(),
            }
            .into());
        }
        let version = Version::parse(&raw.package.version).map_err(|e| {
            RecipeError::ParseError {
                message: format!("{origin_str}: invalid package.version: {e}"),
            }
        })?;

        let options = normalize_options(raw.options);

        let sources = raw
            .sources
            .map(|s| {
                s.into_vec()
                    .into_iter()
                    .map(|entry| normalize_source(entry, &origin_str))
                    .collect::<Result<Vec<_>, Error>>()
            })
            .transpose()?
            .unwrap_or_default();

        if sources.is_empty() && !options.meta {
            return Err(RecipeError::NoSources { path: origin_str }.into());
        }

        let patches = raw
            .patches
            .map(|p| {
                p.into_vec()
                    .into_iter()
                    .map(normalize_patch)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        for patch in &patches {
            if patch.stage != PATCH_STAGE && !HOOK_STAGES.contains(&patch.stage.as_str()) {
                warnings.push(
                    RecipeError::UnknownHookStage {
                        path: origin_str.clone(),
                        stage: patch.stage.clone(),
                    }
                    .to_string(),
                );
            }
        }

        let mut hooks = BTreeMap::new();
        for (stage, commands) in raw.hooks {
            if !HOOK_STAGES.contains(&stage.as_str()) {
                warnings.push(
                    RecipeError::UnknownHookStage {
                        path: origin_str.clone(),
                        stage: stage.clone(),
                    }
                    .to_string(),
                );
            }
            hooks.insert(stage, commands.into_vec());
        }

        let dependencies = match raw.dependencies {
            Some(RawDependencies::Simple(runtime)) => Dependencies {
                build: Vec::new(),
                runtime,
            },
            Some(RawDependencies::Categorized { build, runtime }) => {
                Dependencies { build, runtime }
            }
            None => Dependencies::default(),
        };

        Ok((
            Self {
                name: raw.package.name,
                version,
                variant: raw.package.variant,
                sources,
                patches,
                environment: raw.environment,
                hooks,
                build_commands: raw.build.map(super::format::OneOrMany::into_vec).unwrap_or_default(),
                install_commands: raw
                    .install
                    .map(super::format::OneOrMany::into_vec)
                    .unwrap_or_default(),
                dependencies,
                options,
                extra: raw.rest,
            },
            warnings,
        ))
    }
}

fn normalize_source(raw: RawSource, origin: &str) -> Result<SourceEntry, Error> {
    match raw {
        RawSource::Url(url) => Ok(SourceEntry {
            kind: kind_from_url(&url),
            url,
            integrity: None,
            priority: 0,
            optional: false,
        }),
        RawSource::Detailed {
            url,
            kind,
            integrity,
            priority,
            optional,
        } => {
            let kind = match kind.as_deref() {
                None => kind_from_url(&url),
                Some("archive" | "file") => SourceKind::Archive,
                Some("vcs" | "git") => SourceKind::Vcs,
                Some(other) => {
                    return Err(RecipeError::InvalidSource {
                        path: origin.to_string(),
                        message: format!("unknown source kind `{other}`"),
                    }
                    .into())
                }
            };
            Ok(SourceEntry {
                url,
                kind,
                integrity,
                priority: priority.unwrap_or(0),
                optional: optional.unwrap_or(false),
            })
        }
    }
}

fn kind_from_url(url: &str) -> SourceKind {
    if url.starts_with("git+") || url.ends_with(".git") {
        SourceKind::Vcs
    } else {
        SourceKind::Archive
    }
}

fn normalize_patch(raw: RawPatch) -> PatchEntry {
    match raw {
        RawPatch::Path(path) => PatchEntry {
            path,
            strip_level: 1,
            stage: PATCH_STAGE.to_string(),
        },
        RawPatch::Detailed { path, strip, stage } => PatchEntry {
            path,
            strip_level: strip.unwrap_or(1),
            stage: stage.unwrap_or_else(|| PATCH_STAGE.to_string()),
        },
    }
}

fn normalize_options(raw: toml::Table) -> RecipeOptions {
    let meta = raw
        .get("meta")
        .and_then(toml::Value::as_bool)
        .unwrap_or(false);
    let strip_patterns = raw.get("strip_patterns").and_then(|v| {
        v.as_array().map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(ToString::to_string))
                .collect()
        })
    });
    let optional_hooks = raw
        .get("optional_hooks")
        .and_then(toml::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default();

    RecipeOptions {
        meta,
        strip_patterns,
        optional_hooks,
        raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(content: &str) -> (Recipe, Vec<String>) {
        Recipe::parse(content, &PathBuf::from("test.toml")).unwrap()
    }

    #[test]
    fn test_minimal_recipe() {
        let (recipe, warnings) = parse(
            r#"
            sources = ["https://zlib.net/zlib-1.3.tar.gz"]

            [package]
            name = "zlib"
            version = "1.3"
            "#,
        );
        assert_eq!(recipe.name, "zlib");
        assert_eq!(recipe.version.to_string(), "1.3");
        assert_eq!(recipe.sources.len(), 1);
        assert_eq!(recipe.sources[0].kind, SourceKind::Archive);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_single_string_source() {
        let (recipe, _) = parse(
            r#"
            source = "https://example.org/foo-1.0.tar.xz"

            [package]
            name = "foo"
            version = "1.0"
            "#,
        );
        assert_eq!(recipe.sources.len(), 1);
        assert_eq!(recipe.sources[0].priority, 0);
        assert!(!recipe.sources[0].optional);
    }

    #[test]
    fn test_detailed_sources_and_vcs_detection() {
        let (recipe, _) = parse(
            r#"
            [package]
            name = "bash"
            version = "5.2"

            [[sources]]
            url = "https://ftp.gnu.org/gnu/bash/bash-5.2.tar.gz"
            integrity = "sha256:a139c166df7ff4471c5e0733051642ee5556c1cc8a4a78f145583c5c81ab32fb"

            [[sources]]
            url = "git+https://git.savannah.gnu.org/git/bash.git"
            priority = -1
            optional = true
            "#,
        );
        assert_eq!(recipe.sources[0].kind, SourceKind::Archive);
        assert!(recipe.sources[0].integrity.is_some());
        assert_eq!(recipe.sources[1].kind, SourceKind::Vcs);
        assert!(recipe.sources[1].optional);
    }

    #[test]
    fn test_hooks_string_or_list() {
        let (recipe, warnings) = parse(
            r#"
            sources = ["https://example.org/a.tar.gz"]

            [package]
            name = "a"
            version = "1"

            [hooks]
            pre_build = "echo one"
            post_install = ["echo two", "echo three"]
            "#,
        );
        assert_eq!(recipe.hooks_for("pre_build"), ["echo one".to_string()]);
        assert_eq!(recipe.hooks_for("post_install").len(), 2);
        assert!(recipe.hooks_for("pre_fetch").is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unknown_hook_stage_warns() {
        let (_, warnings) = parse(
            r#"
            sources = ["https://example.org/a.tar.gz"]

            [package]
            name = "a"
            version = "1"

            [hooks]
            mid_build = "echo nope"
            "#,
        );
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("mid_build"));
    }

    #[test]
    fn test_simple_dependency_list_is_runtime() {
        let (recipe, _) = parse(
            r#"
            sources = ["https://example.org/a.tar.gz"]
            dependencies = ["zlib>=1.2", "openssl"]

            [package]
            name = "a"
            version = "1"
            "#,
        );
        assert!(recipe.dependencies.build.is_empty());
        assert_eq!(recipe.dependencies.runtime.len(), 2);
    }

    #[test]
    fn test_categorized_dependencies() {
        let (recipe, _) = parse(
            r#"
            sources = ["https://example.org/a.tar.gz"]

            [package]
            name = "a"
            version = "1"

            [dependencies]
            build = ["cmake"]
            runtime = ["zlib~=1.2"]
            "#,
        );
        assert_eq!(recipe.dependencies.build, ["cmake".to_string()]);
        assert_eq!(recipe.dependencies.all().len(), 2);
    }

    #[test]
    fn test_meta_recipe_without_sources() {
        let (recipe, _) = parse(
            r#"
            [package]
            name = "base-system"
            version = "1"

            [options]
            meta = true

            [dependencies]
            runtime = ["zlib", "bash"]
            "#,
        );
        assert!(recipe.options.meta);
        assert!(recipe.sources.is_empty());
    }

    #[test]
    fn test_missing_sources_is_fatal() {
        let err = Recipe::parse(
            r#"
            [package]
            name = "a"
            version = "1"
            "#,
            &PathBuf::from("a.toml"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no sources"));
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let (recipe, _) = parse(
            r#"
            sources = ["https://example.org/a.tar.gz"]
            maintainer = "nobody@example.org"

            [package]
            name = "a"
            version = "1"
            "#,
        );
        assert_eq!(
            recipe.extra.get("maintainer").and_then(|v| v.as_str()),
            Some("nobody@example.org")
        );
    }

    #[test]
    fn test_patch_defaults() {
        let (recipe, _) = parse(
            r#"
            sources = ["https://example.org/a.tar.gz"]
            patches = ["fix-build.patch", { path = "late.patch", strip = 0, stage = "pre_build" }]

            [package]
            name = "a"
            version = "1"
            "#,
        );
        assert_eq!(recipe.patches[0].strip_level, 1);
        assert_eq!(recipe.patches[0].stage, "patch");
        assert_eq!(recipe.patches[1].strip_level, 0);
        assert_eq!(recipe.patches[1].stage, "pre_build");
    }
}
