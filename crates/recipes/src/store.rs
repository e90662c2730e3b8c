//! Ports-tree scanning and the recipe index

use crate::expand::{expand_all, expand_tokens};
use crate::recipe::{Recipe, RecipeKey};
use portforge_errors::{Error, RecipeError};
use portforge_types::Version;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// One non-fatal problem found while scanning
#[derive(Debug, Clone)]
pub struct ScanIssue {
    pub path: PathBuf,
    pub message: String,
}

/// Result of a scan pass
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Recipe files visited
    pub scanned: usize,
    /// Recipes admitted to the index
    pub indexed: usize,
    pub issues: Vec<ScanIssue>,
}

/// A recipe loaded with its environment expanded
#[derive(Debug, Clone)]
pub struct LoadedRecipe {
    pub recipe: Recipe,
    /// Unresolved tokens and validation notes
    pub warnings: Vec<String>,
}

/// Index over one or more ports trees, keyed by (name, version, variant)
#[derive(Debug, Default)]
pub struct RecipeStore {
    index: HashMap<RecipeKey, PathBuf>,
    by_name: BTreeMap<String, Vec<RecipeKey>>,
    issues: Vec<ScanIssue>,
}

impl RecipeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk the ports trees and rebuild the index
    ///
    /// Validation problems are recorded in the report, not raised; only
    /// a `(name, version, variant)` collision is fatal. Re-scanning is
    /// idempotent: the index is rebuilt from scratch each time.
    ///
    /// # Errors
    ///
    /// Returns an error when two recipe files collide on the same key.
    pub fn scan(&mut self, ports_dirs: &[PathBuf]) -> Result<ScanReport, Error> {
        self.index.clear();
        self.by_name.clear();
        self.issues.clear();

        let mut report = ScanReport::default();

        for dir in ports_dirs {
            if !dir.exists() {
                report.issues.push(ScanIssue {
                    path: dir.clone(),
                    message: "ports directory does not exist".to_string(),
                });
                continue;
            }
            for entry in WalkDir::new(dir)
                .follow_links(false)
                .into_iter()
                .filter_map(Result::ok)
            {
                if !entry.file_type().is_file()
                    || entry.path().extension().is_none_or(|ext| ext != "toml")
                {
                    continue;
                }
                report.scanned += 1;
                self.scan_one(entry.path(), &mut report)?;
            }
        }

        self.issues.clone_from(&report.issues);
        debug!(
            indexed = report.indexed,
            issues = report.issues.len(),
            "recipe scan finished"
        );
        Ok(report)
    }

    fn scan_one(&mut self, path: &Path, report: &mut ScanReport) -> Result<(), Error> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                report.issues.push(ScanIssue {
                    path: path.to_path_buf(),
                    message: format!("unreadable: {e}"),
                });
                return Ok(());
            }
        };

        let (recipe, warnings) = match Recipe::parse(&content, path) {
            Ok(parsed) => parsed,
            Err(e) => {
                report.issues.push(ScanIssue {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                });
                return Ok(());
            }
        };
        for warning in warnings {
            report.issues.push(ScanIssue {
                path: path.to_path_buf(),
                message: warning,
            });
        }

        let key = recipe.key();
        if let Some(existing) = self.index.get(&key) {
            return Err(RecipeError::DuplicateRecipe {
                name: key.name,
                version: key.version.to_string(),
                variant: key.variant.unwrap_or_else(|| "default".to_string()),
                first: existing.display().to_string(),
                second: path.display().to_string(),
            }
            .into());
        }

        self.by_name
            .entry(key.name.clone())
            .or_default()
            .push(key.clone());
        self.index.insert(key, path.to_path_buf());
        report.indexed += 1;
        Ok(())
    }

    /// Load a recipe by key and expand `{VAR}` tokens
    ///
    /// The expansion environment is the recipe's own `environment`
    /// merged with `overrides` (overrides win). Unresolved tokens stay
    /// literal and are reported as warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the file no longer
    /// parses.
    pub fn load(
        &self,
        key: &RecipeKey,
        overrides: &BTreeMap<String, String>,
    ) -> Result<LoadedRecipe, Error> {
        let path = self.index.get(key).ok_or_else(|| RecipeError::NotFound {
            name: key.name.clone(),
            version: key.version.to_string(),
        })?;

        let content = std::fs::read_to_string(path).map_err(|e| RecipeError::ParseError {
            message: format!("{}: {e}", path.display()),
        })?;
        let (mut recipe, mut warnings) = Recipe::parse(&content, path)?;

        let mut env = recipe.environment.clone();
        for (k, v) in overrides {
            env.insert(k.clone(), v.clone());
        }

        let mut note_unresolved = |mut missing: Vec<String>, what: &str, warnings: &mut Vec<String>| {
            missing.retain(|name| {
                !warnings
                    .iter()
                    .any(|w| w.contains(&format!("{{{name}}}")))
            });
            for name in missing {
                warnings.push(format!("unresolved token {{{name}}} in {what}"));
            }
        };

        for source in &mut recipe.sources {
            let (url, missing) = expand_tokens(&source.url, &env);
            source.url = url;
            note_unresolved(missing, "source url", &mut warnings);
        }
        let (build, missing) = expand_all(&recipe.build_commands, &env);
        recipe.build_commands = build;
        note_unresolved(missing, "build commands", &mut warnings);

        let (install, missing) = expand_all(&recipe.install_commands, &env);
        recipe.install_commands = install;
        note_unresolved(missing, "install commands", &mut warnings);

        let mut expanded_hooks = BTreeMap::new();
        for (stage, commands) in &recipe.hooks {
            let (expanded, missing) = expand_all(commands, &env);
            note_unresolved(missing, &format!("hooks.{stage}"), &mut warnings);
            expanded_hooks.insert(stage.clone(), expanded);
        }
        recipe.hooks = expanded_hooks;

        Ok(LoadedRecipe { recipe, warnings })
    }

    /// All indexed versions of `name`, descending
    #[must_use]
    pub fn candidates(&self, name: &str) -> Vec<RecipeKey> {
        let mut keys = self.by_name.get(name).cloned().unwrap_or_default();
        keys.sort_by(|a, b| b.version.cmp(&a.version));
        keys
    }

    /// Substring search over package names
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<RecipeKey> {
        let query = query.to_ascii_lowercase();
        let mut hits: Vec<RecipeKey> = self
            .by_name
            .iter()
            .filter(|(name, _)| name.to_ascii_lowercase().contains(&query))
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name).then(b.version.cmp(&a.version)));
        hits
    }

    /// Exact lookup
    #[must_use]
    pub fn get(&self, name: &str, version: &Version) -> Option<RecipeKey> {
        self.by_name.get(name).and_then(|keys| {
            keys.iter()
                .find(|key| &key.version == version)
                .cloned()
        })
    }

    /// Path backing a key
    #[must_use]
    pub fn path_of(&self, key: &RecipeKey) -> Option<&Path> {
        self.index.get(key).map(PathBuf::as_path)
    }

    /// Issues recorded by the last scan
    #[must_use]
    pub fn issues(&self) -> &[ScanIssue] {
        &self.issues
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
