//! Engine construction and recipe lookup helpers

use portforge_build::{standard_overrides, BuildPipeline};
use portforge_config::Config;
use portforge_errors::{Error, RecipeError};
use portforge_events::EventSender;
use portforge_fetch::Fetcher;
use portforge_recipes::{Recipe, RecipeKey, RecipeStore};
use portforge_state::StateDb;
use portforge_types::PackageSpec;
use std::path::PathBuf;

/// Shared handles for one invocation
pub struct Engine {
    pub config: Config,
    pub store: RecipeStore,
    pub state: StateDb,
    pub fetcher: Fetcher,
    pub tx: EventSender,
}

impl Engine {
    /// Open the state database, scan the ports trees, build the fetcher
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be opened, the scan
    /// hits a fatal collision, or the HTTP client fails to initialize.
    pub async fn init(config: Config, tx: EventSender) -> Result<Self, Error> {
        let state = StateDb::open(&config.paths.state_db).await?;

        let mut store = RecipeStore::new();
        let report = store.scan(&config.paths.ports_dirs)?;
        for issue in &report.issues {
            tracing::warn!(path = %issue.path.display(), "{}", issue.message);
        }

        let fetcher = Fetcher::new(config.paths.dist_dir.clone(), config.fetch.clone())?
            .with_events(tx.clone());

        Ok(Self {
            config,
            store,
            state,
            fetcher,
            tx,
        })
    }

    #[must_use]
    pub fn pipeline(&self) -> BuildPipeline {
        BuildPipeline::new(
            self.fetcher.clone(),
            self.state.clone(),
            self.config.clone(),
        )
        .with_events(self.tx.clone())
    }

    /// Highest indexed version satisfying a request
    ///
    /// # Errors
    ///
    /// Returns [`RecipeError::NotFound`] when nothing matches.
    pub fn best_candidate(&self, spec: &PackageSpec) -> Result<RecipeKey, Error> {
        self.store
            .candidates(&spec.name)
            .into_iter()
            .find(|key| spec.matches(&key.version))
            .ok_or_else(|| {
                RecipeError::NotFound {
                    name: spec.name.clone(),
                    version: spec.spec.to_string(),
                }
                .into()
            })
    }

    /// Load a recipe with the standard build overrides expanded
    ///
    /// Returns the recipe and the directory of its file (for patch
    /// resolution); expansion warnings are printed.
    ///
    /// # Errors
    ///
    /// Returns an error when the recipe cannot be loaded.
    pub fn load_for_build(&self, key: &RecipeKey) -> Result<(Recipe, Option<PathBuf>), Error> {
        let overrides = standard_overrides(&key.name, &key.version.to_string());
        let loaded = self.store.load(key, &overrides)?;
        for warning in &loaded.warnings {
            eprintln!("warning: {warning}");
        }
        let recipe_dir = self
            .store
            .path_of(key)
            .and_then(|path| path.parent().map(std::path::Path::to_path_buf));
        Ok((loaded.recipe, recipe_dir))
    }
}
