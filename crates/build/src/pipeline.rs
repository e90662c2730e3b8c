//! The per-recipe build pipeline

use crate::context::{BuildContext, BuildRequest, STAGE_DIR};
use crate::deploy::{atomic_deploy, DeployParams};
use crate::extract::{extract_artifact, source_subdir};
use crate::packaging;
use crate::patch::apply_patch;
use crate::strip::strip_staging;
use portforge_config::Config;
use portforge_errors::{BuildError, Error};
use portforge_events::{
    AppEvent, BuildEvent, EventEmitter, EventLevel, EventSender,
};
use portforge_fetch::Fetcher;
use portforge_recipes::{Recipe, PATCH_STAGE};
use portforge_sandbox::{CommandSpec, Sandbox};
use portforge_state::{EventRecord, StateDb};
use portforge_types::PackageId;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result of one pipeline run
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub package: PackageId,
    /// The produced archive, absent on dry runs
    pub archive: Option<PathBuf>,
    /// Set when the pipeline continued into deployment
    pub deploy_id: Option<String>,
}

/// Drives fetch through deploy for one recipe at a time
///
/// Handles are injected; the pipeline owns only its per-build scratch
/// tree.
pub struct BuildPipeline {
    fetcher: Fetcher,
    state: StateDb,
    config: Config,
    tx: Option<EventSender>,
}

impl EventEmitter for BuildPipeline {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl BuildPipeline {
    #[must_use]
    pub fn new(fetcher: Fetcher, state: StateDb, config: Config) -> Self {
        Self {
            fetcher,
            state,
            config,
            tx: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Run the pipeline for one recipe
    ///
    /// Stages run strictly in order, with recipe hooks before and
    /// after each. The work tree is removed on success and kept on
    /// failure when the request (or config) asks for it.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::StageFailed`] naming the failing stage;
    /// the failure is also recorded as an `ERROR` event.
    pub async fn run(&self, request: &BuildRequest) -> Result<BuildOutcome, Error> {
        let recipe = &request.recipe;
        let name = recipe.name.clone();
        let version = recipe.version.clone();
        let ctx = BuildContext::new(
            &self.config.paths.build_root,
            &self.config.paths.package_dir,
            &self.config.paths.log_dir,
            &name,
            &version.to_string(),
            &self.config.build.compression,
        );

        self.state
            .append_event(&EventRecord::new(
                Some(name.clone()),
                "pipeline",
                EventLevel::Info,
                format!("build of {name}-{version} started"),
            ))
            .await;

        tokio::fs::create_dir_all(&ctx.work_dir).await?;
        tokio::fs::create_dir_all(&ctx.staging_dir).await?;

        let mut sandbox = Sandbox::new(&ctx.sandbox_root, self.config.sandbox.clone())
            .with_label(&name)
            .with_log_file(&ctx.log_file)
            .with_dry_run(request.dry_run);
        if let Some(tx) = &self.tx {
            sandbox = sandbox.with_events(tx.clone());
        }

        let result = self.execute(&mut sandbox, request, &ctx).await;
        // mounts always come down, whatever happened above
        sandbox.cleanup().await;

        match result {
            Ok(outcome) => {
                if !request.keep_work {
                    let _ = tokio::fs::remove_dir_all(&ctx.prefix).await;
                }
                self.state
                    .append_event(&EventRecord::new(
                        Some(name),
                        "pipeline",
                        EventLevel::Info,
                        format!("build of {version} finished"),
                    ))
                    .await;
                Ok(outcome)
            }
            Err(err) => {
                let keep = request.keep_work || self.config.build.keep_work_on_failure;
                if !keep {
                    let _ = tokio::fs::remove_dir_all(&ctx.prefix).await;
                }
                self.state
                    .append_event(&EventRecord::new(
                        Some(name.clone()),
                        "pipeline",
                        EventLevel::Error,
                        err.to_string(),
                    ))
                    .await;
                append_log_line(&ctx.log_file, &format!("ERROR: {err}")).await;
                self.emit(AppEvent::Build(BuildEvent::Failed {
                    package: name,
                    stage: stage_of(&err),
                    error: err.to_string(),
                }));
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        sandbox: &mut Sandbox,
        request: &BuildRequest,
        ctx: &BuildContext,
    ) -> Result<BuildOutcome, Error> {
        let recipe = &request.recipe;
        let env = build_env(recipe, &ctx.staging_dir, self.config.sandbox.isolate);

        sandbox
            .prepare()
            .await
            .map_err(|e| stage_error("prepare", recipe, &e))?;

        // fetch
        self.stage_point(sandbox, recipe, request, ctx, "pre_fetch", "/").await?;
        self.emit_stage(recipe, "fetch", true);
        let report = self
            .fetch_sources(recipe, request.dry_run)
            .await
            .map_err(|e| stage_error("fetch", recipe, &e))?;
        self.emit_stage(recipe, "fetch", false);
        self.stage_point(sandbox, recipe, request, ctx, "post_fetch", "/").await?;

        // extract
        self.stage_point(sandbox, recipe, request, ctx, "pre_extract", "/").await?;
        self.emit_stage(recipe, "extract", true);
        if !request.dry_run {
            for artifact in report.artifacts() {
                extract_artifact(&artifact.path, &ctx.work_dir)
                    .await
                    .map_err(|e| stage_error("extract", recipe, &e))?;
            }
        }
        self.emit_stage(recipe, "extract", false);
        let src_dir = if request.dry_run {
            ctx.work_dir.clone()
        } else {
            source_subdir(&ctx.work_dir)
        };
        let cwd = sandbox_cwd(&ctx.sandbox_root, &src_dir);
        self.stage_point(sandbox, recipe, request, ctx, "post_extract", &cwd).await?;

        // patch
        self.stage_point(sandbox, recipe, request, ctx, "pre_patch", &cwd).await?;
        self.emit_stage(recipe, "patch", true);
        if !request.dry_run {
            for entry in recipe.patches.iter().filter(|p| p.stage == PATCH_STAGE) {
                apply_patch(entry, request.recipe_dir.as_deref(), &src_dir)
                    .await
                    .map_err(|e| stage_error("patch", recipe, &e))?;
            }
        }
        self.emit_stage(recipe, "patch", false);
        self.stage_point(sandbox, recipe, request, ctx, "post_patch", &cwd).await?;

        // configure + build
        self.stage_point(sandbox, recipe, request, ctx, "pre_configure", &cwd).await?;
        self.stage_point(sandbox, recipe, request, ctx, "pre_build", &cwd).await?;
        self.emit_stage(recipe, "build", true);
        for command in &recipe.build_commands {
            sandbox
                .run_checked(&CommandSpec::shell(command.clone()), &env, &cwd)
                .await
                .map_err(|e| stage_error("build", recipe, &e))?;
        }
        self.emit_stage(recipe, "build", false);
        self.stage_point(sandbox, recipe, request, ctx, "post_build", &cwd).await?;

        // install into staging
        self.stage_point(sandbox, recipe, request, ctx, "pre_install", &cwd).await?;
        self.emit_stage(recipe, "install", true);
        for command in &recipe.install_commands {
            sandbox
                .run_as_installer(&CommandSpec::shell(command.clone()), &env, &cwd)
                .await
                .map_err(|e| stage_error("install", recipe, &e))?;
        }
        self.emit_stage(recipe, "install", false);
        self.stage_point(sandbox, recipe, request, ctx, "post_install", &cwd).await?;

        // strip
        self.stage_point(sandbox, recipe, request, ctx, "pre_strip", &cwd).await?;
        if !request.dry_run {
            let patterns = recipe
                .options
                .strip_patterns
                .clone()
                .unwrap_or_else(|| self.config.build.strip_patterns.clone());
            let stripped = strip_staging(&ctx.staging_dir, &patterns, self.tx.as_ref())
                .await
                .map_err(|e| stage_error("strip", recipe, &e))?;
            self.emit(AppEvent::Build(BuildEvent::Stripped {
                package: recipe.name.clone(),
                files: stripped,
            }));
        }
        self.stage_point(sandbox, recipe, request, ctx, "post_strip", &cwd).await?;

        // package
        self.stage_point(sandbox, recipe, request, ctx, "pre_package", &cwd).await?;
        let archive = if request.dry_run {
            None
        } else {
            self.emit_stage(recipe, "package", true);
            let mut metadata = BTreeMap::new();
            if let Some(variant) = &recipe.variant {
                metadata.insert("variant".to_string(), variant.clone());
            }
            let manifest = packaging::manifest_for_staging(
                &ctx.staging_dir,
                &recipe.name,
                &recipe.version.to_string(),
                metadata,
            )
            .await
            .map_err(|e| stage_error("package", recipe, &e))?;
            packaging::create_package(
                &ctx.staging_dir,
                &ctx.archive_path,
                &manifest,
                &self.config.build.compression,
            )
            .await
            .map_err(|e| stage_error("package", recipe, &e))?;
            self.emit(AppEvent::Build(BuildEvent::Packaged {
                package: recipe.name.clone(),
                version: recipe.version.clone(),
                archive: ctx.archive_path.clone(),
            }));
            Some(ctx.archive_path.clone())
        };
        self.stage_point(sandbox, recipe, request, ctx, "post_package", &cwd).await?;

        // deploy
        let deploy_id = if request.deploy && !request.dry_run {
            self.stage_point(sandbox, recipe, request, ctx, "pre_deploy", "/").await?;
            let params = DeployParams {
                target_root: &self.config.paths.target_root,
                backup_root: &self.config.paths.backup_root,
                lock_path: &deploy_lock_path(&self.config),
                state: &self.state,
                explicit: request.explicit,
            };
            let id = atomic_deploy(
                ctx.archive_path.as_path(),
                recipe,
                &params,
                self.tx.as_ref(),
            )
            .await
            .map_err(|e| stage_error("deploy", recipe, &e))?;
            self.stage_point(sandbox, recipe, request, ctx, "post_deploy", "/").await?;
            Some(id)
        } else {
            None
        };

        Ok(BuildOutcome {
            package: PackageId::new(recipe.name.clone(), recipe.version.clone()),
            archive,
            deploy_id,
        })
    }

    /// Fetch all sources and persist the transport warnings
    async fn fetch_sources(
        &self,
        recipe: &Recipe,
        dry_run: bool,
    ) -> Result<portforge_fetch::FetchReport, Error> {
        if dry_run {
            self.emit_debug(format!("would fetch {} sources", recipe.sources.len()));
            return Ok(portforge_fetch::FetchReport::default());
        }

        // missing integrity over plain http is worth a persistent WARN
        for source in &recipe.sources {
            if source.integrity.is_none() && source.url.starts_with("http://") {
                self.state
                    .append_event(&EventRecord::new(
                        Some(recipe.name.clone()),
                        "fetch",
                        EventLevel::Warn,
                        format!(
                            "source {} has no integrity and uses an unauthenticated transport",
                            source.url
                        ),
                    ))
                    .await;
            }
        }

        self.fetcher
            .fetch_all(recipe, self.config.fetch.parallel_limit)
            .await
    }

    /// Run one hook point: stage-scoped patches first, then hooks
    async fn stage_point(
        &self,
        sandbox: &mut Sandbox,
        recipe: &Recipe,
        request: &BuildRequest,
        ctx: &BuildContext,
        point: &str,
        cwd: &str,
    ) -> Result<(), Error> {
        if !request.dry_run {
            let src_dir = source_subdir(&ctx.work_dir);
            for entry in recipe.patches.iter().filter(|p| p.stage == point) {
                apply_patch(entry, request.recipe_dir.as_deref(), &src_dir)
                    .await
                    .map_err(|e| stage_error(point, recipe, &e))?;
            }
        }

        let env = build_env(recipe, &ctx.staging_dir, self.config.sandbox.isolate);
        for command in recipe.hooks_for(point) {
            self.emit(AppEvent::Build(BuildEvent::HookRunning {
                package: recipe.name.clone(),
                stage: point.to_string(),
                command: command.clone(),
            }));
            let result = sandbox
                .run_checked(&CommandSpec::shell(command.clone()), &env, cwd)
                .await;
            if let Err(err) = result {
                if recipe.hook_is_fatal(point) {
                    return Err(BuildError::HookFailed {
                        hook: command.clone(),
                        stage: point.to_string(),
                        recipe: recipe.name.clone(),
                        message: err.to_string(),
                    }
                    .into());
                }
                self.emit_warning(format!(
                    "optional hook at {point} failed for {}: {err}",
                    recipe.name
                ));
            }
        }
        Ok(())
    }

    fn emit_stage(&self, recipe: &Recipe, stage: &str, started: bool) {
        debug!(package = %recipe.name, stage, started, "stage transition");
        let event = if started {
            BuildEvent::StageStarted {
                package: recipe.name.clone(),
                stage: stage.to_string(),
            }
        } else {
            BuildEvent::StageCompleted {
                package: recipe.name.clone(),
                stage: stage.to_string(),
            }
        };
        self.emit(AppEvent::Build(event));
    }
}

/// Lock file guarding deploys for this configuration
#[must_use]
pub fn deploy_lock_path(config: &Config) -> PathBuf {
    config.paths.state_db.with_extension("deploy.lock")
}

async fn append_log_line(log_file: &Path, line: &str) {
    use tokio::io::AsyncWriteExt;

    if let Some(parent) = log_file.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    if let Ok(mut file) = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .await
    {
        let _ = file.write_all(line.as_bytes()).await;
        let _ = file.write_all(b"\n").await;
    }
}

fn build_env(recipe: &Recipe, staging_dir: &Path, isolate: bool) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = recipe
        .environment
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let jobs = std::cmp::max(1, num_cpus::get());
    // inside the chroot the staging tree is /stage; without isolation
    // commands see the host path
    let destdir = if isolate {
        format!("/{STAGE_DIR}")
    } else {
        staging_dir.display().to_string()
    };
    env.entry("DESTDIR".to_string()).or_insert(destdir);
    env.entry("PREFIX".to_string()).or_insert_with(|| "/usr".to_string());
    env.entry("JOBS".to_string()).or_insert_with(|| jobs.to_string());
    env.entry("MAKEFLAGS".to_string())
        .or_insert_with(|| format!("-j{jobs}"));
    env
}

/// Path of the source dir as seen from inside the sandbox
fn sandbox_cwd(sandbox_root: &Path, src_dir: &Path) -> String {
    match src_dir.strip_prefix(sandbox_root) {
        Ok(rel) if rel.as_os_str().is_empty() => "/".to_string(),
        Ok(rel) => format!("/{}", rel.display()),
        Err(_) => "/".to_string(),
    }
}

fn stage_error(stage: &str, recipe: &Recipe, err: &Error) -> Error {
    BuildError::StageFailed {
        stage: stage.to_string(),
        recipe: format!("{}-{}", recipe.name, recipe.version),
        message: err.to_string(),
    }
    .into()
}

fn stage_of(err: &Error) -> String {
    match err {
        Error::Build(BuildError::StageFailed { stage, .. })
        | Error::Build(BuildError::HookFailed { stage, .. }) => stage.clone(),
        _ => "unknown".to_string(),
    }
}
