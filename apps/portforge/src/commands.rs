//! Subcommand implementations

use crate::cli::RepoCommands;
use crate::setup::Engine;
use portforge_build::{
    deploy::DeployParams, pipeline::deploy_lock_path, remove_package, rollback, upgrade_deployed,
    BuildRequest,
};
use portforge_config::{Config, RepoConfig};
use portforge_errors::{Error, ResolveError};
use portforge_events::EventEmitter;
use portforge_resolver::{depclean, revdep, Resolver};
use portforge_state::InstalledRecord;
use portforge_types::PackageSpec;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

pub async fn scan(engine: &mut Engine) -> Result<(), Error> {
    let report = engine.store.scan(&engine.config.paths.ports_dirs)?;
    println!(
        "scanned {} recipe files, indexed {} ({} issues)",
        report.scanned,
        report.indexed,
        report.issues.len()
    );
    for issue in &report.issues {
        eprintln!("  {}: {}", issue.path.display(), issue.message);
    }
    Ok(())
}

pub fn search(engine: &Engine, query: &str) {
    let hits = engine.store.search(query);
    if hits.is_empty() {
        println!("no packages match `{query}`");
        return;
    }
    for key in hits {
        println!("{key}");
    }
}

pub fn info(engine: &Engine, pkgref: &str) -> Result<(), Error> {
    let spec = PackageSpec::parse(pkgref)?;
    let key = engine.best_candidate(&spec)?;
    let (recipe, _) = engine.load_for_build(&key)?;

    println!("name:     {}", recipe.name);
    println!("version:  {}", recipe.version);
    if let Some(variant) = &recipe.variant {
        println!("variant:  {variant}");
    }
    println!("sources:");
    for source in &recipe.sources {
        let verified = if source.integrity.is_some() { "verified" } else { "unverified" };
        println!("  {} ({verified})", source.url);
    }
    if !recipe.dependencies.build.is_empty() {
        println!("build deps:   {}", recipe.dependencies.build.join(", "));
    }
    if !recipe.dependencies.runtime.is_empty() {
        println!("runtime deps: {}", recipe.dependencies.runtime.join(", "));
    }
    if !recipe.patches.is_empty() {
        println!("patches:      {}", recipe.patches.len());
    }
    Ok(())
}

pub async fn fetch(engine: &Engine, pkgref: &str) -> Result<(), Error> {
    let spec = PackageSpec::parse(pkgref)?;
    let key = engine.best_candidate(&spec)?;
    let (recipe, _) = engine.load_for_build(&key)?;

    let report = engine
        .fetcher
        .fetch_all(&recipe, engine.config.fetch.parallel_limit)
        .await?;
    for outcome in &report.outcomes {
        let status = match &outcome.result {
            Ok(artifact) if artifact.integrity_verified => "ok (verified)",
            Ok(_) => "ok",
            Err(_) => "failed",
        };
        println!("{}: {status}", outcome.source.url);
    }
    Ok(())
}

pub async fn build(
    engine: &Engine,
    pkgref: &str,
    keep: bool,
    deploy: bool,
    dry_run: bool,
) -> Result<(), Error> {
    let spec = PackageSpec::parse(pkgref)?;
    let key = engine.best_candidate(&spec)?;
    let (recipe, recipe_dir) = engine.load_for_build(&key)?;

    let mut request = BuildRequest::new(recipe);
    request.recipe_dir = recipe_dir;
    request.keep_work = keep;
    request.deploy = deploy;
    request.dry_run = dry_run;

    let outcome = engine.pipeline().run(&request).await?;
    if let Some(archive) = &outcome.archive {
        println!("archive: {}", archive.display());
    }
    Ok(())
}

pub async fn install(engine: &Engine, pkgrefs: &[String], dry_run: bool) -> Result<(), Error> {
    let requests = pkgrefs
        .iter()
        .map(|r| PackageSpec::parse(r))
        .collect::<Result<Vec<_>, _>>()?;

    let installed = engine.state.installed_versions().await?;
    let plan = Resolver::new(&engine.store, installed).resolve(&requests)?;
    if plan.is_empty() {
        println!("nothing to do: all requests already satisfied");
        return Ok(());
    }
    println!("plan: {plan}");

    let pipeline = engine.pipeline();
    for entry in &plan.entries {
        let explicit = requests.iter().any(|r| r.name == entry.key.name);
        engine.tx.emit_operation_started(format!("install {}", entry.key));
        let (recipe, recipe_dir) = engine.load_for_build(&entry.key)?;
        let mut request = BuildRequest::new(recipe);
        request.recipe_dir = recipe_dir;
        request.deploy = true;
        request.explicit = explicit;
        request.dry_run = dry_run;
        let result = pipeline.run(&request).await;
        engine
            .tx
            .emit_operation_completed(format!("install {}", entry.key), result.is_ok());
        result?;
    }
    Ok(())
}

pub async fn remove(
    engine: &Engine,
    pkgrefs: &[String],
    force: bool,
    dry_run: bool,
) -> Result<(), Error> {
    for pkgref in pkgrefs {
        let spec = PackageSpec::parse(pkgref)?;
        let outcome =
            remove_package(&engine.state, &spec.name, force, dry_run, Some(&engine.tx)).await?;
        if !outcome.removed() {
            eprintln!(
                "{} is required by: {}",
                spec.name,
                outcome.blocked_by.join(", ")
            );
            return Err(ResolveError::HasDependents {
                name: spec.name,
                dependents: outcome.blocked_by.join(", "),
            }
            .into());
        }
        if dry_run {
            println!(
                "would remove {} ({} files)",
                spec.name, outcome.files_removed
            );
        }
    }
    Ok(())
}

pub async fn upgrade(engine: &Engine, pkgref: &str) -> Result<(), Error> {
    let spec = PackageSpec::parse(pkgref)?;
    let record = engine.state.get_installed(&spec.name).await?;
    upgrade_one(engine, &spec, record.as_ref()).await
}

pub async fn upgrade_all(engine: &Engine) -> Result<(), Error> {
    for record in engine.state.list_installed().await? {
        let spec = PackageSpec::any(record.name.clone());
        upgrade_one(engine, &spec, Some(&record)).await?;
    }
    Ok(())
}

async fn upgrade_one(
    engine: &Engine,
    spec: &PackageSpec,
    record: Option<&InstalledRecord>,
) -> Result<(), Error> {
    let key = engine.best_candidate(spec)?;
    if let Some(record) = record {
        if let Ok(installed) = portforge_types::Version::parse(&record.version) {
            if key.version <= installed {
                println!("{} is up to date ({installed})", spec.name);
                return Ok(());
            }
        }
    }

    let (recipe, recipe_dir) = engine.load_for_build(&key)?;
    let mut request = BuildRequest::new(recipe.clone());
    request.recipe_dir = recipe_dir;

    let outcome = engine.pipeline().run(&request).await?;
    let archive = outcome
        .archive
        .ok_or_else(|| Error::internal("build produced no archive"))?;

    let lock_path = deploy_lock_path(&engine.config);
    let params = DeployParams {
        target_root: &engine.config.paths.target_root,
        backup_root: &engine.config.paths.backup_root,
        lock_path: &lock_path,
        state: &engine.state,
        explicit: record.is_none_or(|r| r.explicit),
    };
    upgrade_deployed(
        &archive,
        &recipe,
        &params,
        engine.config.build.rollback_on_verify_failure,
        Some(&engine.tx),
    )
    .await?;
    println!("upgraded {} to {}", recipe.name, recipe.version);
    Ok(())
}

pub async fn depclean_cmd(engine: &Engine, apply: bool) -> Result<(), Error> {
    let orphans = depclean(&engine.state).await?;
    if orphans.is_empty() {
        println!("no orphans");
        return Ok(());
    }
    for orphan in &orphans {
        println!("{orphan}");
    }
    if apply {
        for orphan in &orphans {
            remove_package(&engine.state, orphan, false, false, Some(&engine.tx)).await?;
        }
    }
    Ok(())
}

pub async fn revdep_cmd(engine: &Engine, pkgref: &str) -> Result<(), Error> {
    let spec = PackageSpec::parse(pkgref)?;
    let dependents = revdep(&engine.state, &spec.name).await?;
    if dependents.is_empty() {
        println!("nothing depends on {}", spec.name);
    } else {
        for dependent in dependents {
            println!("{dependent}");
        }
    }
    Ok(())
}

pub async fn rollback_cmd(engine: &Engine, deploy_id: &str) -> Result<(), Error> {
    let restored = rollback(
        &engine.config.paths.backup_root,
        deploy_id,
        &engine.state,
        Some(&engine.tx),
    )
    .await?;
    println!("restored {restored} files");
    Ok(())
}

pub async fn history(engine: &Engine) -> Result<(), Error> {
    let mut records = engine.state.list_installed().await?;
    records.sort_by_key(|r| std::cmp::Reverse(r.install_date));
    for record in records {
        let when = chrono::DateTime::from_timestamp(record.install_date, 0)
            .map_or_else(|| "unknown".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        let marker = if record.explicit { "" } else { " (dependency)" };
        println!("{when}  {}-{}{marker}", record.name, record.version);
    }
    Ok(())
}

pub async fn logs(config: &Config, file: Option<PathBuf>, bytes: u64) -> Result<(), Error> {
    let path = match file {
        Some(path) => path,
        None => most_recent_log(&config.paths.log_dir)?,
    };

    let mut file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| Error::io_with_path(&e, &path))?;
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(bytes);
    file.seek(SeekFrom::Start(start)).await?;
    let mut content = String::new();
    file.read_to_string(&mut content).await?;
    print!("{content}");
    Ok(())
}

fn most_recent_log(log_dir: &Path) -> Result<PathBuf, Error> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(log_dir)
        .map_err(|e| Error::io_with_path(&e, log_dir))?
        .filter_map(Result::ok)
    {
        let Ok(metadata) = entry.metadata() else { continue };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(std::time::UNIX_EPOCH);
        if newest.as_ref().is_none_or(|(ts, _)| modified > *ts) {
            newest = Some((modified, entry.path()));
        }
    }
    newest
        .map(|(_, path)| path)
        .ok_or_else(|| Error::internal(format!("no log files under {}", log_dir.display())))
}

pub async fn repo(config: &mut Config, config_path: &Path, command: RepoCommands) -> Result<(), Error> {
    match command {
        RepoCommands::Add { name, url, path } => {
            let path = path.unwrap_or_else(|| {
                config
                    .paths
                    .ports_dirs
                    .first()
                    .cloned()
                    .unwrap_or_else(|| PathBuf::from("/usr/ports"))
                    .join(&name)
            });
            config.repos.insert(name.clone(), RepoConfig { url, path });
            save_config(config, config_path).await?;
            println!("added repo {name}");
        }
        RepoCommands::Remove { name } => {
            config.repo(&name)?;
            config.repos.remove(&name);
            save_config(config, config_path).await?;
            println!("removed repo {name}");
        }
        RepoCommands::List => {
            for (name, repo) in &config.repos {
                println!("{name}: {} -> {}", repo.url, repo.path.display());
            }
        }
        RepoCommands::Sync { name } => {
            let targets: Vec<(String, RepoConfig)> = match name {
                Some(name) => vec![(name.clone(), config.repo(&name)?.clone())],
                None => config
                    .repos
                    .iter()
                    .map(|(n, r)| (n.clone(), r.clone()))
                    .collect(),
            };
            for (name, repo) in targets {
                sync_repo(&name, &repo).await?;
            }
            println!("sync complete; run `portforge scan` to rebuild the index");
        }
    }
    Ok(())
}

/// Repositories are opaque recipe-directory providers: a git URL or an
/// rsync-able path
async fn sync_repo(name: &str, repo: &RepoConfig) -> Result<(), Error> {
    println!("syncing {name} from {}", repo.url);
    let is_git = repo.url.ends_with(".git") || repo.url.starts_with("git");

    let status = if is_git {
        if repo.path.join(".git").exists() {
            tokio::process::Command::new("git")
                .args(["-C"])
                .arg(&repo.path)
                .args(["pull", "--ff-only"])
                .status()
                .await
        } else {
            tokio::process::Command::new("git")
                .arg("clone")
                .arg(&repo.url)
                .arg(&repo.path)
                .status()
                .await
        }
    } else {
        tokio::process::Command::new("rsync")
            .arg("-a")
            .arg(format!("{}/", repo.url.trim_end_matches('/')))
            .arg(&repo.path)
            .status()
            .await
    };

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(Error::internal(format!(
            "sync of {name} exited with {status}"
        ))),
        Err(e) => Err(Error::internal(format!("sync of {name} failed: {e}"))),
    }
}

async fn save_config(config: &Config, path: &Path) -> Result<(), Error> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::internal(format!("config serialize: {e}")))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    Ok(())
}
