//! End-to-end tests for packaging, deployment, rollback, and removal
//!
//! Deploys here target a scratch directory, so no privilege is needed.

use portforge_build::{
    atomic_deploy, packaging, remove_package, rollback, upgrade_deployed,
    deploy::DeployParams, BuildPipeline, BuildRequest,
};
use portforge_config::Config;
use portforge_fetch::{cache as fetch_cache, Fetcher};
use portforge_recipes::Recipe;
use portforge_state::StateDb;
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

fn recipe(name: &str, version: &str, runtime_deps: &[&str]) -> Recipe {
    let dep_list = runtime_deps
        .iter()
        .map(|d| format!("\"{d}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let content = format!(
        r#"
sources = ["https://example.org/{name}-{version}.tar.gz"]

[package]
name = "{name}"
version = "{version}"

[dependencies]
runtime = [{dep_list}]
"#
    );
    Recipe::parse(&content, &PathBuf::from(format!("{name}.toml")))
        .unwrap()
        .0
}

fn write_staged(staging: &Path, rel: &str, content: &str, executable: bool) {
    let path = staging.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    if executable {
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

async fn make_archive(dir: &TempDir, recipe: &Recipe, files: &[(&str, &str, bool)]) -> PathBuf {
    let staging = dir
        .path()
        .join(format!("staging-{}-{}", recipe.name, recipe.version));
    for (rel, content, executable) in files {
        write_staged(&staging, rel, content, *executable);
    }
    let manifest = packaging::manifest_for_staging(
        &staging,
        &recipe.name,
        &recipe.version.to_string(),
        BTreeMap::new(),
    )
    .await
    .unwrap();
    let archive = dir
        .path()
        .join(format!("{}-{}.tar.gz", recipe.name, recipe.version));
    packaging::create_package(&staging, &archive, &manifest, "gz")
        .await
        .unwrap();
    archive
}

struct Env {
    _dir: TempDir,
    target_root: PathBuf,
    backup_root: PathBuf,
    lock_path: PathBuf,
    state: StateDb,
}

async fn env() -> (TempDir, Env) {
    let dir = tempdir().unwrap();
    let target_root = dir.path().join("target");
    let backup_root = dir.path().join("backups");
    let lock_path = dir.path().join("deploy.lock");
    std::fs::create_dir_all(&target_root).unwrap();
    let state = StateDb::open(&dir.path().join("state.sqlite3")).await.unwrap();
    let work = tempdir().unwrap();
    (
        work,
        Env {
            _dir: dir,
            target_root,
            backup_root,
            lock_path,
            state,
        },
    )
}

impl Env {
    fn params(&self) -> DeployParams<'_> {
        DeployParams {
            target_root: &self.target_root,
            backup_root: &self.backup_root,
            lock_path: &self.lock_path,
            state: &self.state,
            explicit: true,
        }
    }
}

/// Pipeline config rooted in a scratch directory; isolation is off so
/// commands run on the host without privilege
fn pipeline_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.paths.build_root = dir.path().join("build");
    config.paths.package_dir = dir.path().join("packages");
    config.paths.log_dir = dir.path().join("logs");
    config.paths.dist_dir = dir.path().join("distfiles");
    config.paths.backup_root = dir.path().join("backups");
    config.paths.state_db = dir.path().join("state.sqlite3");
    config.paths.target_root = dir.path().join("target");
    config.build.compression = "gz".to_string();
    config.sandbox.isolate = false;
    config.sandbox.copy_resolv_conf = false;
    config
}

/// Pre-seed the fetch cache so the pipeline's fetch stage hits it
/// without touching the network (the URL points at a refused port)
fn seed_source_tarball(dist_dir: &Path, url: &str, topdir: &str) {
    std::fs::create_dir_all(dist_dir).unwrap();
    let path = fetch_cache::cache_path(dist_dir, url);
    let file = std::fs::File::create(&path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let data = b"source tree\n";
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{topdir}/README"), &data[..])
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

async fn pipeline_for(config: &Config) -> BuildPipeline {
    let state = StateDb::open(&config.paths.state_db).await.unwrap();
    let fetcher = Fetcher::new(config.paths.dist_dir.clone(), config.fetch.clone()).unwrap();
    BuildPipeline::new(fetcher, state, config.clone())
}

fn pipeline_recipe(name: &str, version: &str, build: &[&str], install: &[&str]) -> Recipe {
    let mut recipe = recipe(name, version, &[]);
    recipe.sources[0].url = format!("http://127.0.0.1:1/{name}-{version}.tar.gz");
    recipe.build_commands = build.iter().map(ToString::to_string).collect();
    recipe.install_commands = install.iter().map(ToString::to_string).collect();
    recipe
}

#[tokio::test]
async fn test_pipeline_builds_packages_and_deploys() {
    let dir = tempdir().unwrap();
    let config = pipeline_config(&dir);
    let recipe = pipeline_recipe(
        "tool",
        "1.0",
        &["test -f README"],
        &[r#"mkdir -p "$DESTDIR/usr/bin" && printf tool > "$DESTDIR/usr/bin/tool""#],
    );
    seed_source_tarball(&config.paths.dist_dir, &recipe.sources[0].url, "tool-1.0");

    let pipeline = pipeline_for(&config).await;
    let mut request = BuildRequest::new(recipe);
    request.deploy = true;

    let outcome = pipeline.run(&request).await.unwrap();

    let archive = outcome.archive.unwrap();
    assert!(archive.is_file());
    let manifest = packaging::read_manifest(&archive).await.unwrap();
    assert_eq!(manifest.files.len(), 1);
    assert_eq!(manifest.files[0].relpath, "usr/bin/tool");

    assert!(outcome.deploy_id.is_some());
    assert_eq!(
        std::fs::read_to_string(config.paths.target_root.join("usr/bin/tool")).unwrap(),
        "tool"
    );
    let state = StateDb::open(&config.paths.state_db).await.unwrap();
    let record = state.get_installed("tool").await.unwrap().unwrap();
    assert_eq!(record.version, "1.0");
    // the work tree is gone on success
    assert!(!config.paths.build_root.join("tool-1.0").exists());
}

#[tokio::test]
async fn test_pipeline_build_failure_preserves_work_tree_on_request() {
    let dir = tempdir().unwrap();
    let config = pipeline_config(&dir);
    let recipe = pipeline_recipe("tool", "1.0", &["exit 1"], &[]);
    seed_source_tarball(&config.paths.dist_dir, &recipe.sources[0].url, "tool-1.0");

    let pipeline = pipeline_for(&config).await;
    let mut request = BuildRequest::new(recipe);
    request.keep_work = true;

    let err = pipeline.run(&request).await.unwrap_err();
    assert!(err.to_string().contains("stage `build`"));

    // no archive was produced and the state database is untouched
    assert!(!config.paths.package_dir.join("tool-1.0.tar.gz").exists());
    let state = StateDb::open(&config.paths.state_db).await.unwrap();
    assert!(state.get_installed("tool").await.unwrap().is_none());

    // the partial build tree survives for debugging
    let prefix = config.paths.build_root.join("tool-1.0");
    assert!(prefix.join("root/build/tool-1.0/README").is_file());
    assert!(prefix.join("root/stage").is_dir());
    // the failure landed in the per-package log
    let log = std::fs::read_to_string(config.paths.log_dir.join("tool.log")).unwrap();
    assert!(log.contains("ERROR"));
}

#[tokio::test]
async fn test_pipeline_work_tree_removed_without_keep() {
    let dir = tempdir().unwrap();
    let config = pipeline_config(&dir);
    let recipe = pipeline_recipe("tool", "1.0", &["exit 1"], &[]);
    seed_source_tarball(&config.paths.dist_dir, &recipe.sources[0].url, "tool-1.0");

    let pipeline = pipeline_for(&config).await;
    let request = BuildRequest::new(recipe);

    pipeline.run(&request).await.unwrap_err();
    assert!(!config.paths.build_root.join("tool-1.0").exists());
}

#[tokio::test]
async fn test_archive_round_trip_preserves_files_and_modes() {
    let dir = tempdir().unwrap();
    let recipe = recipe("zlib", "1.3", &[]);
    let archive = make_archive(
        &dir,
        &recipe,
        &[
            ("usr/bin/zpipe", "#!/bin/sh\n", true),
            ("usr/lib/libz.so.1.3", "elf bytes", false),
            ("usr/share/doc/zlib/README", "docs\n", false),
        ],
    )
    .await;

    let manifest = packaging::read_manifest(&archive).await.unwrap();
    assert_eq!(manifest.name, "zlib");
    assert_eq!(manifest.files.len(), 3);
    // manifest is sorted by path
    assert!(manifest.files.windows(2).all(|w| w[0].relpath < w[1].relpath));

    let target = dir.path().join("unpacked");
    packaging::extract_into(&archive, &target).await.unwrap();

    for file in &manifest.files {
        let unpacked = target.join(&file.relpath);
        assert!(unpacked.is_file(), "{} missing", file.relpath);
        assert_eq!(std::fs::metadata(&unpacked).unwrap().len(), file.size);
    }
    // the manifest itself is not deployed
    assert!(!target.join("manifest.json").exists());
    // modes survive
    let mode = std::fs::metadata(target.join("usr/bin/zpipe"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o111, 0o111);
}

#[tokio::test]
async fn test_fresh_deploy_records_state() {
    let (work, env) = env().await;
    let recipe = recipe("foo", "1.0", &[]);
    let archive = make_archive(&work, &recipe, &[("usr/bin/foo", "v1", true)]).await;

    let deploy_id = atomic_deploy(&archive, &recipe, &env.params(), None)
        .await
        .unwrap();
    assert!(deploy_id.starts_with("deploy_"));

    assert_eq!(
        std::fs::read_to_string(env.target_root.join("usr/bin/foo")).unwrap(),
        "v1"
    );

    let record = env.state.get_installed("foo").await.unwrap().unwrap();
    assert_eq!(record.version, "1.0");
    assert_eq!(record.files.len(), 1);
    assert!(record.files[0].ends_with("usr/bin/foo"));

    // transaction retained until rolled back; nothing was backed up
    let backup_dir = env.backup_root.join(&deploy_id);
    assert!(backup_dir.join("manifest.json").is_file());
}

#[tokio::test]
async fn test_deploy_backs_up_and_rollback_restores_byte_identical() {
    let (work, env) = env().await;
    let recipe = recipe("foo", "2.0", &[]);

    // pre-existing file that the deploy will overwrite
    write_staged(&env.target_root, "usr/bin/foo", "original contents", true);
    let before = std::fs::read(env.target_root.join("usr/bin/foo")).unwrap();

    let archive = make_archive(&work, &recipe, &[("usr/bin/foo", "new contents", true)]).await;
    let deploy_id = atomic_deploy(&archive, &recipe, &env.params(), None)
        .await
        .unwrap();

    // backup is byte-identical to the pre-deploy file
    let backup = env
        .backup_root
        .join(&deploy_id)
        .join("backup/usr/bin/foo");
    assert_eq!(std::fs::read(&backup).unwrap(), before);
    assert_eq!(
        std::fs::read_to_string(env.target_root.join("usr/bin/foo")).unwrap(),
        "new contents"
    );

    let restored = rollback(&env.backup_root, &deploy_id, &env.state, None)
        .await
        .unwrap();
    assert_eq!(restored, 1);
    assert_eq!(std::fs::read(env.target_root.join("usr/bin/foo")).unwrap(), before);
    // consumed transaction is gone
    assert!(!env.backup_root.join(&deploy_id).exists());
}

#[tokio::test]
async fn test_rollback_unknown_id() {
    let (_work, env) = env().await;
    let err = rollback(&env.backup_root, "deploy_0_zzz", &env.state, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_upgrade_removes_stale_files() {
    let (work, env) = env().await;

    let v1 = recipe("tool", "1.0", &[]);
    let archive1 = make_archive(
        &work,
        &v1,
        &[("usr/bin/tool", "v1", true), ("usr/lib/tool/legacy.dat", "old", false)],
    )
    .await;
    atomic_deploy(&archive1, &v1, &env.params(), None).await.unwrap();

    let v2 = recipe("tool", "2.0", &[]);
    let archive2 = make_archive(&work, &v2, &[("usr/bin/tool", "v2", true)]).await;
    upgrade_deployed(&archive2, &v2, &env.params(), true, None)
        .await
        .unwrap();

    assert_eq!(
        std::fs::read_to_string(env.target_root.join("usr/bin/tool")).unwrap(),
        "v2"
    );
    // the file only v1 owned is gone
    assert!(!env.target_root.join("usr/lib/tool/legacy.dat").exists());
    let record = env.state.get_installed("tool").await.unwrap().unwrap();
    assert_eq!(record.version, "2.0");
}

#[tokio::test]
async fn test_upgrade_verification_failure_rolls_back() {
    let (work, env) = env().await;

    let v1 = recipe("tool", "1.0", &[]);
    let archive1 = make_archive(&work, &v1, &[("usr/bin/tool", "v1", true)]).await;
    atomic_deploy(&archive1, &v1, &env.params(), None).await.unwrap();

    // craft a v2 archive whose manifest lies about a file size, so
    // post-deploy verification must fail
    let v2 = recipe("tool", "2.0", &[]);
    let staging = work.path().join("staging-bad");
    write_staged(&staging, "usr/bin/tool", "v2", true);
    let mut manifest =
        packaging::manifest_for_staging(&staging, "tool", "2.0", BTreeMap::new())
            .await
            .unwrap();
    manifest.files[0].size += 1000;
    let archive2 = work.path().join("tool-2.0.tar.gz");
    packaging::create_package(&staging, &archive2, &manifest, "gz")
        .await
        .unwrap();

    let err = upgrade_deployed(&archive2, &v2, &env.params(), true, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("verification"));

    // v1 content and state record were restored
    assert_eq!(
        std::fs::read_to_string(env.target_root.join("usr/bin/tool")).unwrap(),
        "v1"
    );
    let record = env.state.get_installed("tool").await.unwrap().unwrap();
    assert_eq!(record.version, "1.0");
}

#[tokio::test]
async fn test_upgrade_same_size_corruption_detected() {
    let (work, env) = env().await;

    let v1 = recipe("tool", "1.0", &[]);
    let archive1 = make_archive(&work, &v1, &[("usr/bin/tool", "v1", true)]).await;
    atomic_deploy(&archive1, &v1, &env.params(), None).await.unwrap();

    // manifest with the right size but a wrong digest: a pure size
    // check would wave this through
    let v2 = recipe("tool", "2.0", &[]);
    let staging = work.path().join("staging-samesize");
    write_staged(&staging, "usr/bin/tool", "v2", true);
    let mut manifest =
        packaging::manifest_for_staging(&staging, "tool", "2.0", BTreeMap::new())
            .await
            .unwrap();
    manifest.files[0].sha256 = "0".repeat(64);
    let archive2 = work.path().join("tool-2.0.tar.gz");
    packaging::create_package(&staging, &archive2, &manifest, "gz")
        .await
        .unwrap();

    let err = upgrade_deployed(&archive2, &v2, &env.params(), true, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("digest mismatch"));

    assert_eq!(
        std::fs::read_to_string(env.target_root.join("usr/bin/tool")).unwrap(),
        "v1"
    );
    let record = env.state.get_installed("tool").await.unwrap().unwrap();
    assert_eq!(record.version, "1.0");
}

#[tokio::test]
async fn test_remove_dry_run_mutates_nothing() {
    let (work, env) = env().await;

    let foo = recipe("foo", "1.0", &[]);
    let archive_foo = make_archive(&work, &foo, &[("usr/bin/foo", "foo", true)]).await;
    atomic_deploy(&archive_foo, &foo, &env.params(), None).await.unwrap();

    let bar = recipe("bar", "2.0", &["foo>=1.0"]);
    let archive_bar = make_archive(&work, &bar, &[("usr/bin/bar", "bar", true)]).await;
    atomic_deploy(&archive_bar, &bar, &env.params(), None).await.unwrap();

    let events_before = env.state.list_events(Some("foo"), 100).await.unwrap().len();

    // forced dry run: reports, but neither files, record, nor events change
    let outcome = remove_package(&env.state, "foo", true, true, None)
        .await
        .unwrap();
    assert!(outcome.removed());
    assert_eq!(outcome.files_removed, 1);
    assert!(env.target_root.join("usr/bin/foo").exists());
    assert!(env.state.get_installed("foo").await.unwrap().is_some());
    let events_after = env.state.list_events(Some("foo"), 100).await.unwrap().len();
    assert_eq!(events_before, events_after);
}

#[tokio::test]
async fn test_remove_blocked_by_dependents_then_forced() {
    let (work, env) = env().await;

    let foo = recipe("foo", "1.0", &[]);
    let archive_foo = make_archive(&work, &foo, &[("usr/bin/foo", "foo", true)]).await;
    atomic_deploy(&archive_foo, &foo, &env.params(), None).await.unwrap();

    let bar = recipe("bar", "2.0", &["foo>=1.0"]);
    let archive_bar = make_archive(&work, &bar, &[("usr/bin/bar", "bar", true)]).await;
    atomic_deploy(&archive_bar, &bar, &env.params(), None).await.unwrap();

    // blocked: names the dependent, mutates nothing
    let outcome = remove_package(&env.state, "foo", false, false, None)
        .await
        .unwrap();
    assert_eq!(outcome.blocked_by, ["bar"]);
    assert!(env.target_root.join("usr/bin/foo").exists());
    assert!(env.state.get_installed("foo").await.unwrap().is_some());

    // forced: removes and appends a WARN event per dependent
    let outcome = remove_package(&env.state, "foo", true, false, None)
        .await
        .unwrap();
    assert!(outcome.removed());
    assert_eq!(outcome.files_removed, 1);
    assert!(!env.target_root.join("usr/bin/foo").exists());
    assert!(env.state.get_installed("foo").await.unwrap().is_none());

    let events = env.state.list_events(Some("foo"), 20).await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.level == "WARN" && e.message.contains("bar")));
}

#[tokio::test]
async fn test_remove_unknown_package() {
    let (_work, env) = env().await;
    let err = remove_package(&env.state, "ghost", false, false, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not installed"));
}

#[tokio::test]
async fn test_install_files_disjoint_between_packages() {
    let (work, env) = env().await;

    let foo = recipe("foo", "1.0", &[]);
    let bar = recipe("bar", "2.0", &["foo>=1.0"]);
    let archive_foo = make_archive(&work, &foo, &[("usr/bin/foo", "foo", true)]).await;
    let archive_bar = make_archive(&work, &bar, &[("usr/bin/bar", "bar", true)]).await;
    atomic_deploy(&archive_foo, &foo, &env.params(), None).await.unwrap();
    atomic_deploy(&archive_bar, &bar, &env.params(), None).await.unwrap();

    let foo_files = env.state.get_installed("foo").await.unwrap().unwrap().files;
    let bar_files = env.state.get_installed("bar").await.unwrap().unwrap().files;
    assert!(foo_files.iter().all(|f| !bar_files.contains(f)));
}
