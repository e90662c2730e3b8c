//! Integration tests for dependency resolution

use portforge_recipes::RecipeStore;
use portforge_resolver::{depclean, revdep, Resolver};
use portforge_state::{DependencyRow, InstalledRecord, StateDb};
use portforge_types::{PackageSpec, Version};
use std::collections::HashMap;
use std::fs;
use tempfile::{tempdir, TempDir};

fn write_recipe(dir: &TempDir, name: &str, version: &str, deps: &[&str]) {
    let dep_list = deps
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
    fs::write(dir.path().join(format!("{name}-{version}.toml")), content).unwrap();
}

fn scanned(dir: &TempDir) -> RecipeStore {
    let mut store = RecipeStore::new();
    store.scan(&[dir.path().to_path_buf()]).unwrap();
    store
}

fn requests(specs: &[&str]) -> Vec<PackageSpec> {
    specs.iter().map(|s| PackageSpec::parse(s).unwrap()).collect()
}

#[test]
fn test_happy_path_order() {
    let dir = tempdir().unwrap();
    write_recipe(&dir, "foo", "1.0", &[]);
    write_recipe(&dir, "bar", "2.0", &["foo>=1.0"]);
    let store = scanned(&dir);

    let plan = Resolver::new(&store, HashMap::new())
        .resolve(&requests(&["bar"]))
        .unwrap();

    assert_eq!(plan.names(), ["foo", "bar"]);
    assert_eq!(plan.entries[1].key.version.to_string(), "2.0");
}

#[test]
fn test_highest_version_wins() {
    let dir = tempdir().unwrap();
    write_recipe(&dir, "foo", "1.0", &[]);
    write_recipe(&dir, "foo", "1.2", &[]);
    write_recipe(&dir, "foo", "0.9", &[]);
    let store = scanned(&dir);

    let plan = Resolver::new(&store, HashMap::new())
        .resolve(&requests(&["foo"]))
        .unwrap();

    assert_eq!(plan.entries[0].key.version.to_string(), "1.2");
}

#[test]
fn test_constraint_intersection_forces_backtrack() {
    let dir = tempdir().unwrap();
    // app wants lib<2.0 even though 2.0 exists
    write_recipe(&dir, "lib", "2.0", &[]);
    write_recipe(&dir, "lib", "1.5", &[]);
    write_recipe(&dir, "app", "1.0", &["lib<2.0"]);
    let store = scanned(&dir);

    let plan = Resolver::new(&store, HashMap::new())
        .resolve(&requests(&["app", "lib"]))
        .unwrap();

    let lib = plan
        .entries
        .iter()
        .find(|e| e.key.name == "lib")
        .unwrap();
    assert_eq!(lib.key.version.to_string(), "1.5");
}

#[test]
fn test_installed_package_pruned_from_plan() {
    let dir = tempdir().unwrap();
    write_recipe(&dir, "foo", "1.0", &[]);
    write_recipe(&dir, "bar", "2.0", &["foo>=1.0"]);
    let store = scanned(&dir);

    let mut installed = HashMap::new();
    installed.insert("foo".to_string(), Version::parse("1.0").unwrap());

    let plan = Resolver::new(&store, installed)
        .resolve(&requests(&["bar"]))
        .unwrap();

    assert_eq!(plan.names(), ["bar"]);
}

#[test]
fn test_installed_but_unsatisfying_version_is_planned() {
    let dir = tempdir().unwrap();
    write_recipe(&dir, "foo", "2.0", &[]);
    write_recipe(&dir, "bar", "1.0", &["foo>=2.0"]);
    let store = scanned(&dir);

    let mut installed = HashMap::new();
    installed.insert("foo".to_string(), Version::parse("1.0").unwrap());

    let plan = Resolver::new(&store, installed)
        .resolve(&requests(&["bar"]))
        .unwrap();

    assert_eq!(plan.names(), ["foo", "bar"]);
}

#[test]
fn test_rebuild_overrides_pruning() {
    let dir = tempdir().unwrap();
    write_recipe(&dir, "foo", "1.0", &[]);
    let store = scanned(&dir);

    let mut installed = HashMap::new();
    installed.insert("foo".to_string(), Version::parse("1.0").unwrap());

    let plan = Resolver::new(&store, installed)
        .with_rebuild(["foo".to_string()])
        .resolve(&requests(&["foo"]))
        .unwrap();

    assert_eq!(plan.names(), ["foo"]);
}

#[test]
fn test_unsatisfiable_reports_candidates_and_assignment() {
    let dir = tempdir().unwrap();
    write_recipe(&dir, "foo", "1.0", &[]);
    let store = scanned(&dir);

    let err = Resolver::new(&store, HashMap::new())
        .resolve(&requests(&["foo>=2.0"]))
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("foo>=2.0"));
    assert!(message.contains("1.0"));
}

#[test]
fn test_unknown_package() {
    let dir = tempdir().unwrap();
    write_recipe(&dir, "foo", "1.0", &[]);
    let store = scanned(&dir);

    let err = Resolver::new(&store, HashMap::new())
        .resolve(&requests(&["nosuchthing"]))
        .unwrap_err();
    assert!(err.to_string().contains("nosuchthing"));
}

#[test]
fn test_cycle_is_fatal() {
    let dir = tempdir().unwrap();
    write_recipe(&dir, "a", "1.0", &["b"]);
    write_recipe(&dir, "b", "1.0", &["a"]);
    let store = scanned(&dir);

    let err = Resolver::new(&store, HashMap::new())
        .resolve(&requests(&["a"]))
        .unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn test_determinism() {
    let dir = tempdir().unwrap();
    write_recipe(&dir, "libz", "1.0", &[]);
    write_recipe(&dir, "liba", "1.0", &[]);
    write_recipe(&dir, "app", "1.0", &["libz", "liba"]);
    let store = scanned(&dir);

    let first = Resolver::new(&store, HashMap::new())
        .resolve(&requests(&["app"]))
        .unwrap();
    for _ in 0..5 {
        let again = Resolver::new(&store, HashMap::new())
            .resolve(&requests(&["app"]))
            .unwrap();
        assert_eq!(again.names(), first.names());
    }
    // same depth orders by name ascending
    assert_eq!(first.names(), ["liba", "libz", "app"]);
}

#[test]
fn test_diamond_dependency_planned_once() {
    let dir = tempdir().unwrap();
    write_recipe(&dir, "base", "1.0", &[]);
    write_recipe(&dir, "left", "1.0", &["base>=1.0"]);
    write_recipe(&dir, "right", "1.0", &["base"]);
    write_recipe(&dir, "top", "1.0", &["left", "right"]);
    let store = scanned(&dir);

    let plan = Resolver::new(&store, HashMap::new())
        .resolve(&requests(&["top"]))
        .unwrap();

    assert_eq!(plan.names(), ["base", "left", "right", "top"]);
}

async fn installed_record(db: &StateDb, name: &str, deps: &[&str], explicit: bool) {
    db.upsert_installed(&InstalledRecord {
        name: name.to_string(),
        version: "1.0".to_string(),
        install_date: 0,
        build_options: String::new(),
        explicit,
        files: vec![],
        dependencies: deps
            .iter()
            .map(|d| DependencyRow {
                dep_name: (*d).to_string(),
                dep_version_expr: String::new(),
            })
            .collect(),
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_revdep_transitive() {
    let dir = tempdir().unwrap();
    let db = StateDb::open(&dir.path().join("state.sqlite3")).await.unwrap();

    installed_record(&db, "zlib", &[], false).await;
    installed_record(&db, "libpng", &["zlib"], false).await;
    installed_record(&db, "gtk", &["libpng"], true).await;

    let dependents = revdep(&db, "zlib").await.unwrap();
    assert_eq!(dependents, ["gtk", "libpng"]);
}

#[tokio::test]
async fn test_depclean_orphans() {
    let dir = tempdir().unwrap();
    let db = StateDb::open(&dir.path().join("state.sqlite3")).await.unwrap();

    installed_record(&db, "zlib", &[], false).await;
    installed_record(&db, "libpng", &["zlib"], false).await;
    installed_record(&db, "leftover", &[], false).await;
    installed_record(&db, "editor", &[], true).await;

    let orphans = depclean(&db).await.unwrap();
    // libpng has no dependents and is not explicit; zlib is depended on;
    // editor is explicit
    assert_eq!(orphans, ["leftover", "libpng"]);
}
