//! Integration tests for the state database

use portforge_events::EventLevel;
use portforge_state::{DependencyRow, EventRecord, InstalledRecord, StateDb};
use tempfile::tempdir;

fn record(name: &str, version: &str, deps: &[(&str, &str)], explicit: bool) -> InstalledRecord {
    InstalledRecord {
        name: name.to_string(),
        version: version.to_string(),
        install_date: chrono::Utc::now().timestamp(),
        build_options: String::new(),
        explicit,
        files: vec![
            format!("/usr/bin/{name}"),
            format!("/usr/share/doc/{name}/README"),
        ],
        dependencies: deps
            .iter()
            .map(|(dep, expr)| DependencyRow {
                dep_name: (*dep).to_string(),
                dep_version_expr: (*expr).to_string(),
            })
            .collect(),
    }
}

async fn open_db(dir: &tempfile::TempDir) -> StateDb {
    StateDb::open(&dir.path().join("state.sqlite3")).await.unwrap()
}

#[tokio::test]
async fn test_upsert_and_get() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir).await;

    db.upsert_installed(&record("zlib", "1.3", &[], true))
        .await
        .unwrap();

    let fetched = db.get_installed("zlib").await.unwrap().unwrap();
    assert_eq!(fetched.version, "1.3");
    assert!(fetched.explicit);
    assert_eq!(fetched.files.len(), 2);
    assert!(db.get_installed("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_upsert_replaces_by_name() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir).await;

    db.upsert_installed(&record("zlib", "1.2.13", &[], false))
        .await
        .unwrap();
    let mut newer = record("zlib", "1.3", &[("minizip", "")], false);
    newer.files = vec!["/usr/lib/libz.so.1.3".to_string()];
    db.upsert_installed(&newer).await.unwrap();

    let fetched = db.get_installed("zlib").await.unwrap().unwrap();
    assert_eq!(fetched.version, "1.3");
    // old file rows were replaced, not merged
    assert_eq!(fetched.files, vec!["/usr/lib/libz.so.1.3".to_string()]);
    assert_eq!(fetched.dependencies.len(), 1);
    assert_eq!(db.list_installed().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_remove_returns_files_and_keeps_events() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir).await;

    db.upsert_installed(&record("foo", "1.0", &[], true))
        .await
        .unwrap();
    db.append_event(&EventRecord::new(
        Some("foo".to_string()),
        "deploy",
        EventLevel::Info,
        "installed",
    ))
    .await;

    let files = db.remove_installed("foo").await.unwrap();
    assert_eq!(files.len(), 2);

    assert!(db.get_installed("foo").await.unwrap().is_none());
    // file and dependency rows cascade; events stay
    let events = db.list_events(Some("foo"), 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, "INFO");
}

#[tokio::test]
async fn test_reverse_dependents() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir).await;

    db.upsert_installed(&record("zlib", "1.3", &[], false))
        .await
        .unwrap();
    db.upsert_installed(&record("libpng", "1.6", &[("zlib", ">=1.2")], false))
        .await
        .unwrap();
    db.upsert_installed(&record("gtk", "4.0", &[("libpng", ""), ("zlib", "")], true))
        .await
        .unwrap();

    let dependents = db.reverse_dependents("zlib").await.unwrap();
    assert_eq!(dependents, vec!["gtk".to_string(), "libpng".to_string()]);
    assert!(db.reverse_dependents("gtk").await.unwrap().is_empty());

    db.remove_installed("libpng").await.unwrap();
    let dependents = db.reverse_dependents("zlib").await.unwrap();
    assert_eq!(dependents, vec!["gtk".to_string()]);
}

#[tokio::test]
async fn test_installed_versions_map() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir).await;

    db.upsert_installed(&record("zlib", "1.3", &[], false))
        .await
        .unwrap();
    let versions = db.installed_versions().await.unwrap();
    assert_eq!(versions["zlib"].to_string(), "1.3");
}

#[tokio::test]
async fn test_event_timestamps_non_decreasing() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir).await;

    for i in 0..5 {
        db.append_event(&EventRecord::new(
            Some("pkg".to_string()),
            "build",
            EventLevel::Debug,
            format!("step {i}"),
        ))
        .await;
    }

    let events = db.list_events(Some("pkg"), 10).await.unwrap();
    // list is newest-first
    for pair in events.windows(2) {
        assert!(pair[0].ts >= pair[1].ts);
        assert!(pair[0].id > pair[1].id);
    }
}

#[tokio::test]
async fn test_reopen_preserves_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.sqlite3");

    {
        let db = StateDb::open(&path).await.unwrap();
        db.upsert_installed(&record("zlib", "1.3", &[], true))
            .await
            .unwrap();
    }

    let db = StateDb::open(&path).await.unwrap();
    assert!(db.get_installed("zlib").await.unwrap().is_some());
}
