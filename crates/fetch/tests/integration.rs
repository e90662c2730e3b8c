//! Integration tests for the fetcher
//!
//! These run fully offline: cache hits must not touch the network, and
//! failure paths use a refused local port.

use portforge_config::FetchConfig;
use portforge_fetch::{cache, Fetcher};
use portforge_recipes::{Recipe, SourceEntry, SourceKind};
use std::path::PathBuf;
use tempfile::tempdir;

fn fast_config() -> FetchConfig {
    FetchConfig {
        parallel_limit: 4,
        max_retries: 2,
        retry_delay_secs: 0,
        connect_timeout_secs: 2,
        total_timeout_secs: 5,
    }
}

fn source(url: &str, integrity: Option<String>) -> SourceEntry {
    SourceEntry {
        url: url.to_string(),
        kind: SourceKind::Archive,
        integrity,
        priority: 0,
        optional: false,
    }
}

fn recipe_with_sources(sources: Vec<SourceEntry>) -> Recipe {
    let (mut recipe, _) = Recipe::parse(
        r#"
        sources = ["https://example.invalid/placeholder.tar.gz"]

        [package]
        name = "offline"
        version = "1.0"
        "#,
        &PathBuf::from("offline.toml"),
    )
    .unwrap();
    recipe.sources = sources;
    recipe
}

#[tokio::test]
async fn test_verified_cache_hit_skips_network() {
    let dir = tempdir().unwrap();
    // an unroutable URL: any network attempt would fail
    let url = "http://127.0.0.1:1/zlib-1.3.tar.gz";
    let cached = cache::cache_path(dir.path(), url);
    std::fs::write(&cached, b"pretend tarball").unwrap();
    let digest = cache::sha256_of(&cached).await.unwrap();
    let mtime_before = std::fs::metadata(&cached).unwrap().modified().unwrap();

    let fetcher = Fetcher::new(dir.path(), fast_config()).unwrap();
    let artifact = fetcher
        .fetch(&source(url, Some(digest)))
        .await
        .unwrap();

    assert!(artifact.integrity_verified);
    assert_eq!(artifact.path, cached);
    let mtime_after = std::fs::metadata(&cached).unwrap().modified().unwrap();
    assert_eq!(mtime_before, mtime_after);
}

#[tokio::test]
async fn test_unverified_cache_hit_without_declared_integrity() {
    let dir = tempdir().unwrap();
    let url = "http://127.0.0.1:1/foo-1.0.tar.gz";
    let cached = cache::cache_path(dir.path(), url);
    std::fs::write(&cached, b"bytes").unwrap();

    let fetcher = Fetcher::new(dir.path(), fast_config()).unwrap();
    let artifact = fetcher.fetch(&source(url, None)).await.unwrap();
    assert!(!artifact.integrity_verified);
}

#[tokio::test]
async fn test_stale_cache_refetch_fails_offline() {
    let dir = tempdir().unwrap();
    let url = "http://127.0.0.1:1/foo-1.0.tar.gz";
    let cached = cache::cache_path(dir.path(), url);
    std::fs::write(&cached, b"corrupted").unwrap();

    let fetcher = Fetcher::new(dir.path(), fast_config()).unwrap();
    // declared hash does not match the cached bytes -> refetch, which
    // cannot succeed against a refused port
    let err = fetcher
        .fetch(&source(url, Some("0".repeat(64))))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("attempts"));
    // the corrupt file was evicted before the refetch
    assert!(!cached.exists());
}

#[tokio::test]
async fn test_download_failure_exhausts_retries() {
    let dir = tempdir().unwrap();
    let fetcher = Fetcher::new(dir.path(), fast_config()).unwrap();

    let err = fetcher
        .fetch(&source("http://127.0.0.1:1/nothing.tar.gz", None))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("2 attempts"));
}

#[tokio::test]
async fn test_invalid_scheme_rejected() {
    let dir = tempdir().unwrap();
    let fetcher = Fetcher::new(dir.path(), fast_config()).unwrap();

    let err = fetcher
        .fetch(&source("ftp://example.org/a.tar.gz", None))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("ftp"));
}

#[tokio::test]
async fn test_fetch_all_required_failure_fails_call() {
    let dir = tempdir().unwrap();
    let fetcher = Fetcher::new(dir.path(), fast_config()).unwrap();

    let url_ok = "http://127.0.0.1:1/good.tar.gz";
    let cached = cache::cache_path(dir.path(), url_ok);
    std::fs::write(&cached, b"ok").unwrap();

    let recipe = recipe_with_sources(vec![
        source(url_ok, None),
        source("http://127.0.0.1:1/missing.tar.gz", None),
    ]);

    let err = fetcher.fetch_all(&recipe, 2).await.unwrap_err();
    assert!(err.to_string().contains("missing.tar.gz"));
}

#[tokio::test]
async fn test_fetch_all_optional_fallback_first_success_kept() {
    let dir = tempdir().unwrap();
    let fetcher = Fetcher::new(dir.path(), fast_config()).unwrap();

    // the high-priority mirror is cached (succeeds), the rest would fail
    let primary = "http://127.0.0.1:1/mirror-a.tar.gz";
    let cached = cache::cache_path(dir.path(), primary);
    std::fs::write(&cached, b"mirror a").unwrap();

    let mut first = source(primary, None);
    first.optional = true;
    first.priority = 10;
    let mut second = source("http://127.0.0.1:1/mirror-b.tar.gz", None);
    second.optional = true;
    second.priority = 1;

    let recipe = recipe_with_sources(vec![first, second]);
    let report = fetcher.fetch_all(&recipe, 2).await.unwrap();

    // only the first (highest-priority) optional source was attempted
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.outcomes[0].succeeded());
    assert_eq!(report.artifacts().len(), 1);
}

#[tokio::test]
async fn test_fetch_all_no_usable_source() {
    let dir = tempdir().unwrap();
    let fetcher = Fetcher::new(dir.path(), fast_config()).unwrap();

    let mut only = source("http://127.0.0.1:1/gone.tar.gz", None);
    only.optional = true;
    let recipe = recipe_with_sources(vec![only]);

    let err = fetcher.fetch_all(&recipe, 1).await.unwrap_err();
    assert!(err.to_string().contains("offline"));
}
