#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions, clippy::missing_panics_doc)]

//! Source fetching and the content-addressed download cache
//!
//! Sources land in a flat cache directory under deterministic URL
//! slugs. A cached archive whose integrity still checks out never
//! touches the network again. The cache is unbounded; eviction is the
//! operator's business.

pub mod cache;
pub mod download;
pub mod vcs;

use portforge_config::FetchConfig;
use portforge_errors::{Error, FetchError};
use portforge_events::{AppEvent, EventEmitter, EventSender, FetchEvent};
use portforge_recipes::{Recipe, SourceEntry, SourceKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// A fetched source in the cache
#[derive(Debug, Clone)]
pub struct SourceArtifact {
    pub path: PathBuf,
    pub kind: SourceKind,
    /// True when a declared integrity value was verified on this run
    pub integrity_verified: bool,
}

/// Per-source outcome of a `fetch_all` run
#[derive(Debug)]
pub struct SourceOutcome {
    pub source: SourceEntry,
    pub result: Result<SourceArtifact, Error>,
}

impl SourceOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Result of fetching all sources of one recipe
#[derive(Debug, Default)]
pub struct FetchReport {
    pub outcomes: Vec<SourceOutcome>,
}

impl FetchReport {
    /// Artifacts of the successful sources, in outcome order
    #[must_use]
    pub fn artifacts(&self) -> Vec<&SourceArtifact> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .collect()
    }
}

/// Retrieves sources into the cache, verifying integrity
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
    cache_dir: PathBuf,
    tx: Option<EventSender>,
}

impl EventEmitter for Fetcher {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl Fetcher {
    /// Create a fetcher over `cache_dir`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(cache_dir: impl Into<PathBuf>, config: FetchConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .timeout(std::time::Duration::from_secs(config.total_timeout_secs))
            .build()
            .map_err(|e| Error::internal(format!("http client init failed: {e}")))?;

        Ok(Self {
            client,
            config,
            cache_dir: cache_dir.into(),
            tx: None,
        })
    }

    /// Attach an event sender
    #[must_use]
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// The cache directory
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Fetch one source into the cache
    ///
    /// # Errors
    ///
    /// Returns an error on network failure after all retries, on an
    /// integrity mismatch (the cached file is deleted), or on a failed
    /// VCS operation.
    pub async fn fetch(&self, source: &SourceEntry) -> Result<SourceArtifact, Error> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        match source.kind {
            SourceKind::Archive => self.fetch_archive(source).await,
            SourceKind::Vcs => {
                let path = vcs::clone_or_update(&self.cache_dir, &source.url, self.tx.as_ref())
                    .await?;
                Ok(SourceArtifact {
                    path,
                    kind: SourceKind::Vcs,
                    integrity_verified: false,
                })
            }
        }
    }

    async fn fetch_archive(&self, source: &SourceEntry) -> Result<SourceArtifact, Error> {
        let dest = self.cache_dir.join(cache::slug_for_url(&source.url));
        let expected = source
            .integrity
            .as_deref()
            .map(|raw| cache::parse_integrity(raw, &source.url))
            .transpose()?;

        if dest.exists() {
            match &expected {
                Some(hex) => {
                    if cache::verify_sha256(&dest, hex).await? {
                        self.emit(AppEvent::Fetch(FetchEvent::CacheHit {
                            url: source.url.clone(),
                            path: dest.clone(),
                        }));
                        return Ok(SourceArtifact {
                            path: dest,
                            kind: SourceKind::Archive,
                            integrity_verified: true,
                        });
                    }
                    // stale or corrupt; refetch below
                    debug!(path = %dest.display(), "cached file failed integrity, refetching");
                    tokio::fs::remove_file(&dest).await?;
                }
                None => {
                    self.emit(AppEvent::Fetch(FetchEvent::CacheHit {
                        url: source.url.clone(),
                        path: dest.clone(),
                    }));
                    return Ok(SourceArtifact {
                        path: dest,
                        kind: SourceKind::Archive,
                        integrity_verified: false,
                    });
                }
            }
        }

        if expected.is_none() {
            self.emit_warning_with_context(
                format!("source {} declares no integrity", source.url),
                "fetch",
            );
        }

        download::download_with_retries(
            &self.client,
            &self.config,
            &source.url,
            &dest,
            self.tx.as_ref(),
        )
        .await?;

        let verified = match &expected {
            Some(hex) => {
                if cache::verify_sha256(&dest, hex).await? {
                    true
                } else {
                    let actual = cache::sha256_of(&dest).await?;
                    tokio::fs::remove_file(&dest).await?;
                    return Err(FetchError::IntegrityMismatch {
                        url: source.url.clone(),
                        expected: hex.clone(),
                        actual,
                    }
                    .into());
                }
            }
            None => false,
        };

        Ok(SourceArtifact {
            path: dest,
            kind: SourceKind::Archive,
            integrity_verified: verified,
        })
    }

    /// Fetch every source of a recipe
    ///
    /// Required sources run concurrently up to `parallel_limit`; a
    /// failure on any of them fails the whole call. Optional sources
    /// are fallbacks: they are attempted in priority order and only
    /// the first success is kept.
    ///
    /// # Errors
    ///
    /// Returns the first required-source error, or
    /// [`FetchError::NoUsableSource`] when every optional source
    /// failed and no required source exists.
    pub async fn fetch_all(
        &self,
        recipe: &Recipe,
        parallel_limit: usize,
    ) -> Result<FetchReport, Error> {
        let (required, mut optional): (Vec<_>, Vec<_>) = recipe
            .sources
            .iter()
            .cloned()
            .partition(|source| !source.optional);

        let semaphore = Arc::new(Semaphore::new(parallel_limit.max(1)));
        let mut tasks = tokio::task::JoinSet::new();
        for (index, source) in required.into_iter().enumerate() {
            let fetcher = self.clone();
            let permit_pool = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // semaphore is never closed while tasks run
                let _permit = permit_pool.acquire_owned().await.expect("semaphore closed");
                let result = fetcher.fetch(&source).await;
                (index, SourceOutcome { source, result })
            });
        }

        let mut indexed: Vec<(usize, SourceOutcome)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            indexed.push(joined.map_err(|e| Error::internal(format!("fetch task failed: {e}")))?);
        }
        indexed.sort_by_key(|(index, _)| *index);

        let mut report = FetchReport::default();
        let mut first_error = None;
        for (_, outcome) in indexed {
            if let Err(err) = &outcome.result {
                self.emit(AppEvent::Fetch(FetchEvent::Failed {
                    url: outcome.source.url.clone(),
                    error: err.to_string(),
                }));
                if first_error.is_none() {
                    first_error = Some(err.clone());
                }
            }
            report.outcomes.push(outcome);
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        // fallback chain: highest priority first, stop on first success
        optional.sort_by_key(|source| std::cmp::Reverse(source.priority));
        let had_optional = !optional.is_empty();
        let mut optional_succeeded = false;
        for source in optional {
            if optional_succeeded {
                break;
            }
            let result = self.fetch(&source).await;
            match &result {
                Ok(_) => optional_succeeded = true,
                Err(err) => self.emit_warning_with_context(
                    format!("optional source {} failed: {err}", source.url),
                    "fetch",
                ),
            }
            report.outcomes.push(SourceOutcome { source, result });
        }

        if had_optional && !optional_succeeded && report.artifacts().is_empty() {
            return Err(FetchError::NoUsableSource {
                package: recipe.name.clone(),
            }
            .into());
        }

        Ok(report)
    }
}
