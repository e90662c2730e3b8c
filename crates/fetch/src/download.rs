//! HTTP download with retries and linear backoff
//!
//! Downloads stream to `<dest>.part` and are renamed into place only
//! when complete, so concurrent readers never observe a torn file.

use futures::StreamExt;
use portforge_config::FetchConfig;
use portforge_errors::{Error, FetchError};
use portforge_events::{AppEvent, EventEmitter, EventSender, FetchEvent};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

/// Download `url` to `dest`, retrying with linear backoff
///
/// # Errors
///
/// Returns [`FetchError::RetriesExhausted`] after the configured
/// number of attempts, or [`FetchError::InvalidUrl`] for an
/// unparsable or non-HTTP URL.
pub async fn download_with_retries(
    client: &reqwest::Client,
    config: &FetchConfig,
    url: &str,
    dest: &Path,
    tx: Option<&EventSender>,
) -> Result<(), Error> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl {
            url: url.to_string(),
            message: format!("unsupported scheme `{}`", parsed.scheme()),
        }
        .into());
    }

    tx.emit(AppEvent::Fetch(FetchEvent::Started {
        url: url.to_string(),
        package: None,
    }));

    let attempts = config.max_retries.max(1);
    let mut last_message = String::new();
    for attempt in 1..=attempts {
        match download_once(client, url, dest, config.total_timeout_secs).await {
            Ok(size) => {
                tx.emit(AppEvent::Fetch(FetchEvent::Completed {
                    url: url.to_string(),
                    path: dest.to_path_buf(),
                    size,
                }));
                return Ok(());
            }
            Err(err) => {
                last_message = err.to_string();
                debug!(url, attempt, error = %last_message, "download attempt failed");
                if attempt < attempts {
                    let delay = Duration::from_secs(config.retry_delay_secs * u64::from(attempt));
                    tx.emit(AppEvent::Fetch(FetchEvent::Retrying {
                        url: url.to_string(),
                        attempt,
                        delay,
                    }));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(FetchError::RetriesExhausted {
        url: url.to_string(),
        attempts,
        message: last_message,
    }
    .into())
}

async fn download_once(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    total_timeout_secs: u64,
) -> Result<u64, Error> {
    let part = dest.with_extension(format!(
        "{}part",
        dest.extension()
            .map(|e| format!("{}.", e.to_string_lossy()))
            .unwrap_or_default()
    ));

    let response = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| map_reqwest_error(url, &e, total_timeout_secs))?;

    let mut file = tokio::fs::File::create(&part)
        .await
        .map_err(|e| Error::io_with_path(&e, &part))?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| map_reqwest_error(url, &e, total_timeout_secs))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::io_with_path(&e, &part))?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    // atomic publish into the cache
    tokio::fs::rename(&part, dest)
        .await
        .map_err(|e| Error::io_with_path(&e, dest))?;
    Ok(written)
}

fn map_reqwest_error(url: &str, err: &reqwest::Error, total_timeout_secs: u64) -> Error {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            seconds: total_timeout_secs,
        }
        .into()
    } else {
        FetchError::DownloadFailed {
            url: url.to_string(),
            message: err.to_string(),
        }
        .into()
    }
}
