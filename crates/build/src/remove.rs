//! Package removal

use portforge_errors::{Error, StateError};
use portforge_events::{AppEvent, EventEmitter, EventLevel, EventSender, StateEvent};
use portforge_state::{EventRecord, StateDb};
use std::path::Path;
use tracing::warn;

/// Result of a removal attempt
#[derive(Debug, Default)]
pub struct RemoveOutcome {
    /// Reverse dependents that blocked the removal (empty on success)
    pub blocked_by: Vec<String>,
    pub files_removed: usize,
}

impl RemoveOutcome {
    #[must_use]
    pub fn removed(&self) -> bool {
        self.blocked_by.is_empty()
    }
}

/// Remove an installed package's files and state record
///
/// Refuses while reverse dependents exist unless `force`; a forced
/// removal appends a `WARN` event for each dependent. A blocked
/// removal mutates nothing; a dry run mutates nothing at all,
/// including the events table.
///
/// # Errors
///
/// Returns [`StateError::NotInstalled`] for unknown packages and
/// state errors from the database.
pub async fn remove_package(
    state: &StateDb,
    name: &str,
    force: bool,
    dry_run: bool,
    tx: Option<&EventSender>,
) -> Result<RemoveOutcome, Error> {
    let record = state
        .get_installed(name)
        .await?
        .ok_or_else(|| StateError::NotInstalled {
            name: name.to_string(),
        })?;

    let dependents = state.reverse_dependents(name).await?;
    if !dependents.is_empty() && !force {
        return Ok(RemoveOutcome {
            blocked_by: dependents,
            files_removed: 0,
        });
    }

    // a dry run must not touch the events table either
    if dry_run {
        for dependent in &dependents {
            tx.emit_warning(format!(
                "would remove {name} while {dependent} still depends on it"
            ));
        }
        tx.emit_debug(format!(
            "would remove {} files of {name}-{}",
            record.files.len(),
            record.version
        ));
        return Ok(RemoveOutcome {
            blocked_by: Vec::new(),
            files_removed: record.files.len(),
        });
    }

    for dependent in &dependents {
        state
            .append_event(&EventRecord::new(
                Some(name.to_string()),
                "remove",
                EventLevel::Warn,
                format!("removed while {dependent} still depends on it"),
            ))
            .await;
    }

    let mut files_removed = 0;
    for file in &record.files {
        match tokio::fs::remove_file(Path::new(file)).await {
            Ok(()) => files_removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(file, error = %e, "file removal failed"),
        }
    }

    state.remove_installed(name).await?;
    state
        .append_event(&EventRecord::new(
            Some(name.to_string()),
            "remove",
            EventLevel::Info,
            format!("removed {name}-{} ({files_removed} files)", record.version),
        ))
        .await;
    tx.emit(AppEvent::State(StateEvent::PackageRemoved {
        name: name.to_string(),
        files_removed,
    }));

    Ok(RemoveOutcome {
        blocked_by: Vec::new(),
        files_removed,
    })
}
