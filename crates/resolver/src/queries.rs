//! Reverse-dependency and orphan queries over the state database

use portforge_errors::Error;
use portforge_state::StateDb;
use std::collections::HashSet;

/// Transitive closure of installed packages that depend on `name`
///
/// # Errors
///
/// Returns an error if the state database fails.
pub async fn revdep(db: &StateDb, name: &str) -> Result<Vec<String>, Error> {
    let mut closure = HashSet::new();
    let mut frontier = vec![name.to_string()];

    while let Some(current) = frontier.pop() {
        for dependent in db.reverse_dependents(&current).await? {
            if closure.insert(dependent.clone()) {
                frontier.push(dependent);
            }
        }
    }

    let mut result: Vec<String> = closure.into_iter().collect();
    result.sort();
    Ok(result)
}

/// Orphans: installed, not explicit, and with no reverse dependents
///
/// Read-only; removal is a separate step.
///
/// # Errors
///
/// Returns an error if the state database fails.
pub async fn depclean(db: &StateDb) -> Result<Vec<String>, Error> {
    let mut orphans = Vec::new();
    for record in db.list_installed().await? {
        if record.explicit {
            continue;
        }
        if db.reverse_dependents(&record.name).await?.is_empty() {
            orphans.push(record.name);
        }
    }
    Ok(orphans)
}
