//! Cross-process deploy lock
//!
//! One deploy transaction may mutate a target root at a time. The lock
//! is advisory and released when the guard drops; the lock file itself
//! is deliberately left in place.

use fs2::FileExt;
use portforge_errors::{Error, StateError};
use std::fs::{File, OpenOptions};
use std::path::Path;

/// RAII guard for the deploy lock
#[derive(Debug)]
pub struct DeployLock {
    _file: File,
}

impl DeployLock {
    /// Acquire the lock, blocking until it is free
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be opened or locked.
    pub fn acquire(path: &Path) -> Result<Self, Error> {
        let file = Self::open(path)?;
        file.lock_exclusive().map_err(|e| StateError::Locked {
            message: e.to_string(),
        })?;
        Ok(Self { _file: file })
    }

    /// Acquire the lock or fail immediately when another process holds it
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Locked`] when contended.
    pub fn try_acquire(path: &Path) -> Result<Self, Error> {
        let file = Self::open(path)?;
        file.try_lock_exclusive().map_err(|e| StateError::Locked {
            message: e.to_string(),
        })?;
        Ok(Self { _file: file })
    }

    fn open(path: &Path) -> Result<File, Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_excludes_second_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deploy.lock");

        let held = DeployLock::try_acquire(&path).unwrap();
        assert!(DeployLock::try_acquire(&path).is_err());
        drop(held);
        assert!(DeployLock::try_acquire(&path).is_ok());
    }
}
