//! Runtime SQL queries over the state schema

use crate::models::{DependencyRow, EventRecord, EventRow, InstalledRecord};
use portforge_errors::Error;
use portforge_types::Version;
use sqlx::{query, Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Handle to the state database
///
/// Cloning is cheap; all clones share one pool.
#[derive(Debug, Clone)]
pub struct StateDb {
    pool: Pool<Sqlite>,
}

impl StateDb {
    /// Open (and auto-initialize) the state database at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(path: &Path) -> Result<Self, Error> {
        let pool = crate::create_pool(path).await?;
        crate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests)
    #[must_use]
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Atomically replace the record for `record.name`
    ///
    /// File and dependency rows are rewritten in the same transaction.
    /// `install_date` is refreshed on every upsert.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn upsert_installed(&self, record: &InstalledRecord) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        query(
            "INSERT OR REPLACE INTO packages (name, version, install_date, build_options, explicit)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&record.name)
        .bind(&record.version)
        .bind(record.install_date)
        .bind(&record.build_options)
        .bind(i64::from(record.explicit))
        .execute(&mut *tx)
        .await?;

        // REPLACE cascades the old child rows away; rewrite them anyway
        // in case the row was inserted fresh
        query("DELETE FROM files WHERE package_name = ?1")
            .bind(&record.name)
            .execute(&mut *tx)
            .await?;
        query("DELETE FROM dependencies WHERE package_name = ?1")
            .bind(&record.name)
            .execute(&mut *tx)
            .await?;

        for file in &record.files {
            query("INSERT INTO files (package_name, file_path) VALUES (?1, ?2)")
                .bind(&record.name)
                .bind(file)
                .execute(&mut *tx)
                .await?;
        }
        for dep in &record.dependencies {
            query(
                "INSERT INTO dependencies (package_name, dep_name, dep_version_expr)
                 VALUES (?1, ?2, ?3)",
            )
            .bind(&record.name)
            .bind(&dep.dep_name)
            .bind(&dep.dep_version_expr)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove a package record, returning the file paths it owned
    ///
    /// Dependency and file rows go with it; event rows are retained.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn remove_installed(&self, name: &str) -> Result<Vec<PathBuf>, Error> {
        let mut tx = self.pool.begin().await?;

        let rows = query("SELECT file_path FROM files WHERE package_name = ?1")
            .bind(name)
            .fetch_all(&mut *tx)
            .await?;
        let files = rows
            .iter()
            .map(|row| PathBuf::from(row.get::<String, _>("file_path")))
            .collect();

        query("DELETE FROM packages WHERE name = ?1")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(files)
    }

    /// Fetch one installed record with files and dependencies
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_installed(&self, name: &str) -> Result<Option<InstalledRecord>, Error> {
        let row = query("SELECT name, version, install_date, build_options, explicit FROM packages WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let files = query("SELECT file_path FROM files WHERE package_name = ?1 ORDER BY id")
            .bind(name)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| r.get::<String, _>("file_path"))
            .collect();

        let dependencies = query(
            "SELECT dep_name, dep_version_expr FROM dependencies WHERE package_name = ?1 ORDER BY id",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| DependencyRow {
            dep_name: r.get("dep_name"),
            dep_version_expr: r.get("dep_version_expr"),
        })
        .collect();

        Ok(Some(InstalledRecord {
            name: row.get("name"),
            version: row.get("version"),
            install_date: row.get("install_date"),
            build_options: row.get("build_options"),
            explicit: row.get::<i64, _>("explicit") != 0,
            files,
            dependencies,
        }))
    }

    /// List all installed records (files and dependencies included)
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_installed(&self) -> Result<Vec<InstalledRecord>, Error> {
        let names: Vec<String> = query("SELECT name FROM packages ORDER BY name")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.get("name"))
            .collect();

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            if let Some(record) = self.get_installed(&name).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Installed name -> parsed version, for the resolver
    ///
    /// Unparsable versions are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn installed_versions(&self) -> Result<HashMap<String, Version>, Error> {
        let rows = query("SELECT name, version FROM packages")
            .fetch_all(&self.pool)
            .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("name");
            let version: String = row.get("version");
            match Version::parse(&version) {
                Ok(parsed) => {
                    map.insert(name, parsed);
                }
                Err(_) => warn!(package = %name, version = %version, "unparsable installed version"),
            }
        }
        Ok(map)
    }

    /// Direct reverse dependents: installed packages whose dependency
    /// rows name `name`
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn reverse_dependents(&self, name: &str) -> Result<Vec<String>, Error> {
        let rows = query(
            "SELECT DISTINCT package_name FROM dependencies WHERE dep_name = ?1 ORDER BY package_name",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("package_name")).collect())
    }

    /// Append an event; never fails the caller
    ///
    /// Event loss is tolerable but logged.
    pub async fn append_event(&self, event: &EventRecord) {
        let ts = chrono::Utc::now().timestamp();
        let result = query(
            "INSERT INTO events (pkg_name, stage, level, message, ts) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&event.pkg_name)
        .bind(&event.stage)
        .bind(event.level.as_str())
        .bind(&event.message)
        .bind(ts)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(stage = %event.stage, error = %e, "event dropped");
        }
    }

    /// Recent events, newest first, optionally scoped to one package
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_events(
        &self,
        pkg_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<EventRow>, Error> {
        let rows = match pkg_name {
            Some(pkg) => {
                query("SELECT id, pkg_name, stage, level, message, ts FROM events WHERE pkg_name = ?1 ORDER BY id DESC LIMIT ?2")
                    .bind(pkg)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                query("SELECT id, pkg_name, stage, level, message, ts FROM events ORDER BY id DESC LIMIT ?1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| EventRow {
                id: row.get("id"),
                pkg_name: row.get("pkg_name"),
                stage: row.get("stage"),
                level: row.get("level"),
                message: row.get("message"),
                ts: row.get("ts"),
            })
            .collect())
    }
}
