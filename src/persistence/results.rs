//! Write-once results store.
//!
//! Serialized results are stored under the query identifier. A key is written
//! exactly once; readers get `None` until it exists.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::db::Results;
use crate::error::{DjqError, Result};

/// Key/value storage for serialized query results.
#[async_trait]
pub trait ResultsBackend: Send + Sync {
    /// Stores `value` under `key`. Fails if the key already holds a value.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Serializes and stores the results of a query.
    async fn put_results(&self, id: Uuid, results: &Results) -> Result<()> {
        let value = serde_json::to_string(results)
            .map_err(|e| DjqError::internal(format!("Failed to serialize results: {e}")))?;
        self.put(&id.to_string(), &value).await
    }

    /// Loads the results of a query, if they have been written.
    async fn get_results(&self, id: Uuid) -> Result<Option<Results>> {
        let Some(value) = self.get(&id.to_string()).await? else {
            return Ok(None);
        };
        serde_json::from_str(&value)
            .map(Some)
            .map_err(|e| DjqError::persistence(format!("Corrupt results for query {id}: {e}")))
    }
}

/// Results stored in the state database's `results` table.
#[derive(Debug, Clone)]
pub struct SqliteResults {
    pool: SqlitePool,
}

impl SqliteResults {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultsBackend for SqliteResults {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT INTO results (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| match e.as_database_error() {
                Some(db) if db.is_unique_violation() => {
                    DjqError::persistence(format!("Results for {key} were already written"))
                }
                _ => DjqError::persistence(format!("Failed to store results for {key}: {e}")),
            })?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM results WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DjqError::persistence(format!("Failed to load results for {key}: {e}")))?;
        Ok(row.map(|(value,)| value))
    }
}

/// Results stored as one JSON file per key.
///
/// Files are written under a temporary name and then hard-linked into place,
/// so readers never observe a partial file and a second writer fails.
#[derive(Debug, Clone)]
pub struct FileSystemResults {
    dir: PathBuf,
}

impl FileSystemResults {
    /// Creates the store, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            DjqError::persistence(format!(
                "Failed to create results directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(DjqError::persistence(format!("Invalid results key '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl ResultsBackend for FileSystemResults {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let staging = self.dir.join(format!(".{key}.{}.tmp", Uuid::new_v4()));

        tokio::fs::write(&staging, value).await.map_err(|e| {
            DjqError::persistence(format!("Failed to write results for {key}: {e}"))
        })?;

        let linked = tokio::fs::hard_link(&staging, &path).await;
        if let Err(e) = tokio::fs::remove_file(&staging).await {
            debug!("Failed to remove staging file {}: {}", staging.display(), e);
        }

        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(DjqError::persistence(
                format!("Results for {key} were already written"),
            )),
            Err(e) => Err(DjqError::persistence(format!(
                "Failed to store results for {key}: {e}"
            ))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DjqError::persistence(format!(
                "Failed to read results for {key}: {e}"
            ))),
        }
    }
}
