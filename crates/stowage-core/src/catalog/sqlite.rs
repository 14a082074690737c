//! SQLite-backed catalog store.

use super::{validate_artifact_file, ArtifactRecord, CatalogStore};
use crate::config::{HandleConfig, InstallConfig};
use crate::error::{Result, StowageError};
use crate::storage::StorageHandle;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const SELECT_COLUMNS: &str = "SELECT id, name, size_bytes, installed_at, handle_json FROM artifacts";

/// Catalog store persisted in a SQLite database.
pub struct SqliteCatalog {
    db_path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
    artifact_extension: String,
    handle_lifetime: Duration,
}

impl SqliteCatalog {
    /// Create or open a catalog database at the given path.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| StowageError::Io {
                    message: format!("Failed to create directory {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=30000;
            PRAGMA synchronous=NORMAL;
            ",
        )?;
        Self::from_connection(conn, Some(db_path))
    }

    /// A catalog that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        Self::ensure_schema(&conn)?;
        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
            artifact_extension: InstallConfig::ARTIFACT_EXTENSION.to_string(),
            handle_lifetime: HandleConfig::DEFAULT_LIFETIME,
        })
    }

    pub fn with_artifact_extension(mut self, extension: impl Into<String>) -> Self {
        self.artifact_extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn with_handle_lifetime(mut self, lifetime: Duration) -> Self {
        self.handle_lifetime = lifetime;
        self
    }

    /// Database path, `None` for an in-memory catalog.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                installed_at TEXT NOT NULL,
                handle_json TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_artifacts_installed ON artifacts(installed_at)",
            [],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StowageError::Database {
            message: "Failed to acquire connection lock".to_string(),
            source: None,
        })
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<ArtifactRecord> {
        let installed_at: String = row.get(3)?;
        let handle_json: String = row.get(4)?;

        let installed_at = DateTime::parse_from_rfc3339(&installed_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
            })?;
        let storage_handle: StorageHandle = serde_json::from_str(&handle_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let size_bytes: i64 = row.get(2)?;

        Ok(ArtifactRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            size_bytes: size_bytes as u64,
            installed_at,
            storage_handle,
        })
    }
}

impl CatalogStore for SqliteCatalog {
    fn create(&self, file_path: &Path) -> Result<ArtifactRecord> {
        let size_bytes = validate_artifact_file(file_path, &self.artifact_extension)?;
        let name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StowageError::AccessDenied(file_path.to_path_buf()))?
            .to_string();
        let storage_handle = StorageHandle::establish(file_path, self.handle_lifetime)?;

        let record = ArtifactRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            size_bytes,
            installed_at: Utc::now(),
            storage_handle,
        };
        let handle_json = serde_json::to_string(&record.storage_handle)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO artifacts (id, name, path, size_bytes, installed_at, handle_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                 id=excluded.id,
                 path=excluded.path,
                 size_bytes=excluded.size_bytes,
                 installed_at=excluded.installed_at,
                 handle_json=excluded.handle_json",
            params![
                record.id,
                record.name,
                file_path.to_string_lossy(),
                record.size_bytes as i64,
                record.installed_at.to_rfc3339(),
                handle_json,
            ],
        )?;

        debug!("Catalogued {} as {}", record.name, record.id);
        Ok(record)
    }

    fn query_by_name(&self, name: &str) -> Result<Option<ArtifactRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("{} WHERE name = ?1", SELECT_COLUMNS),
                params![name],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn get(&self, id: &str) -> Result<Option<ArtifactRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list(&self) -> Result<Vec<ArtifactRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY installed_at DESC, name ASC",
            SELECT_COLUMNS
        ))?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn delete(&self, record: &ArtifactRecord) -> Result<bool> {
        let conn = self.lock()?;
        let rows_affected =
            conn.execute("DELETE FROM artifacts WHERE id = ?1", params![record.id])?;
        if rows_affected > 0 {
            debug!("Deleted catalog record {} ({})", record.name, record.id);
        }
        Ok(rows_affected > 0)
    }

    fn update_handle(&self, id: &str, handle: &StorageHandle) -> Result<()> {
        let handle_json = serde_json::to_string(handle)?;
        let conn = self.lock()?;
        let rows_affected = conn.execute(
            "UPDATE artifacts SET handle_json = ?1 WHERE id = ?2",
            params![handle_json, id],
        )?;
        if rows_affected == 0 {
            return Err(StowageError::Database {
                message: format!("No catalog record with id {}", id),
                source: None,
            });
        }
        Ok(())
    }
}
