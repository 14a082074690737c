//! Catalog of installed artifacts.
//!
//! The install pipeline is the only writer: it calls [`CatalogStore::create`]
//! once a file has passed every validation step. Everything else reads.

mod sqlite;

pub use sqlite::SqliteCatalog;

use crate::error::{Result, StowageError};
use crate::storage::StorageHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// A catalogued, installed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub id: String,
    /// File name of the installed artifact, e.g. `gemma-3-1b-it-Q4_K_M.gguf`.
    pub name: String,
    pub size_bytes: u64,
    pub installed_at: DateTime<Utc>,
    pub storage_handle: StorageHandle,
}

impl ArtifactRecord {
    /// Path the record's handle was issued for. Use
    /// [`CatalogStore::resolve_path`] to get a validated path.
    pub fn location(&self) -> &Path {
        self.storage_handle.raw_path()
    }
}

/// Durable registry of installed artifacts.
pub trait CatalogStore: Send + Sync {
    /// Register the file at `file_path`.
    ///
    /// Fails with `UnknownFormat` when the extension is not the artifact
    /// extension and with `AccessDenied` when the file cannot be reached.
    /// Registering a name that already exists replaces the old record.
    fn create(&self, file_path: &Path) -> Result<ArtifactRecord>;

    fn query_by_name(&self, name: &str) -> Result<Option<ArtifactRecord>>;

    fn get(&self, id: &str) -> Result<Option<ArtifactRecord>>;

    /// All records, most recently installed first.
    fn list(&self) -> Result<Vec<ArtifactRecord>>;

    /// Delete a record. Returns `false` if it was already gone.
    fn delete(&self, record: &ArtifactRecord) -> Result<bool>;

    /// Replace a record's storage handle.
    fn update_handle(&self, id: &str, handle: &StorageHandle) -> Result<()>;

    /// Resolve a record's handle to a usable path, renewing and persisting it
    /// when it has gone stale.
    fn resolve_path(&self, record: &ArtifactRecord) -> Result<PathBuf> {
        match record.storage_handle.resolve() {
            Ok(path) => Ok(path),
            Err(StowageError::HandleExpired { .. }) => {
                let renewed = record.storage_handle.renew()?;
                info!("Renewing stale storage handle for {}", record.name);
                self.update_handle(&record.id, &renewed)?;
                renewed.resolve()
            }
            Err(e) => Err(e),
        }
    }
}

/// Check a file is acceptable for registration and return its size.
pub(crate) fn validate_artifact_file(file_path: &Path, extension: &str) -> Result<u64> {
    let matches_extension = file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false);
    if !matches_extension {
        return Err(StowageError::UnknownFormat {
            path: file_path.to_path_buf(),
            expected: extension.to_string(),
        });
    }

    match std::fs::metadata(file_path) {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        _ => Err(StowageError::AccessDenied(file_path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_rejects_wrong_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("model.bin");
        std::fs::write(&path, b"x").unwrap();
        assert!(matches!(
            validate_artifact_file(&path, "gguf"),
            Err(StowageError::UnknownFormat { .. })
        ));
    }

    #[test]
    fn test_validate_missing_file_is_access_denied() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            validate_artifact_file(&tmp.path().join("model.gguf"), "gguf"),
            Err(StowageError::AccessDenied(_))
        ));
    }

    #[test]
    fn test_validate_returns_size() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("model.GGUF");
        std::fs::write(&path, vec![0u8; 42]).unwrap();
        assert_eq!(validate_artifact_file(&path, "gguf").unwrap(), 42);
    }
}
