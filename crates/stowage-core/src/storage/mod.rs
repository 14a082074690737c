//! Managed storage root layout and storage handles.
//!
//! Installed artifacts live one file per artifact directly under the storage
//! root, named by the source's file name. Transfers write to a separate
//! incoming directory so the destination path only ever holds validated data.

mod handle;

pub use handle::StorageHandle;

use crate::config::{InstallConfig, NetworkConfig};
use crate::error::{Result, StowageError};
use crate::source::SourceLocator;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Layout of the managed storage root and its incoming directory.
#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
    incoming: PathBuf,
}

impl StorageRoot {
    pub fn new(root: impl Into<PathBuf>, incoming: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            incoming: incoming.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn incoming_dir(&self) -> &Path {
        &self.incoming
    }

    /// Final location of the artifact a source installs.
    pub fn destination_for(&self, source: &SourceLocator) -> PathBuf {
        self.root.join(source.file_name())
    }

    /// Temporary file a transfer writes to.
    ///
    /// The task id prefix keeps a restarted transfer from colliding with a
    /// previous attempt that is still being torn down.
    pub fn incoming_path(&self, task_id: &str, source: &SourceLocator) -> PathBuf {
        self.incoming.join(format!(
            "{}-{}{}",
            task_id,
            source.file_name(),
            NetworkConfig::DOWNLOAD_TEMP_SUFFIX
        ))
    }

    /// Hidden sibling of the destination that an install copies into before
    /// renaming it into place.
    pub fn staging_path(&self, source: &SourceLocator) -> PathBuf {
        self.root.join(format!(
            ".{}{}",
            source.file_name(),
            InstallConfig::STAGING_SUFFIX
        ))
    }

    /// Create the storage root and incoming directory if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.root, &self.incoming] {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| StowageError::Io {
                    message: format!("Failed to create directory: {}", dir.display()),
                    path: Some(dir.clone()),
                    source: Some(e),
                })?;
                debug!("Created directory {}", dir.display());
            }
        }
        Ok(())
    }
}

/// Size of the file at `path`, or `None` if it does not exist.
pub(crate) fn file_size(path: &Path) -> Result<Option<u64>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StowageError::io_with_path(e, path)),
    }
}

/// Remove a file, treating "already gone" as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StowageError::io_with_path(e, path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source() -> SourceLocator {
        SourceLocator::parse("https://example.com/repo/resolve/main/model.gguf?download=true")
            .unwrap()
    }

    #[test]
    fn test_destination_is_flat() {
        let storage = StorageRoot::new("/models", "/tmp/incoming");
        assert_eq!(
            storage.destination_for(&source()),
            PathBuf::from("/models/model.gguf")
        );
    }

    #[test]
    fn test_incoming_path_outside_root() {
        let storage = StorageRoot::new("/models", "/tmp/incoming");
        let path = storage.incoming_path("abc", &source());
        assert_eq!(path, PathBuf::from("/tmp/incoming/abc-model.gguf.part"));
        assert!(!path.starts_with(storage.root()));
    }

    #[test]
    fn test_staging_path_beside_destination() {
        let storage = StorageRoot::new("/models", "/tmp/incoming");
        let staging = storage.staging_path(&source());
        assert_eq!(staging, PathBuf::from("/models/.model.gguf.partial"));
        assert_eq!(staging.parent(), storage.destination_for(&source()).parent());
    }

    #[test]
    fn test_ensure_dirs() {
        let tmp = TempDir::new().unwrap();
        let storage = StorageRoot::new(tmp.path().join("models"), tmp.path().join("incoming"));
        storage.ensure_dirs().unwrap();
        assert!(storage.root().is_dir());
        assert!(storage.incoming_dir().is_dir());
    }

    #[test]
    fn test_file_helpers() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.bin");
        assert_eq!(file_size(&path).unwrap(), None);
        std::fs::write(&path, b"12345").unwrap();
        assert_eq!(file_size(&path).unwrap(), Some(5));
        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
    }
}
