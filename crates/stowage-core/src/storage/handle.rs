//! Renewable storage handles.
//!
//! A handle is the catalog's capability for reaching an installed file. It
//! expires after a fixed lifetime or when the file it was issued for changes
//! underneath it, and must then be renewed before use.

use crate::error::{Result, StowageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

/// Identity of the file a handle was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Fingerprint {
    len: u64,
    modified_secs: i64,
}

impl Fingerprint {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        let modified_secs = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Some(Self {
            len: meta.len(),
            modified_secs,
        })
    }
}

/// Opaque, renewable capability referencing an installed artifact file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageHandle {
    token: String,
    path: PathBuf,
    issued_at: DateTime<Utc>,
    lifetime_secs: u64,
    fingerprint: Fingerprint,
}

impl StorageHandle {
    /// Issue a handle for an existing file.
    ///
    /// Fails with `AccessDenied` if the file cannot be reached.
    pub fn establish(path: impl Into<PathBuf>, lifetime: Duration) -> Result<Self> {
        let path = path.into();
        let fingerprint =
            Fingerprint::of(&path).ok_or_else(|| StowageError::AccessDenied(path.clone()))?;
        Ok(Self {
            token: uuid::Uuid::new_v4().to_string(),
            path,
            issued_at: Utc::now(),
            lifetime_secs: lifetime.as_secs(),
            fingerprint,
        })
    }

    /// Opaque token identifying this issuance.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// When the handle lapses. `None` if the lifetime runs past the range
    /// of representable dates, in which case it never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.lifetime_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| self.issued_at.checked_add_signed(lifetime))
    }

    /// True once the lifetime has elapsed or the file changed since issuance.
    pub fn is_stale(&self) -> bool {
        if self.expires_at().is_some_and(|expiry| Utc::now() >= expiry) {
            return true;
        }
        match Fingerprint::of(&self.path) {
            Some(current) => current != self.fingerprint,
            None => false,
        }
    }

    /// Resolve the handle to a usable path.
    ///
    /// Returns `HandleExpired` for a stale handle and `AccessDenied` when the
    /// file is gone.
    pub fn resolve(&self) -> Result<PathBuf> {
        if !self.path.is_file() {
            return Err(StowageError::AccessDenied(self.path.clone()));
        }
        if self.is_stale() {
            return Err(StowageError::HandleExpired {
                path: self.path.clone(),
            });
        }
        Ok(self.path.clone())
    }

    /// Issue a fresh handle for the same file with the same lifetime.
    pub fn renew(&self) -> Result<Self> {
        Self::establish(&self.path, Duration::from_secs(self.lifetime_secs))
    }

    /// Path the handle was issued for, without checking validity.
    pub(crate) fn raw_path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_establish_and_resolve() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.gguf");
        std::fs::write(&path, b"weights").unwrap();

        let handle = StorageHandle::establish(&path, Duration::from_secs(60)).unwrap();
        assert!(!handle.is_stale());
        assert_eq!(handle.resolve().unwrap(), path);
    }

    #[test]
    fn test_establish_missing_file_is_access_denied() {
        let tmp = TempDir::new().unwrap();
        let err = StorageHandle::establish(tmp.path().join("missing.gguf"), Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, StowageError::AccessDenied(_)));
    }

    #[test]
    fn test_expired_handle_then_renew() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.gguf");
        std::fs::write(&path, b"weights").unwrap();

        let handle = StorageHandle::establish(&path, Duration::ZERO).unwrap();
        assert!(handle.is_stale());
        assert!(matches!(
            handle.resolve(),
            Err(StowageError::HandleExpired { .. })
        ));

        let mut renewed = handle.renew().unwrap();
        renewed.lifetime_secs = 60;
        assert_ne!(renewed.token(), handle.token());
        assert_eq!(renewed.resolve().unwrap(), path);
    }

    #[test]
    fn test_changed_file_makes_handle_stale() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.gguf");
        std::fs::write(&path, b"weights").unwrap();
        let handle = StorageHandle::establish(&path, Duration::from_secs(60)).unwrap();

        std::fs::write(&path, b"different weights").unwrap();
        assert!(handle.is_stale());
        assert!(handle.renew().unwrap().resolve().is_ok());
    }

    #[test]
    fn test_huge_lifetime_never_expires() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.gguf");
        std::fs::write(&path, b"weights").unwrap();

        for lifetime in [Duration::MAX, Duration::from_secs(1 << 62)] {
            let handle = StorageHandle::establish(&path, lifetime).unwrap();
            assert_eq!(handle.expires_at(), None);
            assert!(!handle.is_stale());
            assert_eq!(handle.resolve().unwrap(), path);
        }

        let handle = StorageHandle::establish(&path, Duration::from_secs(3600)).unwrap();
        assert_eq!(
            handle.expires_at(),
            Some(handle.issued_at() + chrono::Duration::hours(1))
        );
    }

    #[test]
    fn test_deleted_file_is_access_denied() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.gguf");
        std::fs::write(&path, b"weights").unwrap();
        let handle = StorageHandle::establish(&path, Duration::from_secs(60)).unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(handle.resolve(), Err(StowageError::AccessDenied(_))));
        assert!(handle.renew().is_err());
    }
}
