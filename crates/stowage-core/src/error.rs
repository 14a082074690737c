//! Error types for Stowage.
//!
//! `StowageError` carries the full detail of a failure inside the library.
//! `FailureKind` is the coarse, serialisable classification that travels on
//! `Failed` events so callers can decide whether to retry, and from where.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Stowage library.
#[derive(Debug, Error)]
pub enum StowageError {
    // Transfer errors
    #[error("Transfer failed for {source_url}: {message}")]
    Transport { source_url: String, message: String },

    #[error("Invalid source {source_url}: {message}")]
    InvalidSource { source_url: String, message: String },

    #[error("Download cancelled")]
    DownloadCancelled,

    #[error("Download orchestrator has been shut down")]
    ShutDown,

    #[error("{path:?} is already being installed from {active_source}")]
    DestinationBusy { path: PathBuf, active_source: String },

    // Install pipeline errors
    #[error("Downloaded file {path:?} is {size} bytes, below the {minimum} byte floor")]
    CorruptDownload { path: PathBuf, size: u64, minimum: u64 },

    #[error("Digest mismatch for {artifact}: expected {expected}, got {actual}")]
    VerificationFailure {
        artifact: String,
        expected: String,
        actual: String,
    },

    #[error("Copied file {path:?} is {size} bytes, below the {minimum} byte floor")]
    CopyFailure { path: PathBuf, size: u64, minimum: u64 },

    // Catalog errors
    #[error("Unknown artifact format for {path:?}: expected .{expected}")]
    UnknownFormat { path: PathBuf, expected: String },

    #[error("Access denied: {0}")]
    AccessDenied(PathBuf),

    #[error("Storage handle for {path:?} has expired")]
    HandleExpired { path: PathBuf },

    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Stowage operations.
pub type Result<T> = std::result::Result<T, StowageError>;

/// Coarse failure classification published with `Failed` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or IO failure while transferring.
    Transport,
    /// Downloaded file below the size floor.
    CorruptDownload,
    /// Digest did not match the registered value.
    Verification,
    /// Copied file below the size floor.
    Copy,
    /// File extension rejected by the catalog.
    UnknownFormat,
    /// Storage handle could not be established.
    AccessDenied,
    /// Anything else (database, configuration, bugs).
    Internal,
}

impl FailureKind {
    /// Whether the caller can reasonably try again without user intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Transport
                | FailureKind::CorruptDownload
                | FailureKind::Verification
                | FailureKind::Copy
        )
    }

    /// Whether a retry should prefer an alternate origin from the backup table.
    pub fn suggests_backup(&self) -> bool {
        matches!(self, FailureKind::Transport | FailureKind::Verification)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::CorruptDownload => "corrupt_download",
            FailureKind::Verification => "verification",
            FailureKind::Copy => "copy",
            FailureKind::UnknownFormat => "unknown_format",
            FailureKind::AccessDenied => "access_denied",
            FailureKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Conversion implementations for common error types

impl From<std::io::Error> for StowageError {
    fn from(err: std::io::Error) -> Self {
        StowageError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for StowageError {
    fn from(err: serde_json::Error) -> Self {
        StowageError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for StowageError {
    fn from(err: rusqlite::Error) -> Self {
        StowageError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for StowageError {
    fn from(err: reqwest::Error) -> Self {
        StowageError::Transport {
            source_url: err
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "<unknown>".to_string()),
            message: err.to_string(),
        }
    }
}

impl StowageError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        StowageError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Classify this error for event publication.
    ///
    /// IO errors are reported as transport failures: inside a transfer they
    /// come from writing the temp file, which the caller recovers from by
    /// retrying.
    pub fn kind(&self) -> FailureKind {
        match self {
            StowageError::Transport { .. } | StowageError::Io { .. } => FailureKind::Transport,
            StowageError::CorruptDownload { .. } => FailureKind::CorruptDownload,
            StowageError::VerificationFailure { .. } => FailureKind::Verification,
            StowageError::CopyFailure { .. } => FailureKind::Copy,
            StowageError::UnknownFormat { .. } => FailureKind::UnknownFormat,
            StowageError::AccessDenied(_) | StowageError::HandleExpired { .. } => {
                FailureKind::AccessDenied
            }
            _ => FailureKind::Internal,
        }
    }

    /// Check if this error should allow a caller-driven retry.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StowageError::CorruptDownload {
            path: PathBuf::from("/tmp/model.gguf.part"),
            size: 50_000,
            minimum: 100_000,
        };
        assert_eq!(
            err.to_string(),
            "Downloaded file \"/tmp/model.gguf.part\" is 50000 bytes, below the 100000 byte floor"
        );
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            StowageError::VerificationFailure {
                artifact: "a.gguf".into(),
                expected: "00".into(),
                actual: "ff".into(),
            }
            .kind(),
            FailureKind::Verification
        );
        assert_eq!(
            StowageError::AccessDenied(PathBuf::from("/nope")).kind(),
            FailureKind::AccessDenied
        );
        assert_eq!(StowageError::ShutDown.kind(), FailureKind::Internal);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(StowageError::Transport {
            source_url: "https://example.com/a.gguf".into(),
            message: "connection reset".into(),
        }
        .is_retryable());
        assert!(!StowageError::UnknownFormat {
            path: PathBuf::from("a.bin"),
            expected: "gguf".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_backup_suggestions() {
        assert!(FailureKind::Verification.suggests_backup());
        assert!(FailureKind::Transport.suggests_backup());
        assert!(!FailureKind::Copy.suggests_backup());
        assert!(!FailureKind::UnknownFormat.suggests_backup());
    }

    #[test]
    fn test_failure_kind_serde() {
        let json = serde_json::to_string(&FailureKind::CorruptDownload).unwrap();
        assert_eq!(json, "\"corrupt_download\"");
    }
}
