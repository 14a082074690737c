//! Transport boundary: one GET per request into a temporary file.
//!
//! The orchestrator only depends on [`Transport`]; [`HttpTransport`] is the
//! production implementation and tests substitute scripted ones.

mod http;

pub use http::HttpTransport;

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::source::SourceLocator;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Byte-level progress of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferProgress {
    pub bytes_written: u64,
    /// Declared total, `0` when the server did not announce one.
    pub bytes_expected: u64,
}

impl TransferProgress {
    pub fn new(bytes_written: u64, bytes_expected: u64) -> Self {
        Self {
            bytes_written,
            bytes_expected,
        }
    }
}

/// Callback invoked by a transport as bytes arrive.
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync + 'static>;

/// What to fetch and where to put it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub source: SourceLocator,
    /// File the transport writes to; created (or truncated) by the transport.
    pub temp_path: PathBuf,
}

/// Performs a single download.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Download `request.source` into `request.temp_path`.
    ///
    /// Returns the path of the completed file. On error or cancellation the
    /// transport removes whatever it wrote. Implementations must return
    /// `DownloadCancelled` promptly once `cancel` fires.
    async fn fetch(
        &self,
        request: FetchRequest,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<PathBuf>;
}
