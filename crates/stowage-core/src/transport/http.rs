//! reqwest-based HTTP transport with progress tracking and cancellation.

use super::{FetchRequest, ProgressCallback, TransferProgress, Transport};
use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::error::{Result, StowageError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Streams HTTP GET responses into temporary files.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    progress_interval: Duration,
}

impl HttpTransport {
    /// Create a transport with the default timeouts.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .read_timeout(NetworkConfig::REQUEST_TIMEOUT)
            .timeout(NetworkConfig::RESOURCE_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| StowageError::Config {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing client, e.g. one with custom TLS or proxy settings.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            progress_interval: NetworkConfig::DOWNLOAD_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    async fn do_fetch(
        &self,
        request: &FetchRequest,
        on_progress: &ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let url = request.source.as_str();
        let transport_error = |message: String| StowageError::Transport {
            source_url: url.to_string(),
            message,
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(StowageError::DownloadCancelled),
            response = self.client.get(url).send() => {
                response.map_err(|e| transport_error(e.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(transport_error(format!("server responded with status {}", status)));
        }

        let bytes_expected = response.content_length().unwrap_or(0);
        let temp_path = &request.temp_path;
        if let Some(parent) = temp_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StowageError::io_with_path(e, parent))?;
        }
        let mut file = tokio::fs::File::create(temp_path)
            .await
            .map_err(|e| StowageError::io_with_path(e, temp_path))?;

        let mut bytes_written: u64 = 0;
        let mut last_report = Instant::now();
        let mut stream = response.bytes_stream();

        on_progress(TransferProgress::new(0, bytes_expected));

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(StowageError::DownloadCancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk =
                chunk.map_err(|e| transport_error(format!("error reading body: {}", e)))?;

            file.write_all(&chunk)
                .await
                .map_err(|e| StowageError::io_with_path(e, temp_path))?;
            bytes_written += chunk.len() as u64;

            if last_report.elapsed() >= self.progress_interval {
                on_progress(TransferProgress::new(bytes_written, bytes_expected));
                last_report = Instant::now();
            }
        }

        file.flush()
            .await
            .map_err(|e| StowageError::io_with_path(e, temp_path))?;
        file.sync_all()
            .await
            .map_err(|e| StowageError::io_with_path(e, temp_path))?;

        if bytes_expected > 0 && bytes_written != bytes_expected {
            return Err(transport_error(format!(
                "body ended after {} of {} bytes",
                bytes_written, bytes_expected
            )));
        }

        on_progress(TransferProgress::new(bytes_written, bytes_expected));
        Ok(bytes_written)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        request: FetchRequest,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        debug!("Fetching {} into {}", request.source, request.temp_path.display());

        match self.do_fetch(&request, &on_progress, &cancel).await {
            Ok(bytes) => {
                info!("Fetched {} bytes from {}", bytes, request.source);
                Ok(request.temp_path)
            }
            Err(e) => {
                discard_partial(&request.temp_path).await;
                if !matches!(e, StowageError::DownloadCancelled) {
                    warn!("Fetch of {} failed: {}", request.source, e);
                }
                Err(e)
            }
        }
    }
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial download {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial download {}: {}", path.display(), e),
    }
}
