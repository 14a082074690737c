//! Shared fixtures for orchestrator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stowage_core::{
    ArtifactRegistry, CancellationToken, DownloadEvent, DownloadOrchestrator, FetchRequest,
    ProgressCallback, ProvisionConfig, Result, SqliteCatalog, StowageError, Subscription,
    TransferProgress, Transport,
};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Transport that writes generated bytes instead of talking to a server.
pub struct ScriptedTransport {
    pub total_bytes: u64,
    /// Whether the total is announced in progress reports.
    pub declare_total: bool,
    pub chunk_size: u64,
    pub fill: u8,
    /// Fail with a transport error after writing everything.
    pub fail_with: Option<String>,
    /// Block after the first chunk until released or cancelled.
    pub hold: Option<Arc<Notify>>,
    pub calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn delivering(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            declare_total: true,
            chunk_size: (total_bytes / 20).max(1),
            fill: 0xAB,
            fail_with: None,
            hold: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn undeclared(mut self) -> Self {
        self.declare_total = false;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    pub fn held(mut self, gate: Arc<Notify>) -> Self {
        self.hold = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(
        &self,
        request: FetchRequest,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let expected = if self.declare_total { self.total_bytes } else { 0 };
        let path = request.temp_path.clone();

        let outcome = async {
            let mut file = std::fs::File::create(&path)
                .map_err(|e| StowageError::io_with_path(e, &path))?;
            let buffer = vec![self.fill; self.chunk_size as usize];
            let mut written = 0u64;

            while written < self.total_bytes {
                cancel.check()?;
                let n = self.chunk_size.min(self.total_bytes - written);
                file.write_all(&buffer[..n as usize])
                    .map_err(|e| StowageError::io_with_path(e, &path))?;
                written += n;
                on_progress(TransferProgress::new(written, expected));

                if let Some(gate) = &self.hold {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(StowageError::DownloadCancelled),
                        _ = gate.notified() => {}
                    }
                } else {
                    tokio::task::yield_now().await;
                }
            }
            file.flush()
                .map_err(|e| StowageError::io_with_path(e, &path))?;

            if let Some(message) = &self.fail_with {
                return Err(StowageError::Transport {
                    source_url: request.source.to_string(),
                    message: message.clone(),
                });
            }
            Ok(path.clone())
        }
        .await;

        if outcome.is_err() {
            let _ = std::fs::remove_file(&path);
        }
        outcome
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub orchestrator: Arc<DownloadOrchestrator>,
    pub transport: Arc<ScriptedTransport>,
}

impl Harness {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self::with(transport, ArtifactRegistry::empty(), |config| config)
    }

    pub fn with(
        transport: ScriptedTransport,
        registry: ArtifactRegistry,
        configure: impl FnOnce(ProvisionConfig) -> ProvisionConfig,
    ) -> Self {
        let tmp = TempDir::new().unwrap();
        let config = configure(
            ProvisionConfig::new(tmp.path().join("models"))
                .with_incoming_dir(tmp.path().join("incoming")),
        );
        let transport = Arc::new(transport);
        let orchestrator = DownloadOrchestrator::builder(config)
            .auto_create_dirs(true)
            .with_transport(transport.clone())
            .with_catalog(Arc::new(SqliteCatalog::open_in_memory().unwrap()))
            .with_registry(Arc::new(registry))
            .build()
            .unwrap();

        Self {
            tmp,
            orchestrator: Arc::new(orchestrator),
            transport,
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        self.tmp.path().join("models")
    }

    pub fn incoming_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.tmp.path().join("incoming"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }
}

pub fn source(name: &str) -> stowage_core::SourceLocator {
    stowage_core::SourceLocator::parse(&format!(
        "https://models.example/repo/resolve/main/{}?download=true",
        name
    ))
    .unwrap()
}

/// Collect events until the first terminal one.
pub async fn until_terminal(events: &mut Subscription) -> (Vec<DownloadEvent>, DownloadEvent) {
    let mut progress = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(60), events.recv())
            .await
            .expect("timed out waiting for a terminal event")
            .expect("event bus closed");
        if event.is_terminal() {
            return (progress, event);
        }
        progress.push(event);
    }
}

/// Assert nothing else arrives for a short while.
pub async fn assert_quiet(events: &mut Subscription) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(events.try_recv(), None);
}

/// Wait until the orchestrator has no active tasks.
pub async fn wait_idle(orchestrator: &DownloadOrchestrator) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while orchestrator.active_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("orchestrator did not become idle");
}
