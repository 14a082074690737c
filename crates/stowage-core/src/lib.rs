//! Stowage Core - provisioning of large model artifacts onto local storage.
//!
//! This crate downloads model weight files from HTTP sources, validates and
//! verifies them, installs them into a managed storage root and registers
//! them in a catalog. Progress and outcomes are published on a typed event
//! bus. It has no UI; the `stowage` CLI is one caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use stowage_core::{DownloadEvent, DownloadOrchestrator, ProvisionConfig, SourceLocator};
//!
//! #[tokio::main]
//! async fn main() -> stowage_core::Result<()> {
//!     let orchestrator = DownloadOrchestrator::builder(ProvisionConfig::new("/path/to/models"))
//!         .auto_create_dirs(true)
//!         .build()?;
//!
//!     let source = SourceLocator::parse(
//!         "https://huggingface.co/unsloth/gemma-3-1b-it-GGUF/resolve/main/gemma-3-1b-it-Q4_K_M.gguf",
//!     )?;
//!     let mut events = orchestrator.subscribe_to(source.clone());
//!     orchestrator.start(&source)?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let DownloadEvent::Completed { local_path, .. } = &event {
//!             println!("Installed at {}", local_path.display());
//!         }
//!         if event.is_terminal() {
//!             break;
//!         }
//!     }
//!
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod gallery;
pub mod install;
pub mod registry;
pub mod source;
pub mod storage;
pub mod transport;
pub mod verify;

// Re-export commonly used types
pub use board::{DownloadStatus, StatusBoard};
pub use cancel::CancellationToken;
pub use catalog::{ArtifactRecord, CatalogStore, SqliteCatalog};
pub use config::{ProvisionConfig, VerificationPolicy};
pub use download::{
    DownloadOrchestrator, OrchestratorBuilder, StartOutcome, TaskId, TaskSnapshot, TaskState,
};
pub use error::{FailureKind, Result, StowageError};
pub use events::{DownloadEvent, EventBus, FailureReport, Subscription};
pub use install::{CleanupReport, InstallPipeline, StagedArtifact};
pub use registry::{ArtifactRegistry, BackupSourceTable};
pub use source::SourceLocator;
pub use storage::{StorageHandle, StorageRoot};
pub use transport::{FetchRequest, HttpTransport, ProgressCallback, TransferProgress, Transport};
pub use verify::{compute_sha256, IntegrityVerifier, Mismatch, VerificationResult};
