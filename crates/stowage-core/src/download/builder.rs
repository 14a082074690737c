//! Builder for configuring orchestrator initialization.

use super::orchestrator::DownloadOrchestrator;
use crate::catalog::{CatalogStore, SqliteCatalog};
use crate::config::{PathsConfig, ProvisionConfig};
use crate::error::{Result, StowageError};
use crate::events::EventBus;
use crate::install::InstallPipeline;
use crate::registry::ArtifactRegistry;
use crate::storage::StorageRoot;
use crate::transport::{HttpTransport, Transport};
use crate::verify::IntegrityVerifier;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Builder for [`DownloadOrchestrator`].
///
/// Every collaborator is optional; unset ones get production defaults.
///
/// # Example
///
/// ```rust,no_run
/// use stowage_core::{DownloadOrchestrator, ProvisionConfig};
///
/// # fn main() -> stowage_core::Result<()> {
/// let orchestrator = DownloadOrchestrator::builder(ProvisionConfig::new("./models"))
///     .auto_create_dirs(true)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct OrchestratorBuilder {
    config: ProvisionConfig,
    auto_create_dirs: bool,
    catalog_path: Option<PathBuf>,
    transport: Option<Arc<dyn Transport>>,
    catalog: Option<Arc<dyn CatalogStore>>,
    registry: Option<Arc<ArtifactRegistry>>,
    event_bus: Option<EventBus>,
}

impl OrchestratorBuilder {
    pub fn new(config: ProvisionConfig) -> Self {
        Self {
            config,
            auto_create_dirs: false,
            catalog_path: None,
            transport: None,
            catalog: None,
            registry: None,
            event_bus: None,
        }
    }

    /// Create the storage root if it doesn't exist.
    ///
    /// Default: `false` (the storage root must exist)
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Where the default SQLite catalog lives.
    ///
    /// Default: `<storage root>/catalog.sqlite`. Ignored when a catalog is
    /// supplied with [`Self::with_catalog`].
    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    /// Default: [`HttpTransport`]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Default: [`SqliteCatalog`]
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogStore>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Default: [`ArtifactRegistry::builtin`]
    pub fn with_registry(mut self, registry: Arc<ArtifactRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share an existing bus, e.g. one the UI already listens on.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Result<DownloadOrchestrator> {
        let config = self.config;
        let storage = StorageRoot::new(&config.storage_root, &config.incoming_dir);

        if !self.auto_create_dirs && !config.storage_root.is_dir() {
            return Err(StowageError::Config {
                message: format!(
                    "Storage root does not exist: {}",
                    config.storage_root.display()
                ),
            });
        }
        storage.ensure_dirs()?;

        let catalog: Arc<dyn CatalogStore> = match self.catalog {
            Some(catalog) => catalog,
            None => {
                let path = self
                    .catalog_path
                    .unwrap_or_else(|| config.storage_root.join(PathsConfig::CATALOG_DB_NAME));
                Arc::new(
                    SqliteCatalog::open(path)?
                        .with_artifact_extension(config.artifact_extension.clone())
                        .with_handle_lifetime(config.handle_lifetime),
                )
            }
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ArtifactRegistry::builtin()));
        let verifier = IntegrityVerifier::new(Arc::clone(&registry), config.verification_policy);
        let pipeline = InstallPipeline::new(storage, catalog, verifier, config.min_valid_size);

        info!(
            "Download orchestrator ready (root {}, {} policy)",
            config.storage_root.display(),
            config.verification_policy
        );

        Ok(DownloadOrchestrator::from_parts(
            pipeline,
            transport,
            registry,
            self.event_bus.unwrap_or_default(),
        ))
    }
}
