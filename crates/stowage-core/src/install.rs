//! Install pipeline: turns a finished download into a catalogued artifact.
//!
//! Steps, in order:
//! 1. size floor on the downloaded file (`CorruptDownload`)
//! 2. digest verification (`VerificationFailure`)
//! 3. copy to a hidden staging file in the storage root
//! 4. size floor on the copy (`CopyFailure`), then rename over the destination
//! 5. catalog registration
//!
//! Steps 1-4 are [`InstallPipeline::stage`], step 5 is
//! [`InstallPipeline::register`]. The catalog is only touched in step 5, and
//! a failure at any step creates neither a record nor a destination file. The
//! destination is only ever replaced by a rename, so it is never observed
//! half written.

use crate::cancel::CancellationToken;
use crate::catalog::{ArtifactRecord, CatalogStore};
use crate::config::InstallConfig;
use crate::error::{Result, StowageError};
use crate::source::SourceLocator;
use crate::storage::{file_size, remove_if_exists, StorageRoot};
use crate::verify::{IntegrityVerifier, VerificationResult};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What pre-flight cleanup repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Destination file that was deleted.
    pub removed_file: Option<PathBuf>,
    /// Id of the catalog record that was deleted.
    pub removed_record: Option<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.removed_file.is_none() && self.removed_record.is_none()
    }
}

/// A validated copy in the storage root, ready for registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub source: SourceLocator,
    pub destination: PathBuf,
    pub size_bytes: u64,
    pub verification: VerificationResult,
}

pub struct InstallPipeline {
    storage: StorageRoot,
    catalog: Arc<dyn CatalogStore>,
    verifier: IntegrityVerifier,
    min_valid_size: u64,
}

impl InstallPipeline {
    pub fn new(
        storage: StorageRoot,
        catalog: Arc<dyn CatalogStore>,
        verifier: IntegrityVerifier,
        min_valid_size: u64,
    ) -> Self {
        Self {
            storage,
            catalog,
            verifier,
            min_valid_size,
        }
    }

    pub fn storage(&self) -> &StorageRoot {
        &self.storage
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    pub fn min_valid_size(&self) -> u64 {
        self.min_valid_size
    }

    /// Repair what a crashed or corrupt earlier install left behind.
    ///
    /// An undersized file at the destination is deleted together with any
    /// catalog record of the same name, as is a file whose size disagrees
    /// with its record. A record whose file is missing entirely is deleted
    /// as well. Leftover staging copies are removed.
    pub fn preflight_cleanup(&self, source: &SourceLocator) -> Result<CleanupReport> {
        let destination = self.storage.destination_for(source);
        let mut report = CleanupReport::default();

        let staging = self.storage.staging_path(source);
        if remove_if_exists(&staging)? {
            debug!("Removed leftover staging file {}", staging.display());
        }

        let record = self.catalog.query_by_name(source.artifact_name())?;
        let stale = match (file_size(&destination)?, &record) {
            (Some(size), _) if size < self.min_valid_size => {
                warn!(
                    "Removing undersized file {} ({} bytes) before downloading {}",
                    destination.display(),
                    size,
                    source
                );
                true
            }
            (Some(size), Some(record)) if size != record.size_bytes => {
                warn!(
                    "Removing {} ({} bytes), catalogued as {} bytes",
                    destination.display(),
                    size,
                    record.size_bytes
                );
                true
            }
            (Some(_), _) => false,
            (None, _) => true,
        };
        if !stale {
            return Ok(report);
        }

        if remove_if_exists(&destination)? {
            report.removed_file = Some(destination);
        }
        if let Some(record) = record {
            warn!("Removing stale catalog record {} ({})", record.name, record.id);
            self.catalog.delete(&record)?;
            report.removed_record = Some(record.id);
        }

        Ok(report)
    }

    /// Run steps 1-4 on a downloaded file.
    ///
    /// The temporary file is removed whatever the outcome.
    pub async fn stage(
        &self,
        temp_path: &Path,
        source: &SourceLocator,
        cancel: &CancellationToken,
    ) -> Result<StagedArtifact> {
        let result = self.stage_inner(temp_path, source, cancel).await;
        if let Err(e) = remove_if_exists(temp_path) {
            warn!("Failed to remove temp file {}: {}", temp_path.display(), e);
        }
        result
    }

    async fn stage_inner(
        &self,
        temp_path: &Path,
        source: &SourceLocator,
        cancel: &CancellationToken,
    ) -> Result<StagedArtifact> {
        let name = source.artifact_name();

        let downloaded = file_size(temp_path)?.unwrap_or(0);
        if downloaded < self.min_valid_size {
            log_corrupt_preview(temp_path);
            return Err(StowageError::CorruptDownload {
                path: temp_path.to_path_buf(),
                size: downloaded,
                minimum: self.min_valid_size,
            });
        }
        cancel.check()?;

        let verification = self.verifier.verify(temp_path, name).await?.into_result(name)?;
        cancel.check()?;

        let destination = self.storage.destination_for(source);
        let staging = self.storage.staging_path(source);
        let copied = match self.copy_into_place(temp_path, &staging, &destination).await {
            Ok(copied) => copied,
            Err(e) => {
                let _ = remove_if_exists(&staging);
                return Err(e);
            }
        };

        debug!(
            "Staged {} ({} bytes, {:?})",
            destination.display(),
            copied,
            verification
        );
        Ok(StagedArtifact {
            source: source.clone(),
            destination,
            size_bytes: copied,
            verification,
        })
    }

    /// Copy `temp_path` to `staging`, check its size and rename it over
    /// `destination`. Returns the installed size.
    async fn copy_into_place(
        &self,
        temp_path: &Path,
        staging: &Path,
        destination: &Path,
    ) -> Result<u64> {
        let copy_failure = |size: u64| StowageError::CopyFailure {
            path: destination.to_path_buf(),
            size,
            minimum: self.min_valid_size,
        };

        if let Err(e) = tokio::fs::copy(temp_path, staging).await {
            error!("Copy to {} failed: {}", staging.display(), e);
            return Err(copy_failure(file_size(staging).ok().flatten().unwrap_or(0)));
        }

        let copied = file_size(staging)?.unwrap_or(0);
        if copied < self.min_valid_size {
            return Err(copy_failure(copied));
        }

        if let Err(e) = tokio::fs::rename(staging, destination).await {
            error!(
                "Moving {} into place at {} failed: {}",
                staging.display(),
                destination.display(),
                e
            );
            return Err(copy_failure(copied));
        }
        Ok(copied)
    }

    /// Step 5: create the catalog record for a staged artifact.
    ///
    /// On failure the staged file is removed.
    pub fn register(&self, staged: &StagedArtifact) -> Result<ArtifactRecord> {
        match self.catalog.create(&staged.destination) {
            Ok(record) => {
                info!(
                    "Installed {} ({} bytes) as {}",
                    record.name, record.size_bytes, record.id
                );
                Ok(record)
            }
            Err(e) => {
                error!("Failed to catalogue {}: {}", staged.destination.display(), e);
                self.discard(staged);
                Err(e)
            }
        }
    }

    /// Remove a staged file that will not be registered.
    pub fn discard(&self, staged: &StagedArtifact) {
        match remove_if_exists(&staged.destination) {
            Ok(true) => debug!("Discarded staged file {}", staged.destination.display()),
            Ok(false) => {}
            Err(e) => warn!(
                "Failed to discard staged file {}: {}",
                staged.destination.display(),
                e
            ),
        }
    }
}

/// Log the head of a too-small download; servers often answer with an HTML
/// or JSON error page instead of the artifact.
fn log_corrupt_preview(path: &Path) {
    let Ok(file) = std::fs::File::open(path) else {
        return;
    };
    let mut head = Vec::with_capacity(InstallConfig::CORRUPT_PREVIEW_BYTES);
    if file
        .take(InstallConfig::CORRUPT_PREVIEW_BYTES as u64)
        .read_to_end(&mut head)
        .is_ok()
    {
        debug!(
            "Undersized download {} starts with: {}",
            path.display(),
            String::from_utf8_lossy(&head)
        );
    }
}
