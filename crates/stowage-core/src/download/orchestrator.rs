//! Download orchestrator.
//!
//! Owns the set of active transfers, allows at most one per source and per
//! destination file, drives the install pipeline when a transfer finishes
//! and republishes everything on the event bus.
//!
//! All task mutation happens under one mutex. Progress updates, terminal
//! transitions and their events are applied while holding it, so a progress
//! callback can never be published after the task's terminal event. File
//! system and catalog work happens outside it, on the blocking pool.

use super::builder::OrchestratorBuilder;
use super::task::{DownloadTask, TaskId, TaskSnapshot, TaskState};
use crate::cancel::CancellationToken;
use crate::catalog::CatalogStore;
use crate::config::ProvisionConfig;
use crate::error::{Result, StowageError};
use crate::events::{DownloadEvent, EventBus, FailureReport, Subscription};
use crate::install::{InstallPipeline, StagedArtifact};
use crate::registry::ArtifactRegistry;
use crate::source::SourceLocator;
use crate::storage::{remove_if_exists, StorageRoot};
use crate::transport::{FetchRequest, ProgressCallback, TransferProgress, Transport};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of [`DownloadOrchestrator::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new task was created.
    Started(TaskId),
    /// A task for the source was already running; nothing changed.
    AlreadyActive(TaskId),
}

impl StartOutcome {
    pub fn task_id(&self) -> &TaskId {
        match self {
            StartOutcome::Started(id) | StartOutcome::AlreadyActive(id) => id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

struct ActiveTask {
    task: DownloadTask,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ActiveSet {
    tasks: HashMap<SourceLocator, ActiveTask>,
    shut_down: bool,
}

impl ActiveSet {
    /// The active task that installs to `destination`, whatever its source.
    fn installing_to(&self, destination: &Path) -> Option<&ActiveTask> {
        self.tasks
            .values()
            .find(|active| active.task.destination_path() == destination)
    }

    /// The entry for `source` if it still belongs to task `id`.
    fn owned_by(&mut self, source: &SourceLocator, id: &TaskId) -> Option<&mut ActiveTask> {
        self.tasks
            .get_mut(source)
            .filter(|active| active.task.id() == id)
    }
}

struct Shared {
    active: Mutex<ActiveSet>,
    pipeline: InstallPipeline,
    transport: Arc<dyn Transport>,
    registry: Arc<ArtifactRegistry>,
    bus: EventBus,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ActiveSet> {
        // Every critical section leaves the map consistent before it can panic.
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn on_progress(&self, source: &SourceLocator, id: &TaskId, progress: TransferProgress) {
        let mut active = self.lock();
        let Some(entry) = active.owned_by(source, id) else {
            return;
        };
        if let Some(fraction) = entry.task.record_progress(progress) {
            let snapshot = entry.task.snapshot();
            self.bus.publish(DownloadEvent::Progress {
                source: source.clone(),
                fraction,
                bytes_written: snapshot.bytes_written,
                bytes_expected: snapshot.bytes_expected,
            });
        }
    }

    /// Move a task from downloading to verifying. `false` if it is no longer
    /// ours to advance.
    fn begin_verifying(&self, source: &SourceLocator, id: &TaskId) -> bool {
        let mut active = self.lock();
        match active.owned_by(source, id) {
            Some(entry) if !entry.cancel.is_cancelled() => {
                entry.task.set_state(TaskState::Verifying);
                debug!("Task {} for {} is verifying", id, source);
                true
            }
            _ => false,
        }
    }

    fn fail(&self, source: &SourceLocator, id: &TaskId, err: &StowageError) {
        let mut active = self.lock();
        if active.owned_by(source, id).is_none() {
            return;
        }
        if let Some(mut entry) = active.tasks.remove(source) {
            entry.task.set_state(TaskState::Failed);
        }
        error!("Download of {} failed: {}", source, err);
        self.bus.publish(DownloadEvent::Failed {
            source: source.clone(),
            error: FailureReport::from(err),
        });
    }

    /// `true` while task `id` is still active and not cancelled.
    fn still_ours(&self, source: &SourceLocator, id: &TaskId) -> bool {
        self.lock()
            .owned_by(source, id)
            .is_some_and(|entry| !entry.cancel.is_cancelled())
    }

    /// Run a pipeline step on the blocking pool.
    async fn blocking<T, F>(self: &Arc<Self>, step: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&InstallPipeline) -> Result<T> + Send + 'static,
    {
        let shared = Arc::clone(self);
        tokio::task::spawn_blocking(move || step(&shared.pipeline))
            .await
            .map_err(|e| StowageError::Other(format!("Install worker failed: {}", e)))?
    }

    /// Register a staged artifact and publish the terminal event.
    ///
    /// The catalog write runs without the lock. If the task was cancelled in
    /// the meantime the new record and file are rolled back, so a cancelled
    /// task never leaves an install behind.
    async fn complete(self: &Arc<Self>, id: &TaskId, staged: StagedArtifact) {
        let source = staged.source.clone();
        if !self.still_ours(&source, id) {
            debug!("Task {} for {} was cancelled after staging", id, source);
            self.pipeline.discard(&staged);
            return;
        }

        let outcome = {
            let staged = staged.clone();
            self.blocking(move |pipeline| pipeline.register(&staged)).await
        };

        {
            let mut active = self.lock();
            let still_ours = active
                .owned_by(&source, id)
                .is_some_and(|entry| !entry.cancel.is_cancelled());
            if still_ours {
                if let Some(mut entry) = active.tasks.remove(&source) {
                    entry.task.set_state(match &outcome {
                        Ok(_) => TaskState::Completed,
                        Err(_) => TaskState::Failed,
                    });
                }
                match &outcome {
                    Ok(record) => {
                        self.bus.publish(DownloadEvent::Completed {
                            source,
                            local_path: staged.destination,
                            artifact_id: record.id.clone(),
                        });
                    }
                    Err(e) => {
                        error!("Install of {} failed: {}", source, e);
                        self.bus.publish(DownloadEvent::Failed {
                            source,
                            error: FailureReport::from(e),
                        });
                    }
                }
                return;
            }
        }

        let Ok(record) = outcome else {
            return;
        };
        debug!("Task {} for {} was cancelled during registration", id, source);
        let rollback = self
            .blocking(move |pipeline| {
                pipeline.catalog().delete(&record)?;
                pipeline.discard(&staged);
                Ok(())
            })
            .await;
        if let Err(e) = rollback {
            warn!("Failed to roll back cancelled install of {}: {}", source, e);
        }
    }

    /// Repair leftovers of an earlier install before transferring.
    async fn preflight(self: &Arc<Self>, source: &SourceLocator) {
        let target = source.clone();
        match self
            .blocking(move |pipeline| pipeline.preflight_cleanup(&target))
            .await
        {
            Ok(report) if !report.is_clean() => {
                info!("Cleaned up previous install of {}: {:?}", source, report)
            }
            Ok(_) => {}
            Err(e) => warn!("Pre-flight cleanup for {} failed: {}", source, e),
        }
    }

    /// Drive one task from transfer to terminal state.
    async fn run(
        self: Arc<Self>,
        id: TaskId,
        source: SourceLocator,
        temp_path: PathBuf,
        cancel: CancellationToken,
    ) {
        let on_progress: ProgressCallback = {
            let shared = Arc::clone(&self);
            let source = source.clone();
            let id = id.clone();
            Arc::new(move |progress| shared.on_progress(&source, &id, progress))
        };

        self.preflight(&source).await;
        if cancel.is_cancelled() {
            debug!("Task {} for {} cancelled before transfer", id, source);
            return;
        }

        let request = FetchRequest {
            source: source.clone(),
            temp_path,
        };
        let fetched = self
            .transport
            .fetch(request, on_progress, cancel.clone())
            .await;

        let downloaded = match fetched {
            Ok(path) => path,
            Err(e) => {
                if cancel.is_cancelled() {
                    debug!("Transfer of {} stopped after cancellation", source);
                } else {
                    self.fail(&source, &id, &e);
                }
                return;
            }
        };

        if !self.begin_verifying(&source, &id) {
            if let Err(e) = remove_if_exists(&downloaded) {
                warn!("Failed to remove {}: {}", downloaded.display(), e);
            }
            return;
        }

        match self.pipeline.stage(&downloaded, &source, &cancel).await {
            Ok(staged) => self.complete(&id, staged).await,
            Err(e) if cancel.is_cancelled() => {
                debug!("Install of {} stopped after cancellation: {}", source, e);
            }
            Err(e) => self.fail(&source, &id, &e),
        }
    }
}

/// Coordinates every artifact download of one storage root.
///
/// Construct once with [`DownloadOrchestrator::builder`] and share by
/// reference; call [`DownloadOrchestrator::shutdown`] before exiting.
pub struct DownloadOrchestrator {
    shared: Arc<Shared>,
}

impl DownloadOrchestrator {
    pub fn builder(config: ProvisionConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub(super) fn from_parts(
        pipeline: InstallPipeline,
        transport: Arc<dyn Transport>,
        registry: Arc<ArtifactRegistry>,
        bus: EventBus,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                active: Mutex::new(ActiveSet::default()),
                pipeline,
                transport,
                registry,
                bus,
            }),
        }
    }

    /// Start downloading `source` unless a task for it is already active.
    ///
    /// Returns immediately; pre-flight cleanup and the transfer run on the
    /// current tokio runtime. Fails with `DestinationBusy` while a different
    /// source that installs to the same file is active.
    pub fn start(&self, source: &SourceLocator) -> Result<StartOutcome> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| StowageError::Config {
            message: format!("start() must be called inside a tokio runtime: {}", e),
        })?;

        let mut active = self.shared.lock();
        if active.shut_down {
            return Err(StowageError::ShutDown);
        }
        if let Some(existing) = active.tasks.get(source) {
            debug!("Download of {} already active as {}", source, existing.task.id());
            return Ok(StartOutcome::AlreadyActive(existing.task.id().clone()));
        }

        let destination = self.shared.pipeline.storage().destination_for(source);
        if let Some(other) = active.installing_to(&destination) {
            warn!(
                "Refusing {}: {} is already being installed from {}",
                source,
                destination.display(),
                other.task.source()
            );
            return Err(StowageError::DestinationBusy {
                path: destination,
                active_source: other.task.source().to_string(),
            });
        }

        let storage = self.shared.pipeline.storage();
        let id = TaskId::generate();
        let task = DownloadTask::new(id.clone(), source.clone(), destination);
        let temp_path = storage.incoming_path(id.as_str(), source);
        let cancel = CancellationToken::new();

        let driver = runtime.spawn(Arc::clone(&self.shared).run(
            id.clone(),
            source.clone(),
            temp_path,
            cancel.clone(),
        ));
        active.tasks.insert(
            source.clone(),
            ActiveTask {
                task,
                cancel,
                driver: Some(driver),
            },
        );

        info!("Started download {} for {}", id, source);
        Ok(StartOutcome::Started(id))
    }

    /// Cancel the active task for `source`. Returns `false` if there was none.
    pub fn cancel(&self, source: &SourceLocator) -> bool {
        self.stop(source, false)
    }

    /// Stop the active task for `source` and mark it paused.
    ///
    /// There is no resume state: starting the source again downloads from
    /// zero.
    pub fn pause(&self, source: &SourceLocator) -> bool {
        self.stop(source, true)
    }

    fn stop(&self, source: &SourceLocator, paused: bool) -> bool {
        let mut active = self.shared.lock();
        let Some(mut entry) = active.tasks.remove(source) else {
            return false;
        };
        entry.cancel.cancel();
        entry.task.set_state(TaskState::Cancelled);
        self.shared.bus.publish(DownloadEvent::Cancelled {
            source: source.clone(),
            paused,
        });
        info!(
            "{} download {} for {}",
            if paused { "Paused" } else { "Cancelled" },
            entry.task.id(),
            source
        );
        true
    }

    /// Snapshot of the active tasks, ordered by source.
    ///
    /// Each call reads the current set afresh.
    pub fn list(&self) -> impl Iterator<Item = TaskSnapshot> {
        let mut snapshots: Vec<TaskSnapshot> = self
            .shared
            .lock()
            .tasks
            .values()
            .map(|active| active.task.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.source.cmp(&b.source));
        snapshots.into_iter()
    }

    pub fn get(&self, source: &SourceLocator) -> Option<TaskSnapshot> {
        self.shared
            .lock()
            .tasks
            .get(source)
            .map(|active| active.task.snapshot())
    }

    pub fn is_active(&self, source: &SourceLocator) -> bool {
        self.shared.lock().tasks.contains_key(source)
    }

    pub fn active_count(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.bus.subscribe()
    }

    pub fn subscribe_to(&self, source: SourceLocator) -> Subscription {
        self.shared.bus.subscribe_to(source)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        self.shared.pipeline.catalog()
    }

    pub fn registry(&self) -> &Arc<ArtifactRegistry> {
        &self.shared.registry
    }

    pub fn storage(&self) -> &StorageRoot {
        self.shared.pipeline.storage()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shut_down
    }

    /// Cancel every active task, wait for their drivers to finish and refuse
    /// further starts.
    pub async fn shutdown(&self) {
        let drivers: Vec<JoinHandle<()>> = {
            let mut active = self.shared.lock();
            if active.shut_down {
                return;
            }
            active.shut_down = true;
            active
                .tasks
                .drain()
                .filter_map(|(source, mut entry)| {
                    entry.cancel.cancel();
                    self.shared.bus.publish(DownloadEvent::Cancelled {
                        source,
                        paused: false,
                    });
                    entry.driver.take()
                })
                .collect()
        };

        info!("Shutting down, waiting for {} downloads", drivers.len());
        for driver in drivers {
            if let Err(e) = driver.await {
                warn!("Download driver ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for DownloadOrchestrator {
    fn drop(&mut self) {
        let mut active = self.shared.lock();
        if active.tasks.is_empty() {
            return;
        }
        warn!(
            "Orchestrator dropped with {} active downloads, cancelling",
            active.tasks.len()
        );
        active.shut_down = true;
        for (_, entry) in active.tasks.drain() {
            entry.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("storage", self.storage())
            .field("active", &self.active_count())
            .finish()
    }
}
