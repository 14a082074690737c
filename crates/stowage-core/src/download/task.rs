//! Download task state.

use crate::source::SourceLocator;
use crate::transport::TransferProgress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Opaque identifier of one download attempt.
///
/// Restarting a source after cancellation creates a task with a new id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Downloading,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Whether the task still occupies its source's slot.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Downloading | TaskState::Verifying)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Downloading => "downloading",
            TaskState::Verifying => "verifying",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fraction of `expected` covered by `written`, clamped to `0.0..=1.0`.
///
/// `None` when the expected size is unknown.
pub fn progress_fraction(written: u64, expected: u64) -> Option<f64> {
    if expected == 0 {
        return None;
    }
    Some((written as f64 / expected as f64).clamp(0.0, 1.0))
}

/// One active transfer, owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    id: TaskId,
    source: SourceLocator,
    state: TaskState,
    bytes_written: u64,
    bytes_expected: u64,
    destination_path: PathBuf,
    started_at: DateTime<Utc>,
}

impl DownloadTask {
    pub(crate) fn new(id: TaskId, source: SourceLocator, destination_path: PathBuf) -> Self {
        Self {
            id,
            source,
            state: TaskState::Downloading,
            bytes_written: 0,
            bytes_expected: 0,
            destination_path,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn source(&self) -> &SourceLocator {
        &self.source
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn destination_path(&self) -> &Path {
        &self.destination_path
    }

    /// Apply a progress report.
    ///
    /// Counters never decrease. Returns the new fraction when a `Progress`
    /// event should be published: the task is downloading and its expected
    /// size is known.
    pub(crate) fn record_progress(&mut self, progress: TransferProgress) -> Option<f64> {
        if self.state != TaskState::Downloading {
            return None;
        }
        self.bytes_written = self.bytes_written.max(progress.bytes_written);
        self.bytes_expected = self.bytes_expected.max(progress.bytes_expected);
        progress_fraction(self.bytes_written, self.bytes_expected)
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            source: self.source.clone(),
            state: self.state,
            bytes_written: self.bytes_written,
            bytes_expected: self.bytes_expected,
            fraction: progress_fraction(self.bytes_written, self.bytes_expected),
            destination_path: self.destination_path.clone(),
            started_at: self.started_at,
        }
    }
}

/// Read-only copy of a task, as returned by `list()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub source: SourceLocator,
    pub state: TaskState,
    pub bytes_written: u64,
    pub bytes_expected: u64,
    pub fraction: Option<f64>,
    pub destination_path: PathBuf,
    pub started_at: DateTime<Utc>,
}
