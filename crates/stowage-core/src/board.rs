//! Caller-side download status board.
//!
//! Folds orchestrator events into one status per source, the way a UI shows
//! them, and remembers which sources were tried per artifact so a failed
//! download can be retried from a backup it has not used yet.

use crate::download::{TaskSnapshot, TaskState};
use crate::error::FailureKind;
use crate::events::DownloadEvent;
use crate::registry::ArtifactRegistry;
use crate::source::SourceLocator;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadStatus {
    /// `fraction` is `None` until the server announces a size.
    Downloading { fraction: Option<f64> },
    /// Transfer finished, install pipeline running.
    Verifying,
    /// Stopped via pause. Resuming restarts from zero.
    Paused,
    Completed { artifact_id: String },
    Failed { kind: FailureKind, message: String },
}

impl DownloadStatus {
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Downloading { .. } | DownloadStatus::Verifying
        )
    }
}

#[derive(Debug, Default)]
pub struct StatusBoard {
    statuses: HashMap<SourceLocator, DownloadStatus>,
    tried: HashMap<String, Vec<SourceLocator>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the caller started `source`.
    pub fn mark_started(&mut self, source: &SourceLocator) {
        self.statuses.insert(
            source.clone(),
            DownloadStatus::Downloading { fraction: None },
        );
        let tried = self
            .tried
            .entry(source.artifact_name().to_string())
            .or_default();
        if !tried.contains(source) {
            tried.push(source.clone());
        }
    }

    /// Seed statuses from tasks that were already running.
    pub fn sync_with(&mut self, snapshots: impl IntoIterator<Item = TaskSnapshot>) {
        for snapshot in snapshots {
            let status = match snapshot.state {
                TaskState::Downloading => DownloadStatus::Downloading {
                    fraction: snapshot.fraction,
                },
                TaskState::Verifying => DownloadStatus::Verifying,
                _ => continue,
            };
            self.statuses.insert(snapshot.source, status);
        }
    }

    /// Apply one event.
    pub fn apply(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Progress {
                source, fraction, ..
            } => {
                let status = if *fraction >= 1.0 {
                    DownloadStatus::Verifying
                } else {
                    DownloadStatus::Downloading {
                        fraction: Some(*fraction),
                    }
                };
                self.statuses.insert(source.clone(), status);
            }
            DownloadEvent::Completed {
                source,
                artifact_id,
                ..
            } => {
                self.statuses.insert(
                    source.clone(),
                    DownloadStatus::Completed {
                        artifact_id: artifact_id.clone(),
                    },
                );
                self.tried.remove(source.artifact_name());
            }
            DownloadEvent::Failed { source, error } => {
                self.statuses.insert(
                    source.clone(),
                    DownloadStatus::Failed {
                        kind: error.kind,
                        message: error.message.clone(),
                    },
                );
            }
            DownloadEvent::Cancelled { source, paused } => {
                if *paused {
                    self.statuses.insert(source.clone(), DownloadStatus::Paused);
                } else {
                    self.statuses.remove(source);
                }
            }
        }
    }

    pub fn status(&self, source: &SourceLocator) -> Option<&DownloadStatus> {
        self.statuses.get(source)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceLocator, &DownloadStatus)> {
        self.statuses.iter()
    }

    /// Sources tried so far for an artifact, in order.
    pub fn tried_sources(&self, artifact_name: &str) -> &[SourceLocator] {
        self.tried
            .get(artifact_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Backup to retry a failed `source` from.
    ///
    /// `None` unless the source failed with a kind that suggests another
    /// origin and the registry still has an untried backup for the artifact.
    pub fn retry_source(
        &self,
        registry: &ArtifactRegistry,
        source: &SourceLocator,
    ) -> Option<SourceLocator> {
        match self.statuses.get(source) {
            Some(DownloadStatus::Failed { kind, .. }) if kind.suggests_backup() => {}
            _ => return None,
        }
        let name = source.artifact_name();
        let mut tried = self.tried_sources(name).to_vec();
        if !tried.contains(source) {
            tried.push(source.clone());
        }
        registry.backups().next_untried(name, &tried).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FailureReport;

    fn source(host: &str) -> SourceLocator {
        SourceLocator::parse(&format!("https://{}/m.gguf", host)).unwrap()
    }

    fn failed(source: &SourceLocator, kind: FailureKind) -> DownloadEvent {
        DownloadEvent::Failed {
            source: source.clone(),
            error: FailureReport {
                kind,
                message: "boom".to_string(),
            },
        }
    }

    fn registry_with_backups() -> ArtifactRegistry {
        let mut registry = ArtifactRegistry::empty();
        registry.backups_mut().insert("m.gguf", source("mirror-a.example"));
        registry.backups_mut().insert("m.gguf", source("mirror-b.example"));
        registry
    }

    #[test]
    fn test_progress_then_complete() {
        let mut board = StatusBoard::new();
        let s = source("primary.example");
        board.mark_started(&s);
        assert_eq!(
            board.status(&s),
            Some(&DownloadStatus::Downloading { fraction: None })
        );

        board.apply(&DownloadEvent::Progress {
            source: s.clone(),
            fraction: 0.25,
            bytes_written: 25,
            bytes_expected: 100,
        });
        assert_eq!(
            board.status(&s),
            Some(&DownloadStatus::Downloading {
                fraction: Some(0.25)
            })
        );

        board.apply(&DownloadEvent::Progress {
            source: s.clone(),
            fraction: 1.0,
            bytes_written: 100,
            bytes_expected: 100,
        });
        assert_eq!(board.status(&s), Some(&DownloadStatus::Verifying));

        board.apply(&DownloadEvent::Completed {
            source: s.clone(),
            local_path: "/models/m.gguf".into(),
            artifact_id: "id-1".to_string(),
        });
        assert!(matches!(
            board.status(&s),
            Some(DownloadStatus::Completed { .. })
        ));
        assert!(board.tried_sources("m.gguf").is_empty());
    }

    #[test]
    fn test_pause_and_cancel_labels() {
        let mut board = StatusBoard::new();
        let s = source("primary.example");
        board.mark_started(&s);

        board.apply(&DownloadEvent::Cancelled {
            source: s.clone(),
            paused: true,
        });
        assert_eq!(board.status(&s), Some(&DownloadStatus::Paused));

        board.mark_started(&s);
        board.apply(&DownloadEvent::Cancelled {
            source: s.clone(),
            paused: false,
        });
        assert_eq!(board.status(&s), None);
    }

    #[test]
    fn test_retry_walks_backups_once_each() {
        let registry = registry_with_backups();
        let mut board = StatusBoard::new();
        let primary = source("primary.example");

        board.mark_started(&primary);
        board.apply(&failed(&primary, FailureKind::Verification));
        let first = board.retry_source(&registry, &primary).unwrap();
        assert_eq!(first, source("mirror-a.example"));

        board.mark_started(&first);
        board.apply(&failed(&first, FailureKind::Transport));
        let second = board.retry_source(&registry, &first).unwrap();
        assert_eq!(second, source("mirror-b.example"));

        board.mark_started(&second);
        board.apply(&failed(&second, FailureKind::Transport));
        assert_eq!(board.retry_source(&registry, &second), None);
    }

    #[test]
    fn test_no_retry_for_local_failures() {
        let registry = registry_with_backups();
        let mut board = StatusBoard::new();
        let primary = source("primary.example");
        board.mark_started(&primary);
        board.apply(&failed(&primary, FailureKind::Copy));
        assert_eq!(board.retry_source(&registry, &primary), None);

        let other = source("other.example");
        assert_eq!(board.retry_source(&registry, &other), None);
    }

    #[test]
    fn test_status_serializes_with_tag() {
        let json = serde_json::to_value(DownloadStatus::Failed {
            kind: FailureKind::CorruptDownload,
            message: "too small".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "corrupt_download");
    }
}
