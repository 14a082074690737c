//! Download tasks and the orchestrator that runs them.

mod builder;
mod orchestrator;
mod task;

pub use builder::OrchestratorBuilder;
pub use orchestrator::{DownloadOrchestrator, StartOutcome};
pub use task::{progress_fraction, DownloadTask, TaskId, TaskSnapshot, TaskState};
