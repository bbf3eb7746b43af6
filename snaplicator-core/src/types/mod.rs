//! Core domain types for snaplicator.

pub mod clone;
pub mod replication;
pub mod volume;

use serde::{Deserialize, Serialize};

// Re-exports
pub use clone::{AnonymizeOutcome, CloneResult, CloneSource, CloneSummary, DeleteResult, LaunchResult};
pub use replication::{ActiveCopy, CopyProgress, CopyStatus, ReplicationLag, TableCopyState};
pub use volume::{SnapshotRecord, SubvolumeInfo};

/// Outcome of a best-effort sub-step.
///
/// Best-effort steps never fail the operation; a swallowed failure is reported
/// here with `ignored_failure = true` so callers can see degraded results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub ignored_failure: bool,
    pub detail: Option<String>,
}

impl StepOutcome {
    pub fn ok(step: impl Into<String>) -> Self {
        Self { step: step.into(), ignored_failure: false, detail: None }
    }

    pub fn ignored(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { step: step.into(), ignored_failure: true, detail: Some(detail.into()) }
    }
}

/// Wall-clock duration of one orchestrator step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    pub step: String,
    pub seconds: f64,
    pub succeeded: bool,
}
