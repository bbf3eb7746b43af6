//! Clone domain types.

use super::{StepOutcome, StepTiming};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What a clone's data was duplicated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum CloneSource {
    Snapshot(PathBuf),
    Main(PathBuf),
}

impl CloneSource {
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Snapshot(p) | Self::Main(p) => p,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Main(_) => "main",
        }
    }
}

/// Whether the anonymization script ran, and what it printed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizeOutcome {
    pub ran: bool,
    pub output: Option<String>,
}

/// What the container launcher reports after a successful launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchResult {
    pub container_name: String,
    pub host_port: u16,
    /// Data directory as seen inside the container (`PGDATA`).
    pub data_dir_in_container: String,
    pub anonymize: AnonymizeOutcome,
    /// Subscriptions that were disabled in the copied data.
    pub disabled_subscriptions: Vec<String>,
    pub warnings: Vec<StepOutcome>,
}

/// Result of create-from-snapshot, create-from-main and refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneResult {
    pub source: CloneSource,
    /// Host path of the clone's subvolume.
    pub clone_subvolume: PathBuf,
    pub container_name: String,
    pub host_port: u16,
    pub data_dir_in_container: String,
    pub metadata_path: PathBuf,
    pub description: Option<String>,
    pub anonymize: AnonymizeOutcome,
    pub disabled_subscriptions: Vec<String>,
    /// Best-effort steps that were attempted, including swallowed failures.
    pub warnings: Vec<StepOutcome>,
    pub timings: Vec<StepTiming>,
}

impl CloneResult {
    /// True if any best-effort step failed.
    #[must_use]
    pub fn degraded(&self) -> bool {
        self.warnings.iter().any(|w| w.ignored_failure)
    }
}

/// Result of a clone deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub deleted_path: PathBuf,
    pub removed_containers: Vec<String>,
    pub timings: Vec<StepTiming>,
}

/// A clone container discovered through its labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneSummary {
    pub container_name: String,
    pub running: bool,
    pub started_at: Option<String>,
    pub host_port: Option<u16>,
    pub volume_path: Option<PathBuf>,
    pub description: Option<String>,
}
