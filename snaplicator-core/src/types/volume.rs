//! Volume domain types.

use super::StepOutcome;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A snapshot of the main volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// `<main>-snapshot-YYYYMMDD-HHMMSS`
    pub name: String,

    /// Host path to the subvolume
    pub path: PathBuf,

    pub readonly: bool,

    /// Free-text description from the metadata record
    pub description: Option<String>,

    /// Best-effort disk usage estimate in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    /// Best-effort steps of `create`; empty for listed snapshots
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<StepOutcome>,
}

/// Facts reported by the filesystem tool for a subvolume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubvolumeInfo {
    pub readonly: bool,
}
