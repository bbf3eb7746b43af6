//! Per-volume metadata record.
//!
//! The record is written twice: as a JSON file at the volume root and as an
//! extended attribute on the volume. Either channel may be unavailable (the
//! file is owned by the database user once permissions are fixed), so both
//! writes are best-effort and reads fall back from file to attribute.
//!
//! Metadata is an audit trail, never a source of identity: paths and ports
//! always come from live inspection.

use crate::error::{Result, SnapError};
use crate::types::StepOutcome;
use crate::volume::VolumeTool;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Metadata file name, relative to the volume root.
pub const METADATA_FILE: &str = ".snaplicator.json";

/// Extended attribute holding the redundant copy.
pub const METADATA_XATTR: &str = "user.snaplicator.metadata";

/// Creator tag stamped on every record.
pub const CREATED_BY: &str = "snaplicator";

/// Metadata persisted inside each snapshot and clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub name: String,
    pub path: PathBuf,
    /// `snapshot` or `main`.
    pub source_kind: String,
    pub source: PathBuf,
    pub root_data_dir: PathBuf,
    pub main_data_dir: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<String>,
    pub created_by: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Path of the metadata file inside `volume`.
pub fn metadata_path(volume: &Path) -> PathBuf {
    volume.join(METADATA_FILE)
}

/// Write both channels. Never fails; returns one outcome per channel.
pub async fn write(
    tool: &dyn VolumeTool,
    volume: &Path,
    record: &MetadataRecord,
) -> Vec<StepOutcome> {
    let json = match serde_json::to_string_pretty(record) {
        Ok(j) => j,
        Err(e) => {
            return vec![StepOutcome::ignored("metadata_serialize", e.to_string())];
        }
    };

    let mut outcomes = Vec::with_capacity(2);

    let file = metadata_path(volume);
    match tool.write_file(&file, json.as_bytes()).await {
        Ok(()) => outcomes.push(StepOutcome::ok("metadata_file")),
        Err(e) => {
            warn!(path = %file.display(), error = %e, "Failed to write metadata file");
            outcomes.push(StepOutcome::ignored("metadata_file", e.to_string()));
        }
    }

    // Compact form keeps the attribute value on one line.
    let compact = serde_json::to_string(record).unwrap_or(json);
    match tool.set_xattr(volume, METADATA_XATTR, &compact).await {
        Ok(()) => outcomes.push(StepOutcome::ok("metadata_xattr")),
        Err(e) => {
            warn!(path = %volume.display(), error = %e, "Failed to write metadata xattr");
            outcomes.push(StepOutcome::ignored("metadata_xattr", e.to_string()));
        }
    }

    outcomes
}

fn parse(raw: &str) -> Result<MetadataRecord> {
    serde_json::from_str(raw.trim())
        .map_err(|e| SnapError::Internal(format!("Invalid metadata record: {}", e)))
}

/// Read the record, file first, then the extended attribute.
pub async fn read(tool: &dyn VolumeTool, volume: &Path) -> Option<MetadataRecord> {
    let file = metadata_path(volume);
    match tool.read_file(&file).await.and_then(|raw| parse(&raw)) {
        Ok(record) => return Some(record),
        Err(e) => debug!(path = %file.display(), error = %e, "metadata file unavailable"),
    }

    match tool.get_xattr(volume, METADATA_XATTR).await {
        Ok(Some(raw)) => match parse(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(error = %e, "metadata xattr unparseable");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            debug!(path = %volume.display(), error = %e, "metadata xattr unavailable");
            None
        }
    }
}
