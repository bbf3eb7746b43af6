//! Snapshot management for the main volume.
//!
//! Snapshots are point-in-time copy-on-write duplicates of the main volume,
//! named `<main>-snapshot-YYYYMMDD-HHMMSS` and living directly under the root
//! data directory. They are read-only once created.
//!
//! # Example
//!
//! ```ignore
//! use snaplicator_core::snapshots::SnapshotManager;
//!
//! let manager = SnapshotManager::new(tool, clock, "/data", "pgmain");
//! let snapshot = manager.create(Some("before migration".into())).await?;
//! ```

use crate::clock::Clock;
use crate::error::{Result, SnapError};
use crate::metadata::{self, MetadataRecord, CREATED_BY};
use crate::observability;
use crate::paths;
use crate::types::{SnapshotRecord, StepOutcome};
use crate::volume::VolumeTool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Manager for snapshots of one main volume.
#[derive(Clone)]
pub struct SnapshotManager {
    tool: Arc<dyn VolumeTool>,
    clock: Arc<dyn Clock>,
    root: PathBuf,
    main: String,
}

impl SnapshotManager {
    /// Create a new snapshot manager.
    pub fn new(
        tool: Arc<dyn VolumeTool>,
        clock: Arc<dyn Clock>,
        root: impl Into<PathBuf>,
        main: impl Into<String>,
    ) -> Self {
        Self { tool, clock, root: root.into(), main: main.into() }
    }

    /// Root data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Main volume name.
    #[must_use]
    pub fn main(&self) -> &str {
        &self.main
    }

    /// True iff `path` is a valid subvolume. Never fails.
    pub async fn is_subvolume(&self, path: &Path) -> bool {
        self.tool.is_subvolume(path).await
    }

    /// Create a read-only snapshot of the main volume.
    ///
    /// # Errors
    /// * `NotFound` - the main volume does not exist
    /// * `InvalidState` - the main volume is not a subvolume
    /// * `AlreadyExists` - a snapshot with this second's timestamp exists
    #[instrument(skip(self), fields(main = %self.main))]
    pub async fn create(&self, description: Option<String>) -> Result<SnapshotRecord> {
        let src = paths::resolve_under_root(&self.root, &self.main)?;
        if !self.tool.exists(&src).await {
            return Err(SnapError::not_found(format!("Main volume {}", src.display())));
        }
        if !self.tool.is_subvolume(&src).await {
            return Err(SnapError::invalid_state(format!(
                "Main volume is not a subvolume: {}",
                src.display()
            )));
        }

        let timestamp = self.clock.timestamp();
        let name = paths::snapshot_name(&self.main, &timestamp);
        let target = paths::resolve_under_root(&self.root, &name)?;
        if self.tool.exists(&target).await {
            return Err(SnapError::AlreadyExists {
                what: format!("Snapshot {}", target.display()),
            });
        }

        info!(snapshot = %name, "Creating snapshot");
        self.tool.snapshot(&src, &target, false).await?;

        let record = MetadataRecord {
            name: name.clone(),
            path: target.clone(),
            source_kind: "main".to_string(),
            source: src.clone(),
            root_data_dir: self.root.clone(),
            main_data_dir: self.main.clone(),
            created_at: timestamp,
            refreshed_at: None,
            created_by: CREATED_BY.to_string(),
            description: description.clone(),
        };
        let mut warnings = metadata::write(self.tool.as_ref(), &target, &record).await;

        let readonly = match self.tool.set_readonly(&target).await {
            Ok(()) => {
                warnings.push(StepOutcome::ok("readonly"));
                true
            }
            Err(e) => {
                warn!(snapshot = %name, error = %e, "Failed to mark snapshot read-only");
                warnings.push(StepOutcome::ignored("readonly", e.to_string()));
                self.tool.subvolume_info(&target).await.map(|i| i.readonly).unwrap_or(false)
            }
        };

        observability::metrics::record_snapshot_created();
        info!(snapshot = %name, readonly, "Snapshot created");

        Ok(SnapshotRecord {
            name,
            path: target,
            readonly,
            description,
            size_bytes: None,
            warnings,
        })
    }

    /// List snapshots of the main volume, oldest first.
    ///
    /// With `with_usage`, each record carries a best-effort size estimate.
    #[instrument(skip(self), fields(main = %self.main))]
    pub async fn list(&self, with_usage: bool) -> Result<Vec<SnapshotRecord>> {
        if !self.tool.exists(&self.root).await {
            return Err(SnapError::not_found(format!("Root path {}", self.root.display())));
        }

        let mut names: Vec<String> = self
            .tool
            .list_dir(&self.root)
            .await?
            .into_iter()
            .filter(|n| paths::is_snapshot_name(n, &self.main))
            .collect();
        names.sort();

        let mut items = Vec::with_capacity(names.len());
        for name in names {
            let path = self.root.join(&name);
            if !self.tool.is_subvolume(&path).await {
                continue;
            }
            let readonly =
                self.tool.subvolume_info(&path).await.map(|i| i.readonly).unwrap_or(false);
            let description = metadata::read(self.tool.as_ref(), &path)
                .await
                .and_then(|m| m.description);
            let size_bytes =
                if with_usage { self.tool.disk_usage(&path).await } else { None };
            items.push(SnapshotRecord {
                name,
                path,
                readonly,
                description,
                size_bytes,
                warnings: Vec::new(),
            });
        }

        Ok(items)
    }

    /// Delete a snapshot by name.
    ///
    /// # Errors
    /// * `PermissionDenied` - the name escapes the root or is not a snapshot name
    /// * `NotFound` - nothing exists at the resolved path
    /// * `InvalidState` - not a subvolume, or separately mounted
    #[instrument(skip(self), fields(main = %self.main))]
    pub async fn delete(&self, name: &str) -> Result<PathBuf> {
        let target = paths::resolve_under_root(&self.root, name)?;
        let base = paths::file_name(&target);
        if target.parent() != Some(paths::normalize(&self.root).as_path())
            || !paths::is_snapshot_name(&base, &self.main)
        {
            return Err(SnapError::permission_denied(format!(
                "{} is not a snapshot of {}",
                name, self.main
            )));
        }

        if !self.tool.exists(&target).await {
            return Err(SnapError::not_found(format!("Snapshot {}", target.display())));
        }
        if !self.tool.is_subvolume(&target).await {
            return Err(SnapError::invalid_state(format!(
                "Not a subvolume: {}",
                target.display()
            )));
        }
        if self.tool.is_mounted(&target).await? {
            return Err(SnapError::invalid_state(format!(
                "Snapshot is mounted; unmount it first: {}",
                target.display()
            )));
        }

        info!(snapshot = %base, "Deleting snapshot");
        self.tool.delete_subvolume(&target).await?;
        info!(snapshot = %base, "Snapshot deleted");

        Ok(target)
    }

    /// Best-effort disk usage of a volume under the root.
    pub async fn usage(&self, path: &Path) -> Option<u64> {
        self.tool.disk_usage(path).await
    }

    /// Metadata record of a volume, from the file or the extended attribute.
    pub async fn read_metadata(&self, path: &Path) -> Option<MetadataRecord> {
        metadata::read(self.tool.as_ref(), path).await
    }
}
