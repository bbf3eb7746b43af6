//! Typed stages of the clone operations and their compensating actions.
//!
//! A stage is the last step that completed. When an operation fails, the
//! orchestrator runs the compensation listed for the stage it had reached.

use serde::Serialize;
use std::fmt;

/// Action taken to leave the system recoverable after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Compensation {
    /// Force-remove the container being launched.
    RemoveContainer,
    /// Keep the new volume on disk for inspection.
    RetainVolume,
    /// Delete the half-made temporary volume, if present.
    DeleteTempVolume,
    /// Move the backup back onto the target path if the target is absent.
    RestoreBackup,
    /// Keep the backup volume for manual recovery.
    RetainBackup,
}

impl Compensation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoveContainer => "remove_container",
            Self::RetainVolume => "retain_volume",
            Self::DeleteTempVolume => "delete_temp_volume",
            Self::RestoreBackup => "restore_backup",
            Self::RetainBackup => "retain_backup",
        }
    }
}

/// Stages of creating a clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneStage {
    Pending,
    SnapshotReady,
    PermissionsFixed,
    MetadataWritten,
    ContainerLaunched,
    SubscriptionsDisabled,
    SequencesSynced,
    Anonymized,
    Done,
}

impl CloneStage {
    /// Stages after `MetadataWritten`, in order, reached once launch returns.
    pub const LAUNCH_STAGES: [CloneStage; 5] = [
        Self::ContainerLaunched,
        Self::SubscriptionsDisabled,
        Self::SequencesSynced,
        Self::Anonymized,
        Self::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::SnapshotReady => "snapshot_ready",
            Self::PermissionsFixed => "permissions_fixed",
            Self::MetadataWritten => "metadata_written",
            Self::ContainerLaunched => "container_launched",
            Self::SubscriptionsDisabled => "subscriptions_disabled",
            Self::SequencesSynced => "sequences_synced",
            Self::Anonymized => "anonymized",
            Self::Done => "done",
        }
    }

    /// Compensation for a failure after this stage was reached.
    ///
    /// From `MetadataWritten` on, a container may exist; it is removed unless
    /// the failure was a clash with another container holding its name.
    /// The clone volume itself is never deleted.
    pub fn compensation(&self) -> &'static [Compensation] {
        use Compensation::*;
        match self {
            Self::Pending | Self::Done => &[],
            Self::SnapshotReady | Self::PermissionsFixed => &[RetainVolume],
            Self::MetadataWritten
            | Self::ContainerLaunched
            | Self::SubscriptionsDisabled
            | Self::SequencesSynced
            | Self::Anonymized => &[RemoveContainer, RetainVolume],
        }
    }
}

impl fmt::Display for CloneStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stages of refreshing a clone in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStage {
    Pending,
    TargetInspected,
    ContainerRemoved,
    TempSnapshotCreated,
    TempPrepared,
    TargetBackedUp,
    Swapped,
    Relaunched,
    Done,
}

impl RefreshStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::TargetInspected => "target_inspected",
            Self::ContainerRemoved => "container_removed",
            Self::TempSnapshotCreated => "temp_snapshot_created",
            Self::TempPrepared => "temp_prepared",
            Self::TargetBackedUp => "target_backed_up",
            Self::Swapped => "swapped",
            Self::Relaunched => "relaunched",
            Self::Done => "done",
        }
    }

    /// Compensation for a failure after this stage was reached.
    ///
    /// Up to the swap, the temporary volume is deleted and any displaced
    /// volume is put back, so the target path never ends up empty. Once the
    /// swap happened, the backup is kept for manual recovery.
    pub fn compensation(&self) -> &'static [Compensation] {
        use Compensation::*;
        match self {
            Self::Pending | Self::TargetInspected | Self::Relaunched | Self::Done => &[],
            Self::ContainerRemoved
            | Self::TempSnapshotCreated
            | Self::TempPrepared
            | Self::TargetBackedUp => &[DeleteTempVolume, RestoreBackup],
            Self::Swapped => &[RemoveContainer, RetainBackup],
        }
    }

    /// True if a failure at this stage is reported as a failed relaunch.
    #[must_use]
    pub fn is_relaunch_failure(&self) -> bool {
        matches!(self, Self::Swapped)
    }
}

impl fmt::Display for RefreshStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
