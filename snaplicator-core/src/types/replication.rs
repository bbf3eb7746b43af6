//! Replication status types. Computed on every query, never persisted.

use serde::{Deserialize, Serialize};

/// Subscriber-side lag, maximum across all subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationLag {
    pub network_lag_seconds: f64,
    pub apply_lag_seconds: f64,
}

/// Phase of the initial table copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyStatus {
    /// No tables are tracked by any subscription.
    Idle,
    /// Some tracked tables have not finished their initial copy.
    Copying,
    /// Every tracked table is ready.
    Complete,
}

impl CopyStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Copying => "copying",
            Self::Complete => "complete",
        }
    }

    /// Derive the status from table counts.
    #[must_use]
    pub fn from_counts(total: u64, finished: u64) -> Self {
        if total == 0 {
            Self::Idle
        } else if finished < total {
            Self::Copying
        } else {
            Self::Complete
        }
    }
}

impl std::fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A table whose initial copy has not finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCopyState {
    pub table: String,
    /// Raw `srsubstate` code (`i`, `d`, `f`, `s`).
    pub state: String,
    pub state_label: String,
}

/// Byte-level progress of a running COPY.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveCopy {
    pub table: String,
    pub bytes_processed: u64,
    pub bytes_total: u64,
    pub tuples_processed: u64,
}

/// Initial-copy progress of the subscriptions on a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyProgress {
    pub status: CopyStatus,
    pub total_tables: u64,
    pub finished_tables: u64,
    pub percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<Vec<ActiveCopy>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<TableCopyState>>,
}

impl CopyProgress {
    /// Progress from table counts alone.
    #[must_use]
    pub fn from_counts(total: u64, finished: u64) -> Self {
        let percent = if total == 0 { 0.0 } else { finished as f64 / total as f64 * 100.0 };
        Self {
            status: CopyStatus::from_counts(total, finished),
            total_tables: total,
            finished_tables: finished,
            percent,
            active: None,
            details: None,
        }
    }
}
