//! Replication health of the main replica.
//!
//! Read-only queries against a subscriber: lag across its subscriptions and
//! the progress of the initial table copy.

use crate::error::Result;
use crate::sql::{self, SqlClient, SqlTarget};
use crate::types::{ActiveCopy, CopyProgress, ReplicationLag, TableCopyState};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Maximum network and apply lag over all subscriptions, NULL as zero.
pub const LAG_SQL: &str = "SELECT \
     COALESCE(MAX(EXTRACT(EPOCH FROM (st.last_msg_receipt_time - st.last_msg_send_time))), 0)::float8, \
     COALESCE(MAX(EXTRACT(EPOCH FROM (now() - st.latest_end_time))), 0)::float8 \
     FROM pg_stat_subscription st";

/// Tracked tables and how many are ready.
pub const COPY_COUNTS_SQL: &str = "SELECT count(*), count(*) FILTER (WHERE srsubstate = 'r') \
     FROM pg_subscription_rel";

/// Tables that are not ready yet.
pub const COPY_DETAILS_SQL: &str = "SELECT srrelid::regclass::text, srsubstate \
     FROM pg_subscription_rel WHERE srsubstate <> 'r' ORDER BY 1";

/// Byte-level progress of running COPY commands.
pub const ACTIVE_COPY_SQL: &str = "SELECT relid::regclass::text, bytes_processed, bytes_total, tuples_processed \
     FROM pg_stat_progress_copy ORDER BY 1";

/// Human-readable name of a `srsubstate` code.
pub fn state_label(code: &str) -> &'static str {
    match code {
        "i" => "initialize",
        "d" => "data copy",
        "f" => "finished table copy",
        "s" => "synchronized",
        "r" => "ready",
        _ => "unknown",
    }
}

/// Replication queries against one replica.
#[derive(Clone)]
pub struct ReplicationMonitor {
    sql: Arc<dyn SqlClient>,
}

impl ReplicationMonitor {
    pub fn new(sql: Arc<dyn SqlClient>) -> Self {
        Self { sql }
    }

    /// Lag of the slowest subscription. No subscriptions reads as zero lag.
    #[instrument(skip(self), fields(container = %target.container))]
    pub async fn lag(&self, target: &SqlTarget) -> Result<ReplicationLag> {
        let rows = self.sql.query_rows(target, LAG_SQL).await?;
        let Some(row) = rows.first() else {
            return Ok(ReplicationLag::default());
        };
        Ok(ReplicationLag {
            network_lag_seconds: sql::field_f64(row, 0).unwrap_or(0.0),
            apply_lag_seconds: sql::field_f64(row, 1).unwrap_or(0.0),
        })
    }

    /// Initial-copy progress. Only the counts query can fail the call; the
    /// detail queries degrade to `None`.
    #[instrument(skip(self), fields(container = %target.container))]
    pub async fn copy_progress(&self, target: &SqlTarget) -> Result<CopyProgress> {
        let rows = self.sql.query_rows(target, COPY_COUNTS_SQL).await?;
        let (total, finished) = rows
            .first()
            .map(|row| (sql::field_u64(row, 0).unwrap_or(0), sql::field_u64(row, 1).unwrap_or(0)))
            .unwrap_or((0, 0));

        let mut progress = CopyProgress::from_counts(total, finished);
        if total == 0 {
            return Ok(progress);
        }

        progress.details = match self.sql.query_rows(target, COPY_DETAILS_SQL).await {
            Ok(rows) => Some(
                rows.iter()
                    .map(|row| {
                        let state = sql::field_str(row, 1);
                        TableCopyState {
                            table: sql::field_str(row, 0),
                            state_label: state_label(&state).to_string(),
                            state,
                        }
                    })
                    .collect(),
            ),
            Err(e) => {
                warn!(error = %e, "Copy detail query failed");
                None
            }
        };

        progress.active = match self.sql.query_rows(target, ACTIVE_COPY_SQL).await {
            Ok(rows) => Some(
                rows.iter()
                    .map(|row| ActiveCopy {
                        table: sql::field_str(row, 0),
                        bytes_processed: sql::field_u64(row, 1).unwrap_or(0),
                        bytes_total: sql::field_u64(row, 2).unwrap_or(0),
                        tuples_processed: sql::field_u64(row, 3).unwrap_or(0),
                    })
                    .collect(),
            ),
            Err(e) => {
                // pg_stat_progress_copy needs PostgreSQL 14.
                debug!(error = %e, "Active copy query failed");
                None
            }
        };

        Ok(progress)
    }
}
