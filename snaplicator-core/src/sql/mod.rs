//! SQL client abstraction.
//!
//! All SQL runs inside the engine's container and comes back as flat
//! delimited text; [`psql::PsqlClient`] is the production implementation.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod psql;

pub use psql::PsqlClient;

/// Field separator used for row output (ASCII unit separator).
pub const FIELD_SEPARATOR: char = '\u{1f}';

/// Marker printed for SQL NULL.
pub const NULL_MARKER: &str = "\\N";

/// One result row; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

/// Database inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlTarget {
    pub container: String,
    pub user: String,
    pub db: String,
}

impl SqlTarget {
    pub fn new(container: impl Into<String>, user: impl Into<String>, db: impl Into<String>) -> Self {
        Self { container: container.into(), user: user.into(), db: db.into() }
    }
}

/// SQL capability used by the launcher and the replication monitor.
#[async_trait]
pub trait SqlClient: Send + Sync {
    /// Run statements, stopping at the first error. Returns the raw output.
    async fn execute(&self, target: &SqlTarget, sql: &str) -> Result<String>;

    /// Run a query and split its output into rows.
    async fn query_rows(&self, target: &SqlTarget, sql: &str) -> Result<Vec<Row>>;

    /// Run a script file that already exists inside the container.
    async fn execute_file(&self, target: &SqlTarget, path: &str) -> Result<String>;

    /// True iff the engine accepts connections. Never fails.
    async fn is_ready(&self, target: &SqlTarget) -> bool;
}

/// Split unaligned, tuples-only output into rows.
pub fn parse_rows(stdout: &str) -> Vec<Row> {
    stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split(FIELD_SEPARATOR)
                .map(|field| if field == NULL_MARKER { None } else { Some(field.to_string()) })
                .collect()
        })
        .collect()
}

/// Field `idx` of a row as `f64`; NULL, missing and unparseable read as `None`.
pub fn field_f64(row: &Row, idx: usize) -> Option<f64> {
    row.get(idx)?.as_deref()?.trim().parse().ok()
}

/// Field `idx` of a row as `u64`.
pub fn field_u64(row: &Row, idx: usize) -> Option<u64> {
    row.get(idx)?.as_deref()?.trim().parse().ok()
}

/// Field `idx` of a row as a string, NULL as empty.
pub fn field_str(row: &Row, idx: usize) -> String {
    row.get(idx).cloned().flatten().unwrap_or_default()
}
