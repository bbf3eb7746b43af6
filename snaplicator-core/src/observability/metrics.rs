//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use crate::error::SnapError;
use metrics::{counter, describe_counter, describe_histogram};

pub const STEP_DURATION: &str = "snaplicator_step_duration_seconds";
pub const CLONES_CREATED: &str = "snaplicator_clones_created_total";
pub const CLONES_REFRESHED: &str = "snaplicator_clones_refreshed_total";
pub const CLONES_DELETED: &str = "snaplicator_clones_deleted_total";
pub const OPERATION_FAILURES: &str = "snaplicator_operation_failures_total";
pub const SNAPSHOTS_CREATED: &str = "snaplicator_snapshots_created_total";
pub const PORT_CONFLICTS: &str = "snaplicator_port_conflicts_total";

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    describe_histogram!(STEP_DURATION, "Duration of one orchestrator step (by operation, step)");

    describe_counter!(CLONES_CREATED, "Total number of clones created (by source)");
    describe_counter!(CLONES_REFRESHED, "Total number of clones refreshed in place");
    describe_counter!(CLONES_DELETED, "Total number of clones deleted");
    describe_counter!(
        OPERATION_FAILURES,
        "Total number of failed orchestrator operations (by operation, kind)"
    );

    describe_counter!(SNAPSHOTS_CREATED, "Total number of snapshots of the main volume created");
    describe_counter!(
        PORT_CONFLICTS,
        "Total number of container starts that lost a host port race"
    );
}

pub fn record_clone_created(source: &'static str) {
    counter!(CLONES_CREATED, "source" => source).increment(1);
}

pub fn record_clone_refreshed() {
    counter!(CLONES_REFRESHED).increment(1);
}

pub fn record_clone_deleted() {
    counter!(CLONES_DELETED).increment(1);
}

pub fn record_snapshot_created() {
    counter!(SNAPSHOTS_CREATED).increment(1);
}

pub fn record_port_conflict() {
    counter!(PORT_CONFLICTS).increment(1);
}

pub fn record_failure(operation: &'static str, err: &SnapError) {
    counter!(OPERATION_FAILURES, "operation" => operation, "kind" => err.kind().as_str())
        .increment(1);
}
