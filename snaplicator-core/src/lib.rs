//! snaplicator core library
//!
//! Disposable PostgreSQL clones from copy-on-write snapshots: the snapshot
//! manager, port allocator, container launcher, clone orchestrator and
//! replication monitor, plus the adapters they drive.

pub mod backends;
pub mod clock;
pub mod config;
pub mod error;
pub mod exec;
pub mod launcher;
pub mod metadata;
pub mod observability;
pub mod orchestrator;
pub mod paths;
pub mod ports;
pub mod replication;
pub mod runtime;
pub mod snapshots;
pub mod sql;
pub mod types;
pub mod volume;

// Re-export commonly used items
pub use backends::Backends;
pub use config::{CloneConfig, ReplicaTarget, Settings};
pub use error::{ErrorKind, Result, SnapError};
pub use launcher::{ContainerLauncher, LaunchPolicy, LaunchRequest};
pub use observability::{init as init_observability, install_prometheus_recorder, StepRecorder};
pub use orchestrator::{CloneOrchestrator, CloneStage, Compensation, RefreshStage};
pub use ports::PortAllocator;
pub use replication::ReplicationMonitor;
pub use snapshots::SnapshotManager;
pub use sql::SqlTarget;
pub use types::{
    CloneResult, CloneSource, CloneSummary, CopyProgress, CopyStatus, DeleteResult,
    ReplicationLag, SnapshotRecord, StepOutcome, StepTiming,
};
