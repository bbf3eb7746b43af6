//! Copy-on-write volume tool abstraction.
//!
//! snaplicator never touches data volumes directly: every inspection and
//! mutation goes through the [`VolumeTool`] trait so the orchestrator can be
//! driven against fakes. [`btrfs::BtrfsTool`] is the production implementation.

use crate::error::Result;
use crate::types::SubvolumeInfo;
use async_trait::async_trait;
use std::path::Path;

pub mod btrfs;

pub use btrfs::BtrfsTool;

/// Filesystem capability used by the snapshot manager and orchestrator.
///
/// Predicates (`is_subvolume`, `exists`, `file_exists`) never fail: any
/// inspection error reads as `false`.
#[async_trait]
pub trait VolumeTool: Send + Sync {
    /// True iff `path` is a subvolume recognised by the filesystem tool.
    async fn is_subvolume(&self, path: &Path) -> bool;

    /// Inspect a subvolume.
    async fn subvolume_info(&self, path: &Path) -> Result<SubvolumeInfo>;

    /// Duplicate `src` into `dst`, optionally read-only at creation.
    async fn snapshot(&self, src: &Path, dst: &Path, readonly: bool) -> Result<()>;

    /// Mark an existing subvolume read-only.
    async fn set_readonly(&self, path: &Path) -> Result<()>;

    async fn delete_subvolume(&self, path: &Path) -> Result<()>;

    /// True iff anything exists at `path`.
    async fn exists(&self, path: &Path) -> bool;

    /// True iff a regular file exists at `path`, even if unreadable to us.
    async fn file_exists(&self, path: &Path) -> bool;

    /// True iff `path` is itself a mount point.
    async fn is_mounted(&self, path: &Path) -> Result<bool>;

    /// Names of the immediate child directories of `dir`.
    async fn list_dir(&self, dir: &Path) -> Result<Vec<String>>;

    /// `chown -R owner path`.
    async fn chown_recursive(&self, path: &Path, owner: &str) -> Result<()>;

    /// `chmod -R mode path`.
    async fn chmod_recursive(&self, path: &Path, mode: &str) -> Result<()>;

    /// Rename `from` to `to`.
    async fn move_path(&self, from: &Path, to: &Path) -> Result<()>;

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    async fn read_file(&self, path: &Path) -> Result<String>;

    async fn set_xattr(&self, path: &Path, key: &str, value: &str) -> Result<()>;

    async fn get_xattr(&self, path: &Path, key: &str) -> Result<Option<String>>;

    /// Best-effort disk usage estimate in bytes.
    async fn disk_usage(&self, path: &Path) -> Option<u64>;
}
