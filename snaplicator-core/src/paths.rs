//! Path resolution and naming conventions.
//!
//! Every path snaplicator mutates must resolve strictly inside the configured
//! root data directory. Resolution is lexical first (so it works for paths that
//! do not exist yet) and then re-checked against the canonical on-disk location
//! when the path exists, which catches symlinks pointing outside the root.

use crate::error::{Result, SnapError};
use regex::Regex;
use std::path::{Component, Path, PathBuf};

/// Marker between the main volume name and the timestamp of a snapshot.
pub const SNAPSHOT_INFIX: &str = "-snapshot-";

/// Marker between the main volume name and the timestamp of a clone.
pub const CLONE_INFIX: &str = "-clone-";

/// Get the snaplicator configuration directory.
///
/// Resolution order:
/// 1. `SNAPLICATOR_CONFIG_DIR` environment variable
/// 2. `$XDG_CONFIG_HOME/snaplicator` (or the platform equivalent)
/// 3. `/etc/snaplicator`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SNAPLICATOR_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir()
        .map(|d| d.join("snaplicator"))
        .unwrap_or_else(|| PathBuf::from("/etc/snaplicator"))
}

/// Name of a snapshot of `main` taken at `timestamp`.
pub fn snapshot_name(main: &str, timestamp: &str) -> String {
    format!("{}{}{}", main, SNAPSHOT_INFIX, timestamp)
}

/// Name of a clone of `main` taken at `timestamp`.
pub fn clone_name(main: &str, timestamp: &str) -> String {
    format!("{}{}{}", main, CLONE_INFIX, timestamp)
}

fn matches_convention(name: &str, main: &str, infix: &str) -> bool {
    let pattern = format!(r"^{}{}\d{{8}}-\d{{6}}$", regex::escape(main), regex::escape(infix));
    Regex::new(&pattern).map(|re| re.is_match(name)).unwrap_or(false)
}

/// Check `<main>-snapshot-YYYYMMDD-HHMMSS`.
pub fn is_snapshot_name(name: &str, main: &str) -> bool {
    matches_convention(name, main, SNAPSHOT_INFIX)
}

/// Check `<main>-clone-YYYYMMDD-HHMMSS`.
pub fn is_clone_name(name: &str, main: &str) -> bool {
    matches_convention(name, main, CLONE_INFIX)
}

/// Remove `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Never climb above the filesystem root.
                if !matches!(out.components().next_back(), Some(Component::RootDir) | None) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn canonical_or_normalized(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| normalize(path))
}

/// Resolve `target` (a bare name relative to `root`, or an absolute path) and
/// require it to lie strictly inside `root`.
///
/// # Errors
/// `PermissionDenied` if the resolved path is `root` itself or escapes it.
pub fn resolve_under_root(root: &Path, target: impl AsRef<Path>) -> Result<PathBuf> {
    let target = target.as_ref();
    let root_norm = normalize(root);
    let joined = if target.is_absolute() { target.to_path_buf() } else { root.join(target) };
    let resolved = normalize(&joined);

    let inside = |p: &Path, r: &Path| p.starts_with(r) && p != r;

    if !inside(&resolved, &root_norm) {
        return Err(SnapError::permission_denied(format!(
            "{} resolves outside root {}",
            joined.display(),
            root.display()
        )));
    }

    // Follow symlinks for whatever already exists on disk.
    let root_real = canonical_or_normalized(&root_norm);
    let resolved_real = canonical_or_normalized(&resolved);
    if !inside(&resolved_real, &root_real) {
        return Err(SnapError::permission_denied(format!(
            "{} resolves to {} outside root {}",
            joined.display(),
            resolved_real.display(),
            root.display()
        )));
    }

    Ok(resolved)
}

/// Final path component as a string.
pub fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_conventions() {
        assert_eq!(snapshot_name("pgmain", "20250101-120000"), "pgmain-snapshot-20250101-120000");
        assert!(is_snapshot_name("pgmain-snapshot-20250101-120000", "pgmain"));
        assert!(!is_snapshot_name("pgmain-snapshot-2025", "pgmain"));
        assert!(!is_snapshot_name("other-snapshot-20250101-120000", "pgmain"));
        assert!(is_clone_name("pgmain-clone-20250101-120000", "pgmain"));
        assert!(!is_clone_name("pgmain-snapshot-20250101-120000", "pgmain"));
    }

    #[test]
    fn test_main_name_is_escaped() {
        assert!(is_clone_name("pg.main-clone-20250101-120000", "pg.main"));
        assert!(!is_clone_name("pgXmain-clone-20250101-120000", "pg.main"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("/../../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn test_resolve_under_root() {
        let root = Path::new("/nonexistent-root/data");
        assert_eq!(
            resolve_under_root(root, "pgmain-clone-1").unwrap(),
            PathBuf::from("/nonexistent-root/data/pgmain-clone-1")
        );
        assert!(resolve_under_root(root, "../etc").is_err());
        assert!(resolve_under_root(root, "/etc/passwd").is_err());
        assert!(resolve_under_root(root, ".").is_err());
        assert!(resolve_under_root(root, "a/../../data-evil").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let err = resolve_under_root(root.path(), "link").unwrap_err();
        assert!(matches!(err, SnapError::PermissionDenied { .. }));
    }
}
