//! btrfs implementation of [`VolumeTool`].
//!
//! Uses the `btrfs` CLI for subvolume operations and coreutils/attr tools for
//! ownership, moves and metadata. All commands run through the privileged
//! executor because clone data is owned by the database runtime user.

use super::VolumeTool;
use crate::error::{Result, SnapError};
use crate::exec::Executor;
use crate::types::SubvolumeInfo;
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, instrument, warn};

/// Argument variants tried, in order, to mark a subvolume read-only.
/// Older btrfs-progs reject `-ts`.
const READONLY_VARIANTS: &[&[&str]] = &[&["-ts"], &[], &["-t", "subvol"]];

/// btrfs-backed volume tool.
#[derive(Debug, Clone)]
pub struct BtrfsTool {
    exec: Executor,
}

impl BtrfsTool {
    pub fn new(exec: Executor) -> Self {
        Self { exec }
    }
}

fn p(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Read the `Flags:` line of `btrfs subvolume show`.
pub(crate) fn parse_subvolume_show(stdout: &str) -> SubvolumeInfo {
    let readonly = stdout
        .lines()
        .map(str::trim)
        .any(|line| line.starts_with("Flags:") && line.contains("readonly"));
    SubvolumeInfo { readonly }
}

/// Parse `btrfs filesystem du -s --raw` into `(total, exclusive)`.
pub(crate) fn parse_btrfs_du(stdout: &str) -> Option<(Option<u64>, Option<u64>)> {
    let line = stdout.lines().map(str::trim).find(|l| {
        l.split_whitespace().next().map(|f| f.chars().all(|c| c.is_ascii_digit())).unwrap_or(false)
    })?;
    let mut fields = line.split_whitespace();
    let total = fields.next().and_then(|f| f.parse().ok());
    let exclusive = fields.next().and_then(|f| f.parse().ok());
    Some((total, exclusive))
}

/// Parse the leading byte count of `du -sb`.
pub(crate) fn parse_du(stdout: &str) -> Option<u64> {
    stdout.split_whitespace().next()?.parse().ok()
}

#[async_trait]
impl VolumeTool for BtrfsTool {
    async fn is_subvolume(&self, path: &Path) -> bool {
        match self.exec.run("btrfs", &["subvolume", "show", &p(path)]).await {
            Ok(out) => out.success(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "subvolume probe failed");
                false
            }
        }
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn subvolume_info(&self, path: &Path) -> Result<SubvolumeInfo> {
        let out = self.exec.run_checked("btrfs", &["subvolume", "show", &p(path)]).await?;
        Ok(parse_subvolume_show(&out.stdout))
    }

    #[instrument(skip(self), fields(src = %src.display(), dst = %dst.display()))]
    async fn snapshot(&self, src: &Path, dst: &Path, readonly: bool) -> Result<()> {
        let mut args = vec!["subvolume".to_string(), "snapshot".to_string()];
        if readonly {
            args.push("-r".to_string());
        }
        args.push(p(src));
        args.push(p(dst));
        self.exec.run_checked("btrfs", &args).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn set_readonly(&self, path: &Path) -> Result<()> {
        let mut last_err = None;
        for variant in READONLY_VARIANTS {
            let mut args: Vec<String> = vec!["property".into(), "set".into()];
            args.extend(variant.iter().map(|s| s.to_string()));
            args.extend([p(path), "ro".into(), "true".into()]);

            match self.exec.run_checked("btrfs", &args).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    debug!(variant = ?variant, error = %e, "read-only variant rejected");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| SnapError::Internal("no read-only variant tried".into())))
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn delete_subvolume(&self, path: &Path) -> Result<()> {
        self.exec.run_checked("btrfs", &["subvolume", "delete", &p(path)]).await?;
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        self.exec.run("test", &["-e", &p(path)]).await.map(|o| o.success()).unwrap_or(false)
    }

    async fn file_exists(&self, path: &Path) -> bool {
        self.exec.run("test", &["-f", &p(path)]).await.map(|o| o.success()).unwrap_or(false)
    }

    async fn is_mounted(&self, path: &Path) -> Result<bool> {
        let out =
            self.exec.unprivileged().run("findmnt", &["-rn", "--mountpoint", &p(path)]).await?;
        match out.code {
            Some(0) => Ok(!out.stdout_trimmed().is_empty()),
            Some(1) => Ok(false),
            _ => Err(SnapError::CommandFailed {
                program: "findmnt".to_string(),
                code: out.code,
                stderr: out.stderr.trim().to_string(),
            }),
        }
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| SnapError::Io { path: dir.to_path_buf(), source: e })?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SnapError::Io { path: dir.to_path_buf(), source: e })?
        {
            // file_type() does not follow symlinks.
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => names.push(entry.file_name().to_string_lossy().to_string()),
                _ => {}
            }
        }
        Ok(names)
    }

    async fn chown_recursive(&self, path: &Path, owner: &str) -> Result<()> {
        self.exec.run_checked("chown", &["-R", owner, &p(path)]).await?;
        Ok(())
    }

    async fn chmod_recursive(&self, path: &Path, mode: &str) -> Result<()> {
        self.exec.run_checked("chmod", &["-R", mode, &p(path)]).await?;
        Ok(())
    }

    async fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        self.exec.run_checked("mv", &["-T", &p(from), &p(to)]).await?;
        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        // Plain write first; clone data is usually owned by the runtime user.
        if tokio::fs::write(path, contents).await.is_ok() {
            return Ok(());
        }
        self.exec.run_with_stdin("tee", &[p(path)], contents).await?.check("tee")?;
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<String> {
        if let Ok(content) = tokio::fs::read_to_string(path).await {
            return Ok(content);
        }
        let out = self.exec.run_checked("cat", &[p(path)]).await?;
        Ok(out.stdout)
    }

    async fn set_xattr(&self, path: &Path, key: &str, value: &str) -> Result<()> {
        self.exec.run_checked("setfattr", &["-n", key, "-v", value, &p(path)]).await?;
        Ok(())
    }

    async fn get_xattr(&self, path: &Path, key: &str) -> Result<Option<String>> {
        let out = self
            .exec
            .run("getfattr", &["--only-values", "--absolute-names", "-n", key, &p(path)])
            .await?;
        if !out.success() {
            if out.stderr.contains("No such attribute") {
                return Ok(None);
            }
            return out.check("getfattr").map(|_| None);
        }
        Ok(Some(out.stdout).filter(|v| !v.is_empty()))
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn disk_usage(&self, path: &Path) -> Option<u64> {
        match self.exec.run("btrfs", &["filesystem", "du", "-s", "--raw", &p(path)]).await {
            Ok(out) if out.success() => {
                if let Some((total, exclusive)) = parse_btrfs_du(&out.stdout) {
                    if let Some(bytes) = exclusive.or(total) {
                        return Some(bytes);
                    }
                }
            }
            Ok(out) => debug!(stderr = %out.stderr.trim(), "btrfs du failed, falling back"),
            Err(e) => debug!(error = %e, "btrfs du failed, falling back"),
        }

        match self.exec.run("du", &["-sb", &p(path)]).await {
            Ok(out) if out.success() => parse_du(&out.stdout),
            _ => {
                warn!(path = %path.display(), "disk usage unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subvolume_show() {
        let ro = "pgmain-snapshot-20250101-000000\n\tName: \tx\n\tFlags: \t\treadonly\n";
        assert!(parse_subvolume_show(ro).readonly);
        let rw = "x\n\tFlags: \t\t-\n";
        assert!(!parse_subvolume_show(rw).readonly);
    }

    #[test]
    fn test_parse_btrfs_du() {
        let out = "     Total   Exclusive  Set shared  Filename\n  16384000     4096000     12288000  /data/x\n";
        assert_eq!(parse_btrfs_du(out), Some((Some(16384000), Some(4096000))));
        assert_eq!(parse_btrfs_du("Total Exclusive\n"), None);
    }

    #[test]
    fn test_parse_du() {
        assert_eq!(parse_du("123456\t/data/x\n"), Some(123456));
        assert_eq!(parse_du(""), None);
    }
}
