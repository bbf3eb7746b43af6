//! External process execution.
//!
//! Every system call snaplicator makes (btrfs, docker, psql through docker)
//! goes through [`Executor`]. Spawn failures are errors; a non-zero exit is
//! returned as data in [`CommandOutput`] so callers decide whether it is fatal.

use crate::error::{Result, SnapError};
use std::ffi::OsStr;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { code: Some(code), stdout: String::new(), stderr: stderr.into() }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Convert a non-zero exit into [`SnapError::CommandFailed`].
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(SnapError::CommandFailed {
                program: program.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    /// Trimmed stdout.
    #[must_use]
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Runs external processes, optionally through `sudo`.
#[derive(Debug, Clone)]
pub struct Executor {
    sudo: bool,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Executor {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    /// Executor that never elevates, whatever this one does.
    #[must_use]
    pub fn unprivileged(&self) -> Self {
        Self { sudo: false }
    }

    fn command<S: AsRef<OsStr>>(&self, program: &str, args: &[S]) -> Command {
        let mut cmd = if self.sudo {
            let mut c = Command::new("sudo");
            c.arg("-n").arg(program);
            c
        } else {
            Command::new(program)
        };
        cmd.args(args).kill_on_drop(true);
        cmd
    }

    /// Run a program and capture its output.
    #[instrument(skip(self, args), fields(sudo = self.sudo))]
    pub async fn run<S: AsRef<OsStr>>(&self, program: &str, args: &[S]) -> Result<CommandOutput> {
        let output = self.command(program, args).output().await.map_err(|e| {
            SnapError::Internal(format!("Failed to spawn {}: {}", program, e))
        })?;

        let out = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!(code = ?out.code, "{} finished", program);
        Ok(out)
    }

    /// Run a program, feeding `input` on stdin.
    #[instrument(skip(self, args, input), fields(sudo = self.sudo, input_len = input.len()))]
    pub async fn run_with_stdin<S: AsRef<OsStr>>(
        &self,
        program: &str,
        args: &[S],
        input: &[u8],
    ) -> Result<CommandOutput> {
        let mut child = self
            .command(program, args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SnapError::Internal(format!("Failed to spawn {}: {}", program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await.map_err(|e| {
                SnapError::Internal(format!("Failed to write stdin of {}: {}", program, e))
            })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SnapError::Internal(format!("Failed to wait for {}: {}", program, e)))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run a program and fail on non-zero exit.
    pub async fn run_checked<S: AsRef<OsStr>>(
        &self,
        program: &str,
        args: &[S],
    ) -> Result<CommandOutput> {
        self.run(program, args).await?.check(program)
    }
}
