//! Container runtime abstraction.
//!
//! The orchestrator drives containers only through [`ContainerRuntime`];
//! [`docker::DockerRuntime`] is the production implementation.

use crate::error::{Result, SnapError};
use crate::exec::CommandOutput;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub mod docker;

pub use docker::DockerRuntime;

/// Label present on every container snaplicator starts.
pub const LABEL_SYSTEM: &str = "snaplicator.system";
pub const SYSTEM_VALUE: &str = "snaplicator";

/// Role label; clones carry [`ROLE_CLONE`].
pub const LABEL_ROLE: &str = "snaplicator.role";
pub const ROLE_CLONE: &str = "clone";

/// Name of the main volume the clone was derived from.
pub const LABEL_MAIN: &str = "snaplicator.main";

/// Free-text description, when one was given.
pub const LABEL_DESCRIPTION: &str = "snaplicator.description";

/// Port the database engine listens on inside its container.
pub const ENGINE_PORT: u16 = 5432;

/// A bind mount of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: PathBuf,
    pub destination: String,
}

/// A published port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
}

/// Inspected state of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub running: bool,
    pub started_at: Option<String>,
    pub mounts: Vec<Mount>,
    pub ports: Vec<PortBinding>,
    pub labels: BTreeMap<String, String>,
}

impl ContainerInfo {
    /// Host port published for `container_port`, if any.
    #[must_use]
    pub fn host_port_for(&self, container_port: u16) -> Option<u16> {
        self.ports.iter().find(|p| p.container_port == container_port).map(|p| p.host_port)
    }

    /// Host source of the mount at `destination`.
    #[must_use]
    pub fn mount_source(&self, destination: &str) -> Option<&Path> {
        self.mounts
            .iter()
            .find(|m| m.destination.trim_end_matches('/') == destination.trim_end_matches('/'))
            .map(|m| m.source.as_path())
    }

    /// True iff any mount has exactly `source` as its host path.
    #[must_use]
    pub fn mounts_source(&self, source: &Path) -> bool {
        self.mounts.iter().any(|m| m.source == source)
    }

    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// True iff the container carries the system and clone role labels.
    #[must_use]
    pub fn is_clone(&self) -> bool {
        self.label(LABEL_SYSTEM) == Some(SYSTEM_VALUE) && self.label(LABEL_ROLE) == Some(ROLE_CLONE)
    }
}

/// Everything needed to start a detached container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub network: Option<String>,
    pub ports: Vec<PortBinding>,
    pub env: Vec<(String, String)>,
    pub volumes: Vec<Mount>,
    pub labels: BTreeMap<String, String>,
    /// Arguments passed to the image entrypoint.
    pub args: Vec<String>,
}

/// Container capability used by the launcher and orchestrator.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Names of all containers (running or not) carrying every given label.
    async fn list(&self, labels: &[(&str, &str)]) -> Result<Vec<String>>;

    /// Inspect a container; `Ok(None)` if it does not exist.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Start a detached container.
    async fn run(&self, spec: &RunSpec) -> Result<()>;

    /// Force-remove a container. Absence is not an error.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Run a command inside a running container. Non-zero exit is returned
    /// as data.
    async fn exec(&self, name: &str, cmd: &[String]) -> Result<CommandOutput>;

    /// Copy a host file into a container.
    async fn copy_into(&self, name: &str, src: &Path, dest: &str) -> Result<()>;

    /// Create the network if it does not exist.
    async fn ensure_network(&self, name: &str) -> Result<()>;

    /// `uid:gid` of `user` inside `image`.
    async fn image_user(&self, image: &str, user: &str) -> Result<String>;
}

/// Every container, running or not, with `source` bind-mounted.
pub async fn containers_mounting(
    runtime: &dyn ContainerRuntime,
    source: &Path,
) -> Result<Vec<ContainerInfo>> {
    let mut found = Vec::new();
    for name in runtime.list(&[]).await? {
        if let Some(info) = runtime.inspect(&name).await? {
            if info.mounts_source(source) {
                found.push(info);
            }
        }
    }
    Ok(found)
}

/// True if the error is the runtime refusing a host port already in use.
#[must_use]
pub fn is_port_conflict(err: &SnapError) -> bool {
    match err {
        SnapError::CommandFailed { stderr, .. } => {
            let s = stderr.to_ascii_lowercase();
            s.contains("port is already allocated") || s.contains("address already in use")
        }
        _ => false,
    }
}

/// True if the runtime refused a container name that is already taken.
#[must_use]
pub fn is_name_conflict(err: &SnapError) -> bool {
    matches!(err, SnapError::CommandFailed { stderr, .. } if stderr.contains("is already in use by container"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ContainerInfo {
        ContainerInfo {
            name: "pg-clone-20250101-000000".into(),
            running: true,
            started_at: None,
            mounts: vec![Mount {
                source: "/data/pgmain-clone-20250101-000000".into(),
                destination: "/var/lib/postgresql/data/".into(),
            }],
            ports: vec![PortBinding { container_port: 5432, host_port: 5440 }],
            labels: [
                (LABEL_SYSTEM.to_string(), SYSTEM_VALUE.to_string()),
                (LABEL_ROLE.to_string(), ROLE_CLONE.to_string()),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn test_container_info_lookups() {
        let info = info();
        assert_eq!(info.host_port_for(ENGINE_PORT), Some(5440));
        assert_eq!(info.host_port_for(80), None);
        assert_eq!(
            info.mount_source("/var/lib/postgresql/data"),
            Some(Path::new("/data/pgmain-clone-20250101-000000"))
        );
        assert!(info.mounts_source(Path::new("/data/pgmain-clone-20250101-000000")));
        assert!(!info.mounts_source(Path::new("/data/pgmain")));
        assert!(info.is_clone());
    }

    #[test]
    fn test_is_port_conflict() {
        let conflict = SnapError::CommandFailed {
            program: "docker".into(),
            code: Some(125),
            stderr: "Error response from daemon: ... Bind for 0.0.0.0:5432 failed: port is already allocated".into(),
        };
        assert!(is_port_conflict(&conflict));

        let other = SnapError::CommandFailed {
            program: "docker".into(),
            code: Some(125),
            stderr: "No such image".into(),
        };
        assert!(!is_port_conflict(&other));
        assert!(!is_port_conflict(&SnapError::Internal("port is already allocated".into())));

        let clash = SnapError::CommandFailed {
            program: "docker".into(),
            code: Some(125),
            stderr: "Conflict. The container name \"/pg\" is already in use by container \"abc\"".into(),
        };
        assert!(is_name_conflict(&clash));
        assert!(!is_name_conflict(&other));
    }
}
