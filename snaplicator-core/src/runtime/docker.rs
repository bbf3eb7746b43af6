//! Docker CLI implementation of [`ContainerRuntime`].

use super::{ContainerInfo, ContainerRuntime, Mount, PortBinding, RunSpec};
use crate::error::{Result, SnapError};
use crate::exec::{CommandOutput, Executor};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

const DOCKER: &str = "docker";

/// Docker-backed container runtime.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    exec: Executor,
}

impl DockerRuntime {
    /// Docker talks to its daemon socket; it never needs `sudo` here.
    pub fn new(exec: Executor) -> Self {
        Self { exec: exec.unprivileged() }
    }

    /// Build the `docker run` argument list for a spec.
    pub fn run_args(spec: &RunSpec) -> Vec<String> {
        let mut args: Vec<String> = vec!["run".into(), "-d".into(), "--name".into(), spec.name.clone()];
        if let Some(network) = &spec.network {
            args.extend(["--network".into(), network.clone()]);
        }
        for port in &spec.ports {
            args.extend(["-p".into(), format!("{}:{}", port.host_port, port.container_port)]);
        }
        for (key, value) in &spec.env {
            args.extend(["-e".into(), format!("{}={}", key, value)]);
        }
        for mount in &spec.volumes {
            args.extend(["-v".into(), format!("{}:{}", mount.source.display(), mount.destination)]);
        }
        for (key, value) in &spec.labels {
            args.extend(["--label".into(), format!("{}={}", key, value)]);
        }
        args.push(spec.image.clone());
        args.extend(spec.args.iter().cloned());
        args
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    started_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectMount {
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostPort {
    #[serde(default)]
    host_port: String,
}

type PortMap = HashMap<String, Option<Vec<InspectHostPort>>>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetworkSettings {
    #[serde(default)]
    ports: Option<PortMap>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    #[serde(default)]
    port_bindings: Option<PortMap>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    name: String,
    state: InspectState,
    #[serde(default)]
    mounts: Vec<InspectMount>,
    #[serde(default)]
    network_settings: InspectNetworkSettings,
    #[serde(default)]
    host_config: InspectHostConfig,
    #[serde(default)]
    config: InspectConfig,
}

fn port_bindings(map: &PortMap) -> Vec<PortBinding> {
    let mut bindings: Vec<PortBinding> = Vec::new();
    for (key, hosts) in map {
        let Some(container_port) = key.split('/').next().and_then(|p| p.parse::<u16>().ok()) else {
            continue;
        };
        for host in hosts.iter().flatten() {
            let Ok(host_port) = host.host_port.parse::<u16>() else { continue };
            let binding = PortBinding { container_port, host_port };
            // IPv4 and IPv6 bindings repeat the same pair.
            if !bindings.contains(&binding) {
                bindings.push(binding);
            }
        }
    }
    bindings.sort_by_key(|b| (b.container_port, b.host_port));
    bindings
}

impl From<InspectEntry> for ContainerInfo {
    fn from(entry: InspectEntry) -> Self {
        let mut ports = entry
            .network_settings
            .ports
            .as_ref()
            .map(port_bindings)
            .unwrap_or_default();
        // Stopped containers only keep their bindings in the host config.
        if ports.is_empty() {
            ports = entry.host_config.port_bindings.as_ref().map(port_bindings).unwrap_or_default();
        }

        Self {
            name: entry.name.trim_start_matches('/').to_string(),
            running: entry.state.running,
            started_at: entry.state.started_at.filter(|s| !s.is_empty()),
            mounts: entry
                .mounts
                .into_iter()
                .filter(|m| !m.source.is_empty())
                .map(|m| Mount { source: PathBuf::from(m.source), destination: m.destination })
                .collect(),
            ports,
            labels: entry.config.labels.unwrap_or_default(),
        }
    }
}

/// Parse `docker inspect` JSON output.
pub fn parse_inspect(json: &str) -> Result<Vec<ContainerInfo>> {
    let entries: Vec<InspectEntry> = serde_json::from_str(json)
        .map_err(|e| SnapError::Internal(format!("Invalid docker inspect output: {}", e)))?;
    Ok(entries.into_iter().map(ContainerInfo::from).collect())
}

fn is_missing(out: &CommandOutput) -> bool {
    let stderr = out.stderr.to_ascii_lowercase();
    stderr.contains("no such container") || stderr.contains("no such object")
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list(&self, labels: &[(&str, &str)]) -> Result<Vec<String>> {
        let mut args: Vec<String> = vec!["ps".into(), "-a".into(), "--format".into(), "{{.Names}}".into()];
        for (key, value) in labels {
            args.extend(["--filter".into(), format!("label={}={}", key, value)]);
        }
        let out = self.exec.run_checked(DOCKER, &args).await?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let out = self.exec.run(DOCKER, &["container", "inspect", name]).await?;
        if !out.success() {
            if is_missing(&out) {
                return Ok(None);
            }
            return out.check(DOCKER).map(|_| None);
        }
        Ok(parse_inspect(&out.stdout)?.into_iter().next())
    }

    #[instrument(skip(self, spec), fields(container = %spec.name, image = %spec.image))]
    async fn run(&self, spec: &RunSpec) -> Result<()> {
        let args = Self::run_args(spec);
        self.exec.run_checked(DOCKER, &args).await?;
        info!("Container started");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, name: &str) -> Result<()> {
        let out = self.exec.run(DOCKER, &["rm", "-f", name]).await?;
        if out.success() || is_missing(&out) {
            debug!("Container removed");
            return Ok(());
        }
        out.check(DOCKER).map(|_| ())
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<CommandOutput> {
        let mut args: Vec<String> = vec!["exec".into(), name.to_string()];
        args.extend(cmd.iter().cloned());
        self.exec.run(DOCKER, &args).await
    }

    async fn copy_into(&self, name: &str, src: &Path, dest: &str) -> Result<()> {
        let target = format!("{}:{}", name, dest);
        self.exec.run_checked(DOCKER, &["cp".to_string(), src.display().to_string(), target]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ensure_network(&self, name: &str) -> Result<()> {
        let out = self.exec.run_checked(DOCKER, &["network", "ls", "--format", "{{.Name}}"]).await?;
        if out.stdout.lines().any(|l| l.trim() == name) {
            return Ok(());
        }
        info!(network = %name, "Creating network");
        self.exec.run_checked(DOCKER, &["network", "create", name]).await?;
        Ok(())
    }

    async fn image_user(&self, image: &str, user: &str) -> Result<String> {
        let mut ids = Vec::with_capacity(2);
        for flag in ["-u", "-g"] {
            let out = self
                .exec
                .run_checked(DOCKER, &["run", "--rm", "--entrypoint", "id", image, flag, user])
                .await?;
            let id = out.stdout_trimmed();
            if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
                return Err(SnapError::Internal(format!("Unexpected id output: {:?}", id)));
            }
            ids.push(id.to_string());
        }
        Ok(ids.join(":"))
    }
}
