//! Configuration management.
//!
//! Settings come from a JSON file and are then overridden by `SNAPLICATOR_*`
//! environment variables. Operations validate only the keys they need.

use crate::error::{Result, SnapError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default preferred host port for clone containers.
pub const DEFAULT_HOST_PORT: u16 = 5432;

/// Default engine image.
pub const DEFAULT_POSTGRES_IMAGE: &str = "postgres:17";

/// Persistent configuration for snaplicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the main volume, snapshots and clones.
    pub root_data_dir: PathBuf,
    /// Name of the main (replica) volume under `root_data_dir`.
    pub main_data_dir: String,
    /// Base name for clone containers; also the main replica's container.
    pub container_name: Option<String>,
    pub network_name: Option<String>,
    /// First port tried when allocating a host port.
    pub host_port: u16,
    pub postgres_user: Option<String>,
    pub postgres_password: Option<String>,
    pub postgres_db: Option<String>,
    pub postgres_image: String,
    /// SQL script run inside every new clone.
    pub anonymize_script: Option<PathBuf>,
    pub use_sudo: bool,
    pub port_probe_attempts: u32,
    /// `uid:gid` override; detected from the image when absent.
    pub runtime_user: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root_data_dir: PathBuf::new(),
            main_data_dir: String::new(),
            container_name: None,
            network_name: None,
            host_port: DEFAULT_HOST_PORT,
            postgres_user: None,
            postgres_password: None,
            postgres_db: None,
            postgres_image: DEFAULT_POSTGRES_IMAGE.to_string(),
            anonymize_script: None,
            use_sudo: true,
            port_probe_attempts: 100,
            runtime_user: None,
        }
    }
}

/// Fully validated settings for clone operations.
#[derive(Debug, Clone)]
pub struct CloneConfig {
    pub root_data_dir: PathBuf,
    pub main_data_dir: String,
    pub container_base: String,
    pub network_name: String,
    pub host_port: u16,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_db: String,
    pub postgres_image: String,
    pub anonymize_script: Option<PathBuf>,
    pub port_probe_attempts: u32,
    pub runtime_user: Option<String>,
}

impl CloneConfig {
    /// Host path of the main volume.
    pub fn main_path(&self) -> PathBuf {
        self.root_data_dir.join(&self.main_data_dir)
    }
}

/// Settings needed to query the main replica.
#[derive(Debug, Clone)]
pub struct ReplicaTarget {
    pub container_name: String,
    pub postgres_user: String,
    pub postgres_db: String,
}

fn required(value: &Option<String>, key: &str, missing: &mut Vec<String>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.clone(),
        _ => {
            missing.push(key.to_string());
            String::new()
        }
    }
}

impl Settings {
    /// Get the default path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_dir().join("config.json")
    }

    /// Load configuration from `path` (or the default path), then apply
    /// environment overrides. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                SnapError::config(format!("Failed to read config {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                SnapError::config(format!("Failed to parse config {}: {}", path.display(), e))
            })?
        } else {
            Self::default()
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply `SNAPLICATOR_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(&format!("SNAPLICATOR_{}", key));

        if let Some(v) = get("ROOT_DATA_DIR") {
            self.root_data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MAIN_DATA_DIR") {
            self.main_data_dir = v;
        }
        if let Some(v) = get("CONTAINER_NAME") {
            self.container_name = Some(v);
        }
        if let Some(v) = get("NETWORK_NAME") {
            self.network_name = Some(v);
        }
        if let Some(v) = get("HOST_PORT") {
            self.host_port = v
                .parse()
                .map_err(|_| SnapError::config(format!("Invalid SNAPLICATOR_HOST_PORT: {}", v)))?;
        }
        if let Some(v) = get("POSTGRES_USER") {
            self.postgres_user = Some(v);
        }
        if let Some(v) = get("POSTGRES_PASSWORD") {
            self.postgres_password = Some(v);
        }
        if let Some(v) = get("POSTGRES_DB") {
            self.postgres_db = Some(v);
        }
        if let Some(v) = get("POSTGRES_IMAGE") {
            self.postgres_image = v;
        }
        if let Some(v) = get("ANONYMIZE_SCRIPT") {
            self.anonymize_script = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
        if let Some(v) = get("USE_SUDO") {
            self.use_sudo = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = get("RUNTIME_USER") {
            self.runtime_user = Some(v);
        }
        Ok(())
    }

    /// Root and main volume names, which every operation needs.
    pub fn volume_location(&self) -> Result<(PathBuf, String)> {
        let mut missing = Vec::new();
        if self.root_data_dir.as_os_str().is_empty() {
            missing.push("root_data_dir".to_string());
        }
        if self.main_data_dir.trim().is_empty() {
            missing.push("main_data_dir".to_string());
        }
        if !missing.is_empty() {
            return Err(SnapError::config(format!("Missing settings: {}", missing.join(", "))));
        }
        Ok((self.root_data_dir.clone(), self.main_data_dir.clone()))
    }

    /// Validate everything clone create/refresh needs.
    pub fn clone_config(&self) -> Result<CloneConfig> {
        let (root_data_dir, main_data_dir) = self.volume_location()?;
        let mut missing = Vec::new();
        let container_base = required(&self.container_name, "container_name", &mut missing);
        let network_name = required(&self.network_name, "network_name", &mut missing);
        let postgres_user = required(&self.postgres_user, "postgres_user", &mut missing);
        let postgres_password =
            required(&self.postgres_password, "postgres_password", &mut missing);
        let postgres_db = required(&self.postgres_db, "postgres_db", &mut missing);
        if !missing.is_empty() {
            return Err(SnapError::config(format!(
                "Missing settings for clone: {}",
                missing.join(", ")
            )));
        }

        Ok(CloneConfig {
            root_data_dir,
            main_data_dir,
            container_base,
            network_name,
            host_port: self.host_port,
            postgres_user,
            postgres_password,
            postgres_db,
            postgres_image: self.postgres_image.clone(),
            anonymize_script: self.anonymize_script.clone(),
            port_probe_attempts: self.port_probe_attempts.max(1),
            runtime_user: self.runtime_user.clone(),
        })
    }

    /// Validate everything replication queries need.
    pub fn replica_target(&self) -> Result<ReplicaTarget> {
        let mut missing = Vec::new();
        let container_name = required(&self.container_name, "container_name", &mut missing);
        let postgres_user = required(&self.postgres_user, "postgres_user", &mut missing);
        let postgres_db = required(&self.postgres_db, "postgres_db", &mut missing);
        if !missing.is_empty() {
            return Err(SnapError::config(format!(
                "Missing settings for replication: {}",
                missing.join(", ")
            )));
        }
        Ok(ReplicaTarget { container_name, postgres_user, postgres_db })
    }
}
