//! Clone lifecycle orchestration.
//!
//! Composes the volume tool, the container launcher and the SQL client into
//! the clone operations: create from a snapshot, create from the main
//! volume, refresh in place, delete and list.
//!
//! Each mutating call:
//! - holds leases on the container name and volume path it touches
//! - tracks its progress as a [`CloneStage`] or [`RefreshStage`]
//! - on failure runs the compensation table for the stage it reached
//! - reports per-step timings and best-effort outcomes in its result

pub mod lease;
pub mod stages;

pub use lease::{Lease, LeaseKey, LeaseTable};
pub use stages::{CloneStage, Compensation, RefreshStage};

use crate::backends::Backends;
use crate::clock::Clock;
use crate::config::CloneConfig;
use crate::error::{Result, SnapError};
use crate::launcher::{ContainerLauncher, LaunchPolicy, LaunchRequest, CONTAINER_DATA_ROOT};
use crate::metadata::{self, MetadataRecord, CREATED_BY};
use crate::observability::{metrics as obs_metrics, StepRecorder};
use crate::paths;
use crate::runtime::{self, ContainerRuntime, ENGINE_PORT, LABEL_DESCRIPTION, LABEL_ROLE, LABEL_SYSTEM, ROLE_CLONE, SYSTEM_VALUE};
use crate::sql::{SqlClient, SqlTarget};
use crate::types::{CloneResult, CloneSource, CloneSummary, DeleteResult, LaunchResult, StepOutcome};
use crate::volume::VolumeTool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Owner applied when the image's runtime user cannot be detected.
pub const FALLBACK_RUNTIME_USER: &str = "999:999";

/// Account the engine runs as inside its image.
pub const ENGINE_ACCOUNT: &str = "postgres";

/// Mode applied to clone data; the engine refuses group/world access.
pub const DATA_MODE: &str = "u+rwX,go-rwx";

/// Flushes a WAL boundary and forces a checkpoint.
pub const CHECKPOINT_SQL: &str = "SELECT pg_switch_wal(); CHECKPOINT;";

/// Infix of the temporary volume built during a refresh.
const REFRESH_INFIX: &str = "-refresh-";

/// Infix of the displaced volume kept during a refresh.
const BACKUP_INFIX: &str = "-backup-";

/// Paths and names a compensation may act on.
#[derive(Debug, Default)]
struct Rollback {
    container: Option<String>,
    volume: Option<PathBuf>,
    /// Set only once this call has created the temporary volume.
    temp: Option<PathBuf>,
    target: Option<PathBuf>,
    /// Set only once the target has actually been moved aside.
    backup: Option<PathBuf>,
}

/// The clone state machine.
#[derive(Clone)]
pub struct CloneOrchestrator {
    volumes: Arc<dyn VolumeTool>,
    runtime: Arc<dyn ContainerRuntime>,
    sql: Arc<dyn SqlClient>,
    clock: Arc<dyn Clock>,
    launcher: ContainerLauncher,
    leases: Arc<LeaseTable>,
}

impl CloneOrchestrator {
    pub fn new(backends: &Backends) -> Self {
        let launcher = ContainerLauncher::new(
            backends.runtime.clone(),
            backends.sql.clone(),
            backends.volumes.clone(),
            backends.port_allocator(),
        );
        Self {
            volumes: backends.volumes.clone(),
            runtime: backends.runtime.clone(),
            sql: backends.sql.clone(),
            clock: backends.clock.clone(),
            launcher,
            leases: Arc::new(LeaseTable::new()),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: LaunchPolicy) -> Self {
        self.launcher = self.launcher.with_policy(policy);
        self
    }

    /// Share a lease table with other orchestrators in this process.
    #[must_use]
    pub fn with_leases(mut self, leases: Arc<LeaseTable>) -> Self {
        self.leases = leases;
        self
    }

    #[must_use]
    pub fn leases(&self) -> &Arc<LeaseTable> {
        &self.leases
    }

    /// Create a clone from a snapshot under the root.
    ///
    /// # Errors
    /// * `PermissionDenied` - the snapshot name escapes the root
    /// * `NotFound` - the snapshot is missing or not a subvolume
    #[instrument(skip(self, config, description), fields(main = %config.main_data_dir))]
    pub async fn create_from_snapshot(
        &self,
        snapshot: &str,
        config: &CloneConfig,
        description: Option<String>,
    ) -> Result<CloneResult> {
        let result: Result<CloneResult> = async {
            let path = paths::resolve_under_root(&config.root_data_dir, snapshot)?;
            if !self.volumes.exists(&path).await || !self.volumes.is_subvolume(&path).await {
                return Err(SnapError::not_found(format!(
                    "Snapshot not found or not a subvolume: {}",
                    path.display()
                )));
            }
            let recorder = StepRecorder::new("create_from_snapshot");
            self.create_clone(CloneSource::Snapshot(path), config, description, recorder).await
        }
        .await;
        Self::observe_result("create_from_snapshot", result)
    }

    /// Create a clone directly from the main volume.
    ///
    /// # Errors
    /// * `NotFound` - the main volume is missing
    /// * `InvalidState` - the main volume is not a subvolume
    #[instrument(skip(self, config, description), fields(main = %config.main_data_dir))]
    pub async fn create_from_main(
        &self,
        config: &CloneConfig,
        description: Option<String>,
    ) -> Result<CloneResult> {
        let result: Result<CloneResult> = async {
            let main = paths::resolve_under_root(&config.root_data_dir, &config.main_data_dir)?;
            self.require_subvolume(&main, "Main volume").await?;

            let mut recorder = StepRecorder::new("create_from_main");
            let checkpoint = recorder.observe("checkpoint", self.checkpoint_main(&main, config)).await;
            let mut result =
                self.create_clone(CloneSource::Main(main), config, description, recorder).await?;
            result.warnings.insert(0, checkpoint);
            Ok(result)
        }
        .await;
        Self::observe_result("create_from_main", result)
    }

    async fn create_clone(
        &self,
        source: CloneSource,
        config: &CloneConfig,
        description: Option<String>,
        mut recorder: StepRecorder,
    ) -> Result<CloneResult> {
        let timestamp = self.clock.timestamp();
        let volume_name = paths::clone_name(&config.main_data_dir, &timestamp);
        let volume = paths::resolve_under_root(&config.root_data_dir, &volume_name)?;
        let container = format!("{}-{}", config.container_base, timestamp);

        let _lease = self
            .leases
            .acquire([LeaseKey::container(&container), LeaseKey::volume(&volume)])
            .await;

        if self.volumes.exists(&volume).await {
            return Err(SnapError::AlreadyExists { what: format!("Clone {}", volume.display()) });
        }

        let mut stage = CloneStage::Pending;
        let rollback = Rollback {
            container: Some(container.clone()),
            volume: Some(volume.clone()),
            ..Rollback::default()
        };
        let mut warnings = Vec::new();

        let launched: Result<LaunchResult> = async {
            info!(source = %source.path().display(), clone = %volume_name, "Creating clone");
            recorder.step("snapshot", self.volumes.snapshot(source.path(), &volume, false)).await?;
            stage = CloneStage::SnapshotReady;

            let perms = recorder.step("permissions", self.fix_permissions(&volume, config)).await?;
            warnings.extend(perms);
            stage = CloneStage::PermissionsFixed;

            let record = MetadataRecord {
                name: volume_name.clone(),
                path: volume.clone(),
                source_kind: source.kind().to_string(),
                source: source.path().clone(),
                root_data_dir: config.root_data_dir.clone(),
                main_data_dir: config.main_data_dir.clone(),
                created_at: timestamp.clone(),
                refreshed_at: None,
                created_by: CREATED_BY.to_string(),
                description: description.clone(),
            };
            let written =
                recorder.observe("metadata", metadata::write(self.volumes.as_ref(), &volume, &record)).await;
            warnings.extend(written);
            stage = CloneStage::MetadataWritten;

            let req = LaunchRequest {
                volume: &volume,
                container_name: &container,
                port_hint: None,
                remove_existing: true,
                description: description.as_deref(),
            };
            self.launcher.launch(&req, config, &mut recorder).await
        }
        .await;

        let launched = match launched {
            Ok(l) => l,
            Err(e) => {
                warn!(stage = %stage, error = %e, "Clone creation failed");
                self.compensate(stage.compensation(), &rollback, &e).await;
                return Err(e);
            }
        };

        for next in CloneStage::LAUNCH_STAGES {
            stage = next;
            debug!(stage = %stage, "Stage reached");
        }
        info!(stage = %stage, container = %container, port = launched.host_port, "Clone ready");
        obs_metrics::record_clone_created(source.kind());

        warnings.extend(launched.warnings);
        Ok(CloneResult {
            metadata_path: metadata::metadata_path(&volume),
            source,
            clone_subvolume: volume,
            container_name: launched.container_name,
            host_port: launched.host_port,
            data_dir_in_container: launched.data_dir_in_container,
            description,
            anonymize: launched.anonymize,
            disabled_subscriptions: launched.disabled_subscriptions,
            warnings,
            timings: recorder.finish(),
        })
    }

    /// Replace a clone's data with a fresh copy of the main volume, keeping
    /// its container name and host port.
    ///
    /// # Errors
    /// * `NotFound` - the container does not exist
    /// * `InvalidState` - the container has no data mount or published port
    /// * `PermissionDenied` - its data volume lies outside the root
    /// * `DependencyFailed` - the relaunch failed; the pre-refresh volume is
    ///   kept at its backup path
    #[instrument(skip(self, config, description), fields(main = %config.main_data_dir))]
    pub async fn refresh_in_place(
        &self,
        container: &str,
        config: &CloneConfig,
        description: Option<String>,
    ) -> Result<CloneResult> {
        let result = self.refresh_inner(container, config, description).await;
        Self::observe_result("refresh_in_place", result)
    }

    async fn refresh_inner(
        &self,
        container: &str,
        config: &CloneConfig,
        description_override: Option<String>,
    ) -> Result<CloneResult> {
        let mut recorder = StepRecorder::new("refresh_in_place");
        let _container_lease = self.leases.acquire([LeaseKey::container(container)]).await;
        let (target, _) = self.clone_target(container, config).await?;

        let _volume_lease = self.leases.acquire([LeaseKey::volume(&target)]).await;
        // A delete by volume name may have finished while the volume lease
        // was pending, so only trust what is seen under both leases.
        let (current, port) = self.clone_target(container, config).await?;
        if current != target {
            return Err(SnapError::not_found(format!(
                "Container {} no longer mounts {}",
                container,
                target.display()
            )));
        }
        let target_name = paths::file_name(&target);
        let main = paths::resolve_under_root(&config.root_data_dir, &config.main_data_dir)?;
        self.require_subvolume(&main, "Main volume").await?;
        let mut stage = RefreshStage::TargetInspected;

        let previous = metadata::read(self.volumes.as_ref(), &target).await;
        let description =
            description_override.or_else(|| previous.as_ref().and_then(|m| m.description.clone()));

        let timestamp = self.clock.timestamp();
        let temp = paths::resolve_under_root(
            &config.root_data_dir,
            format!("{}{}{}", target_name, REFRESH_INFIX, timestamp),
        )?;
        let backup_path = paths::resolve_under_root(
            &config.root_data_dir,
            format!("{}{}{}", target_name, BACKUP_INFIX, timestamp),
        )?;
        for path in [&temp, &backup_path] {
            if self.volumes.exists(path).await {
                return Err(SnapError::AlreadyExists { what: format!("Volume {}", path.display()) });
            }
        }

        let mut warnings = Vec::new();
        warnings.push(recorder.observe("checkpoint", self.checkpoint_main(&main, config)).await);

        let mut rollback = Rollback {
            container: Some(container.to_string()),
            target: Some(target.clone()),
            ..Rollback::default()
        };

        let swapped: Result<LaunchResult> = async {
            recorder.step("container_remove", self.runtime.remove(container)).await?;
            stage = RefreshStage::ContainerRemoved;

            recorder.step("snapshot", self.volumes.snapshot(&main, &temp, false)).await?;
            rollback.temp = Some(temp.clone());
            stage = RefreshStage::TempSnapshotCreated;

            let perms = recorder.step("permissions", self.fix_permissions(&temp, config)).await?;
            warnings.extend(perms);
            let record = MetadataRecord {
                name: target_name.clone(),
                path: target.clone(),
                source_kind: "main".to_string(),
                source: main.clone(),
                root_data_dir: config.root_data_dir.clone(),
                main_data_dir: config.main_data_dir.clone(),
                created_at: previous
                    .as_ref()
                    .map(|m| m.created_at.clone())
                    .unwrap_or_else(|| timestamp.clone()),
                refreshed_at: Some(timestamp.clone()),
                created_by: CREATED_BY.to_string(),
                description: description.clone(),
            };
            let written =
                recorder.observe("metadata", metadata::write(self.volumes.as_ref(), &temp, &record)).await;
            warnings.extend(written);
            stage = RefreshStage::TempPrepared;

            if self.volumes.exists(&target).await {
                recorder.step("backup", self.volumes.move_path(&target, &backup_path)).await?;
                rollback.backup = Some(backup_path.clone());
                stage = RefreshStage::TargetBackedUp;
            }

            recorder.step("swap", self.volumes.move_path(&temp, &target)).await?;
            stage = RefreshStage::Swapped;

            let req = LaunchRequest {
                volume: &target,
                container_name: container,
                port_hint: Some(port),
                remove_existing: false,
                description: description.as_deref(),
            };
            self.launcher.launch(&req, config, &mut recorder).await
        }
        .await;

        let launched = match swapped {
            Ok(l) => l,
            Err(e) => {
                warn!(stage = %stage, error = %e, "Refresh failed");
                self.compensate(stage.compensation(), &rollback, &e).await;
                if stage.is_relaunch_failure() {
                    return Err(match e {
                        e @ SnapError::DependencyFailed { .. } => e,
                        other => SnapError::dependency_failed("relaunch", other.to_string()),
                    });
                }
                return Err(e);
            }
        };
        stage = RefreshStage::Relaunched;

        if let Some(backup) = &rollback.backup {
            let deleted = recorder.step("backup_delete", self.volumes.delete_subvolume(backup)).await;
            match deleted {
                Ok(()) => warnings.push(StepOutcome::ok("backup_delete")),
                Err(e) => {
                    warn!(backup = %backup.display(), error = %e, "Failed to delete refresh backup");
                    warnings.push(StepOutcome::ignored("backup_delete", e.to_string()));
                }
            }
        }
        stage = RefreshStage::Done;
        info!(stage = %stage, container, port, "Clone refreshed");
        obs_metrics::record_clone_refreshed();

        warnings.extend(launched.warnings);
        Ok(CloneResult {
            source: CloneSource::Main(main),
            metadata_path: metadata::metadata_path(&target),
            clone_subvolume: target,
            container_name: launched.container_name,
            host_port: launched.host_port,
            data_dir_in_container: launched.data_dir_in_container,
            description,
            anonymize: launched.anonymize,
            disabled_subscriptions: launched.disabled_subscriptions,
            warnings,
            timings: recorder.finish(),
        })
    }

    /// Delete a clone by container name or volume name.
    ///
    /// Removes every container mounting the resolved volume, then the volume.
    ///
    /// # Errors
    /// * `PermissionDenied` - the volume is outside `root`, or (with `main`)
    ///   its name is not a clone name
    /// * `NotFound` - neither the container nor the volume exists
    /// * `InvalidState` - the path is not a subvolume
    #[instrument(skip(self))]
    pub async fn delete(&self, root: &Path, main: Option<&str>, name: &str) -> Result<DeleteResult> {
        let result = self.delete_inner(root, main, name).await;
        Self::observe_result("delete", result)
    }

    async fn delete_inner(&self, root: &Path, main: Option<&str>, name: &str) -> Result<DeleteResult> {
        let mut recorder = StepRecorder::new("delete");
        let _container_lease = self.leases.acquire([LeaseKey::container(name)]).await;

        let path = match self.runtime.inspect(name).await? {
            Some(info) => {
                let mount = info.mount_source(CONTAINER_DATA_ROOT).ok_or_else(|| {
                    SnapError::invalid_state(format!("Container {} has no data volume mount", name))
                })?;
                paths::resolve_under_root(root, mount)?
            }
            None => paths::resolve_under_root(root, name)?,
        };

        let base = paths::file_name(&path);
        if let Some(main) = main {
            if !paths::is_clone_name(&base, main) {
                return Err(SnapError::permission_denied(format!(
                    "{} is not a clone of {}",
                    base, main
                )));
            }
        }

        let _volume_lease = self.leases.acquire([LeaseKey::volume(&path)]).await;
        if !self.volumes.exists(&path).await {
            return Err(SnapError::not_found(format!("Clone {}", path.display())));
        }
        if !self.volumes.is_subvolume(&path).await {
            return Err(SnapError::invalid_state(format!("Not a subvolume: {}", path.display())));
        }

        let removed = recorder
            .step("container_remove", async {
                let mut removed = Vec::new();
                for info in runtime::containers_mounting(self.runtime.as_ref(), &path).await? {
                    self.runtime.remove(&info.name).await?;
                    removed.push(info.name);
                }
                Ok(removed)
            })
            .await?;

        recorder.step("volume_delete", self.volumes.delete_subvolume(&path)).await?;
        info!(path = %path.display(), containers = ?removed, "Clone deleted");
        obs_metrics::record_clone_deleted();

        Ok(DeleteResult { deleted_path: path, removed_containers: removed, timings: recorder.finish() })
    }

    /// Clone containers found by their labels, sorted by name.
    #[instrument(skip(self))]
    pub async fn list_clones(&self) -> Result<Vec<CloneSummary>> {
        let mut names = self
            .runtime
            .list(&[(LABEL_SYSTEM, SYSTEM_VALUE), (LABEL_ROLE, ROLE_CLONE)])
            .await?;
        names.sort();

        let mut clones = Vec::with_capacity(names.len());
        for name in names {
            let Some(info) = self.runtime.inspect(&name).await? else { continue };
            let volume_path = info.mount_source(CONTAINER_DATA_ROOT).map(Path::to_path_buf);
            let mut description = info.label(LABEL_DESCRIPTION).map(String::from);
            if description.is_none() {
                if let Some(volume) = &volume_path {
                    description =
                        metadata::read(self.volumes.as_ref(), volume).await.and_then(|m| m.description);
                }
            }
            clones.push(CloneSummary {
                container_name: info.name.clone(),
                running: info.running,
                started_at: info.started_at.clone(),
                host_port: info.host_port_for(ENGINE_PORT),
                volume_path,
                description,
            });
        }
        Ok(clones)
    }

    /// Clone volume a container mounts, and its published engine port.
    async fn clone_target(&self, container: &str, config: &CloneConfig) -> Result<(PathBuf, u16)> {
        let info = self
            .runtime
            .inspect(container)
            .await?
            .ok_or_else(|| SnapError::not_found(format!("Container {}", container)))?;
        let port = info.host_port_for(ENGINE_PORT).ok_or_else(|| {
            SnapError::invalid_state(format!("Container {} publishes no port", container))
        })?;
        let mount = info.mount_source(CONTAINER_DATA_ROOT).ok_or_else(|| {
            SnapError::invalid_state(format!("Container {} has no data volume mount", container))
        })?;
        let target = paths::resolve_under_root(&config.root_data_dir, mount)?;
        let target_name = paths::file_name(&target);
        if !paths::is_clone_name(&target_name, &config.main_data_dir) {
            return Err(SnapError::permission_denied(format!(
                "{} is not a clone of {}",
                target_name, config.main_data_dir
            )));
        }
        Ok((target, port))
    }

    async fn require_subvolume(&self, path: &Path, what: &str) -> Result<()> {
        if !self.volumes.exists(path).await {
            return Err(SnapError::not_found(format!("{} {}", what, path.display())));
        }
        if !self.volumes.is_subvolume(path).await {
            return Err(SnapError::invalid_state(format!(
                "{} is not a subvolume: {}",
                what,
                path.display()
            )));
        }
        Ok(())
    }

    /// `uid:gid` the engine image runs as.
    async fn runtime_user(&self, config: &CloneConfig) -> (String, StepOutcome) {
        if let Some(user) = config.runtime_user.as_deref().filter(|u| !u.is_empty()) {
            return (user.to_string(), StepOutcome::ok("runtime_user"));
        }
        match self.runtime.image_user(&config.postgres_image, ENGINE_ACCOUNT).await {
            Ok(user) => (user, StepOutcome::ok("runtime_user")),
            Err(e) => {
                warn!(image = %config.postgres_image, error = %e, "Runtime user detection failed, using {}", FALLBACK_RUNTIME_USER);
                (FALLBACK_RUNTIME_USER.to_string(), StepOutcome::ignored("runtime_user", e.to_string()))
            }
        }
    }

    /// Hand the volume to the engine's runtime user. Ownership is required;
    /// the mode change is best-effort since copies keep the source's modes.
    async fn fix_permissions(&self, volume: &Path, config: &CloneConfig) -> Result<Vec<StepOutcome>> {
        let (owner, detected) = self.runtime_user(config).await;
        let mut outcomes = vec![detected];

        self.volumes.chown_recursive(volume, &owner).await?;
        match self.volumes.chmod_recursive(volume, DATA_MODE).await {
            Ok(()) => outcomes.push(StepOutcome::ok("chmod")),
            Err(e) => {
                warn!(path = %volume.display(), error = %e, "Failed to tighten data permissions");
                outcomes.push(StepOutcome::ignored("chmod", e.to_string()));
            }
        }
        Ok(outcomes)
    }

    /// Checkpoint whichever running container mounts the main volume.
    /// Never fails.
    async fn checkpoint_main(&self, main: &Path, config: &CloneConfig) -> StepOutcome {
        let containers = match runtime::containers_mounting(self.runtime.as_ref(), main).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to find the main volume's container");
                return StepOutcome::ignored("checkpoint", e.to_string());
            }
        };
        let Some(info) = containers.into_iter().find(|c| c.running) else {
            warn!(main = %main.display(), "No running container mounts the main volume; skipping checkpoint");
            return StepOutcome::ignored("checkpoint", "no running container mounts the main volume");
        };

        let target = SqlTarget::new(&info.name, &config.postgres_user, &config.postgres_db);
        match self.sql.execute(&target, CHECKPOINT_SQL).await {
            Ok(_) => {
                info!(container = %info.name, "Checkpoint forced on main");
                StepOutcome::ok("checkpoint")
            }
            Err(e) => {
                warn!(container = %info.name, error = %e, "Checkpoint failed; snapshot is crash-consistent only");
                StepOutcome::ignored("checkpoint", e.to_string())
            }
        }
    }

    /// Run compensations in order. Never fails; problems are logged.
    async fn compensate(&self, actions: &[Compensation], rb: &Rollback, cause: &SnapError) {
        for action in actions {
            match action {
                Compensation::RemoveContainer => {
                    let Some(container) = &rb.container else { continue };
                    // On a name clash the container holding the name is not ours.
                    if runtime::is_name_conflict(cause) {
                        warn!(container = %container, "Container name taken by another container; leaving it");
                        continue;
                    }
                    self.launcher.teardown(container).await;
                }
                Compensation::RetainVolume => {
                    if let Some(volume) = &rb.volume {
                        warn!(volume = %volume.display(), "Keeping volume for inspection");
                    }
                }
                Compensation::DeleteTempVolume => {
                    let Some(temp) = &rb.temp else { continue };
                    if self.volumes.is_subvolume(temp).await {
                        if let Err(e) = self.volumes.delete_subvolume(temp).await {
                            warn!(temp = %temp.display(), error = %e, "Failed to delete temporary volume");
                        }
                    }
                }
                Compensation::RestoreBackup => {
                    let (Some(backup), Some(target)) = (&rb.backup, &rb.target) else { continue };
                    if self.volumes.exists(target).await || !self.volumes.exists(backup).await {
                        continue;
                    }
                    match self.volumes.move_path(backup, target).await {
                        Ok(()) => info!(target = %target.display(), "Restored pre-refresh volume"),
                        Err(e) => warn!(
                            backup = %backup.display(),
                            error = %e,
                            "Failed to restore pre-refresh volume"
                        ),
                    }
                }
                Compensation::RetainBackup => {
                    if let Some(backup) = &rb.backup {
                        warn!(backup = %backup.display(), "Keeping pre-refresh volume for manual recovery");
                    }
                }
            }
        }
    }

    fn observe_result<T>(operation: &'static str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            obs_metrics::record_failure(operation, e);
        }
        result
    }
}
