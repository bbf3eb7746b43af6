//! Database container launcher.
//!
//! Starts an engine container on a prepared data volume, waits for it to
//! accept connections, then reconciles the copied data: inherited
//! subscriptions are disabled, sequences are resynchronized and the
//! anonymization script runs.
//!
//! Failures in sequence resync or anonymization remove the container before
//! the error is returned. The data volume is never touched here.

use crate::config::CloneConfig;
use crate::error::{Result, SnapError};
use crate::observability::{metrics as obs_metrics, StepRecorder};
use crate::ports::PortAllocator;
use crate::runtime::{
    self, ContainerRuntime, Mount, PortBinding, RunSpec, ENGINE_PORT, LABEL_DESCRIPTION,
    LABEL_MAIN, LABEL_ROLE, LABEL_SYSTEM, ROLE_CLONE, SYSTEM_VALUE,
};
use crate::sql::{self, SqlClient, SqlTarget};
use crate::types::{AnonymizeOutcome, LaunchResult, StepOutcome};
use crate::volume::VolumeTool;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Mount point of the data volume inside the container.
pub const CONTAINER_DATA_ROOT: &str = "/var/lib/postgresql/data";

/// Marker file present at the root of an initialized data directory.
pub const VERSION_MARKER: &str = "PG_VERSION";

/// Where the anonymization script is copied inside the container.
pub const ANONYMIZE_SCRIPT_PATH: &str = "/tmp/snaplicator-anonymize.sql";

/// Engine argument that keeps logical replication workers from starting.
pub const DISABLE_REPLICATION_WORKERS: &str = "max_logical_replication_workers=0";

/// Inbound subscriptions and the database each one lives in.
pub const LIST_SUBSCRIPTIONS_SQL: &str = "SELECT s.subname, d.datname \
     FROM pg_subscription s JOIN pg_database d ON d.oid = s.subdbid \
     ORDER BY s.subname";

/// Sets every sequence a column draws from (a `nextval` default or an
/// identity column) to the largest value across all columns sharing it, or
/// back to its start value when they are all empty.
pub const SEQUENCE_RESYNC_SQL: &str = r#"DO $$
DECLARE
    r record;
    q text;
    col_max bigint;
    max_val bigint;
BEGIN
    FOR r IN
        WITH backing AS (
            SELECT dep.refobjid AS seq, ad.adrelid AS rel, ad.adnum AS attnum
            FROM pg_attrdef ad
            JOIN pg_depend dep ON dep.classid = 'pg_attrdef'::regclass
                AND dep.objid = ad.oid
                AND dep.refclassid = 'pg_class'::regclass
            UNION
            SELECT dep.objid, dep.refobjid, dep.refobjsubid
            FROM pg_depend dep
            WHERE dep.classid = 'pg_class'::regclass
              AND dep.refclassid = 'pg_class'::regclass
              AND dep.deptype = 'i'
              AND dep.refobjsubid > 0
        )
        SELECT b.seq::regclass AS seq,
               array_agg(format('SELECT max(%I)::bigint FROM %I.%I', a.attname, n.nspname, c.relname)) AS queries
        FROM backing b
        JOIN pg_class sq ON sq.oid = b.seq AND sq.relkind = 'S'
        JOIN pg_class c ON c.oid = b.rel
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_attribute a ON a.attrelid = b.rel AND a.attnum = b.attnum AND NOT a.attisdropped
        WHERE c.relkind IN ('r', 'p')
          AND NOT c.relispartition
          AND n.nspname NOT IN ('pg_catalog', 'information_schema')
          AND n.nspname NOT LIKE 'pg_toast%'
        GROUP BY b.seq
    LOOP
        max_val := NULL;
        FOREACH q IN ARRAY r.queries LOOP
            EXECUTE q INTO col_max;
            max_val := GREATEST(max_val, col_max);
        END LOOP;
        IF max_val IS NULL THEN
            PERFORM setval(r.seq, s.seqstart, false)
            FROM pg_sequence s WHERE s.seqrelid = r.seq;
        ELSE
            PERFORM setval(r.seq, max_val, true);
        END IF;
    END LOOP;
END
$$;"#;

/// Retry bounds and intervals for the launcher's polling loops.
#[derive(Debug, Clone)]
pub struct LaunchPolicy {
    /// Pause between readiness and liveness probes.
    pub probe_interval: Duration,
    pub ready_attempts: u32,
    pub liveness_attempts: u32,
    pub anonymize_attempts: u32,
    pub anonymize_backoff: Duration,
    /// Container starts tried when the allocated port loses a bind race.
    pub bind_attempts: u32,
}

impl Default for LaunchPolicy {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(1),
            ready_attempts: 60,
            liveness_attempts: 10,
            anonymize_attempts: 5,
            anonymize_backoff: Duration::from_secs(1),
            bind_attempts: 3,
        }
    }
}

impl LaunchPolicy {
    /// Same bounds with no waiting; used by tests.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            probe_interval: Duration::ZERO,
            anonymize_backoff: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// What to launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    /// Host path of the data volume.
    pub volume: &'a Path,
    pub container_name: &'a str,
    /// Host port to reuse; skips allocation and bind retries.
    pub port_hint: Option<u16>,
    /// Force-remove a same-named container first.
    pub remove_existing: bool,
    pub description: Option<&'a str>,
}

/// In-container data directory layout detected on a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    /// Value for `PGDATA`.
    pub pgdata: String,
}

/// Quote an SQL identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Starts and reconciles clone containers.
#[derive(Clone)]
pub struct ContainerLauncher {
    runtime: Arc<dyn ContainerRuntime>,
    sql: Arc<dyn SqlClient>,
    volumes: Arc<dyn VolumeTool>,
    ports: PortAllocator,
    policy: LaunchPolicy,
}

impl ContainerLauncher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        sql: Arc<dyn SqlClient>,
        volumes: Arc<dyn VolumeTool>,
        ports: PortAllocator,
    ) -> Self {
        Self { runtime, sql, volumes, ports, policy: LaunchPolicy::default() }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: LaunchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Find the data directory on `volume`: either the volume root or a
    /// `pgdata` subdirectory holds the version marker.
    pub async fn detect_layout(&self, volume: &Path) -> Result<DataLayout> {
        if self.volumes.file_exists(&volume.join(VERSION_MARKER)).await {
            return Ok(DataLayout { pgdata: CONTAINER_DATA_ROOT.to_string() });
        }
        if self.volumes.file_exists(&volume.join("pgdata").join(VERSION_MARKER)).await {
            return Ok(DataLayout { pgdata: format!("{}/pgdata", CONTAINER_DATA_ROOT) });
        }
        Err(SnapError::config(format!(
            "No {} found in {} or its pgdata subdirectory",
            VERSION_MARKER,
            volume.display()
        )))
    }

    /// Launch and reconcile a clone container.
    ///
    /// # Errors
    /// * `ConfigurationError` - no data directory on the volume
    /// * `ResourceExhausted` - no free host port
    /// * `DependencyFailed` - sequence resync or anonymization failed; the
    ///   container has been removed
    #[instrument(skip_all, fields(container = %req.container_name, volume = %req.volume.display()))]
    pub async fn launch(
        &self,
        req: &LaunchRequest<'_>,
        config: &CloneConfig,
        recorder: &mut StepRecorder,
    ) -> Result<LaunchResult> {
        let layout = self.detect_layout(req.volume).await?;
        let mut warnings = Vec::new();

        if req.remove_existing {
            self.runtime.remove(req.container_name).await?;
        }
        self.runtime.ensure_network(&config.network_name).await?;

        let host_port = recorder
            .step("container_run", self.start_container(req, config, &layout))
            .await?;

        let target =
            SqlTarget::new(req.container_name, &config.postgres_user, &config.postgres_db);

        let readiness = recorder.observe("readiness_wait", self.wait_ready(&target)).await;
        warnings.extend(readiness);

        let (disabled, sub_warnings) =
            recorder.observe("disable_subscriptions", self.disable_subscriptions(&target)).await;
        warnings.extend(sub_warnings);

        if let Err(e) = recorder.step("sequence_resync", self.resync_sequences(&target)).await {
            self.teardown(req.container_name).await;
            return Err(SnapError::dependency_failed("sequence_resync", e.to_string()));
        }

        let anonymize = match &config.anonymize_script {
            Some(script) => {
                match recorder.step("anonymize", self.anonymize(&target, script)).await {
                    Ok(output) => AnonymizeOutcome { ran: true, output: Some(output) },
                    Err(e) => {
                        self.teardown(req.container_name).await;
                        return Err(SnapError::dependency_failed("anonymize", e.to_string()));
                    }
                }
            }
            None => AnonymizeOutcome::default(),
        };

        info!(port = host_port, pgdata = %layout.pgdata, "Container launched");
        Ok(LaunchResult {
            container_name: req.container_name.to_string(),
            host_port,
            data_dir_in_container: layout.pgdata,
            anonymize,
            disabled_subscriptions: disabled,
            warnings,
        })
    }

    fn run_spec(
        &self,
        req: &LaunchRequest<'_>,
        config: &CloneConfig,
        layout: &DataLayout,
        host_port: u16,
    ) -> RunSpec {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_SYSTEM.to_string(), SYSTEM_VALUE.to_string());
        labels.insert(LABEL_ROLE.to_string(), ROLE_CLONE.to_string());
        labels.insert(LABEL_MAIN.to_string(), config.main_data_dir.clone());
        if let Some(desc) = req.description.filter(|d| !d.is_empty()) {
            labels.insert(LABEL_DESCRIPTION.to_string(), desc.to_string());
        }

        RunSpec {
            name: req.container_name.to_string(),
            image: config.postgres_image.clone(),
            network: Some(config.network_name.clone()),
            ports: vec![PortBinding { container_port: ENGINE_PORT, host_port }],
            env: vec![
                ("POSTGRES_USER".into(), config.postgres_user.clone()),
                ("POSTGRES_PASSWORD".into(), config.postgres_password.clone()),
                ("POSTGRES_DB".into(), config.postgres_db.clone()),
                ("PGDATA".into(), layout.pgdata.clone()),
            ],
            volumes: vec![Mount {
                source: req.volume.to_path_buf(),
                destination: CONTAINER_DATA_ROOT.to_string(),
            }],
            labels,
            args: vec!["-c".into(), DISABLE_REPLICATION_WORKERS.into()],
        }
    }

    /// Start the container, reallocating the port after a lost bind race.
    async fn start_container(
        &self,
        req: &LaunchRequest<'_>,
        config: &CloneConfig,
        layout: &DataLayout,
    ) -> Result<u16> {
        let mut port = match req.port_hint {
            Some(p) => p,
            None => self.ports.find_free_port(config.host_port, config.port_probe_attempts).await?,
        };

        let mut attempt = 1;
        loop {
            let spec = self.run_spec(req, config, layout, port);
            match self.runtime.run(&spec).await {
                Ok(()) => return Ok(port),
                Err(e) => {
                    // A failed start can leave a created-but-stopped container;
                    // a name clash means the container is someone else's.
                    if !runtime::is_name_conflict(&e) {
                        self.teardown(req.container_name).await;
                    }

                    let retry = req.port_hint.is_none()
                        && attempt < self.policy.bind_attempts
                        && runtime::is_port_conflict(&e);
                    if !retry {
                        return Err(e);
                    }

                    obs_metrics::record_port_conflict();
                    warn!(port, attempt, "Host port taken at bind time, reallocating");
                    let next = port.checked_add(1).ok_or_else(|| SnapError::ResourceExhausted {
                        reason: "Host port range exhausted".to_string(),
                    })?;
                    port = self.ports.find_free_port(next, config.port_probe_attempts).await?;
                    attempt += 1;
                }
            }
        }
    }

    /// Poll readiness, then liveness. Never fails; exceeded bounds become
    /// warnings.
    async fn wait_ready(&self, target: &SqlTarget) -> Vec<StepOutcome> {
        let mut outcomes = Vec::with_capacity(2);

        let mut ready = false;
        for attempt in 1..=self.policy.ready_attempts {
            if self.sql.is_ready(target).await {
                debug!(attempt, "Engine accepting connections");
                ready = true;
                break;
            }
            if attempt < self.policy.ready_attempts {
                tokio::time::sleep(self.policy.probe_interval).await;
            }
        }
        if ready {
            outcomes.push(StepOutcome::ok("readiness"));
        } else {
            warn!(container = %target.container, "Engine not ready after polling; continuing");
            outcomes.push(StepOutcome::ignored(
                "readiness",
                format!("not ready after {} probes", self.policy.ready_attempts),
            ));
        }

        let mut alive = false;
        for attempt in 1..=self.policy.liveness_attempts {
            if self.is_alive(&target.container).await {
                alive = true;
                break;
            }
            if attempt < self.policy.liveness_attempts {
                tokio::time::sleep(self.policy.probe_interval).await;
            }
        }
        if alive {
            outcomes.push(StepOutcome::ok("liveness"));
        } else {
            warn!(container = %target.container, "Container not running or exec failing; continuing");
            outcomes.push(StepOutcome::ignored(
                "liveness",
                format!("not alive after {} probes", self.policy.liveness_attempts),
            ));
        }

        outcomes
    }

    async fn is_alive(&self, container: &str) -> bool {
        match self.runtime.inspect(container).await {
            Ok(Some(info)) if info.running => self
                .runtime
                .exec(container, &["true".to_string()])
                .await
                .map(|o| o.success())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Disable every inbound subscription and detach it from its slot.
    /// Best-effort per subscription.
    async fn disable_subscriptions(&self, target: &SqlTarget) -> (Vec<String>, Vec<StepOutcome>) {
        let rows = match self.sql.query_rows(target, LIST_SUBSCRIPTIONS_SQL).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Failed to list subscriptions");
                return (
                    Vec::new(),
                    vec![StepOutcome::ignored("list_subscriptions", e.to_string())],
                );
            }
        };

        let mut disabled = Vec::new();
        let mut outcomes = Vec::new();
        for row in rows {
            let name = sql::field_str(&row, 0);
            if name.is_empty() {
                continue;
            }
            let db = sql::field_str(&row, 1);
            let sub_target = SqlTarget {
                db: if db.is_empty() { target.db.clone() } else { db },
                ..target.clone()
            };
            let ident = quote_ident(&name);
            let stmt = format!(
                "ALTER SUBSCRIPTION {ident} DISABLE; ALTER SUBSCRIPTION {ident} SET (slot_name = NONE);"
            );
            let step = format!("disable_subscription:{}", name);
            match self.sql.execute(&sub_target, &stmt).await {
                Ok(_) => {
                    info!(subscription = %name, "Subscription disabled");
                    outcomes.push(StepOutcome::ok(step));
                    disabled.push(name);
                }
                Err(e) => {
                    warn!(subscription = %name, error = %e, "Failed to disable subscription");
                    outcomes.push(StepOutcome::ignored(step, e.to_string()));
                }
            }
        }
        (disabled, outcomes)
    }

    async fn resync_sequences(&self, target: &SqlTarget) -> Result<()> {
        self.sql.execute(target, SEQUENCE_RESYNC_SQL).await?;
        debug!("Sequences resynchronized");
        Ok(())
    }

    /// Copy the script in and run it, each with bounded retries.
    async fn anonymize(&self, target: &SqlTarget, script: &Path) -> Result<String> {
        let attempts = self.policy.anonymize_attempts.max(1);

        let mut copied = Err(SnapError::Internal("anonymization script not copied".into()));
        for attempt in 1..=attempts {
            copied = self.runtime.copy_into(&target.container, script, ANONYMIZE_SCRIPT_PATH).await;
            match &copied {
                Ok(()) => break,
                Err(e) => warn!(attempt, error = %e, "Copying anonymization script failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.anonymize_backoff).await;
            }
        }
        copied?;

        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.sql.execute_file(target, ANONYMIZE_SCRIPT_PATH).await {
                Ok(output) => {
                    info!(attempt, "Anonymization script completed");
                    return Ok(output.trim().to_string());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Anonymization script failed");
                    last_err = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.anonymize_backoff).await;
            }
        }
        Err(last_err.unwrap_or_else(|| SnapError::Internal("anonymization never ran".into())))
    }

    /// Force-remove a container, logging instead of failing.
    pub async fn teardown(&self, container: &str) {
        if let Err(e) = self.runtime.remove(container).await {
            warn!(container, error = %e, "Failed to remove container during teardown");
        }
    }
}
