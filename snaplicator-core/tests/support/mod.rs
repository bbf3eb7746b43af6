//! In-memory adapters shared by the integration tests.
//!
//! Each fake keeps its state behind a mutex, records what it was asked to do
//! and can be told to fail specific operations.

#![allow(dead_code)]

use async_trait::async_trait;
use snaplicator_core::clock::FixedClock;
use snaplicator_core::exec::CommandOutput;
use snaplicator_core::metadata::METADATA_FILE;
use snaplicator_core::ports::ListenerProbe;
use snaplicator_core::runtime::{ContainerInfo, ContainerRuntime, Mount, PortBinding, RunSpec};
use snaplicator_core::sql::{parse_rows, Row, SqlClient, SqlTarget, FIELD_SEPARATOR};
use snaplicator_core::types::SubvolumeInfo;
use snaplicator_core::volume::VolumeTool;
use snaplicator_core::{
    Backends, CloneConfig, CloneOrchestrator, LaunchPolicy, Result, SnapError, SnapshotManager,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const ROOT: &str = "/srv/snaplicator-test";
pub const MAIN: &str = "pgmain";
pub const MAIN_CONTAINER: &str = "pgmain-replica";

fn failed(program: &str, stderr: impl Into<String>) -> SnapError {
    SnapError::CommandFailed { program: program.to_string(), code: Some(1), stderr: stderr.into() }
}

// ============================================================================
// Volumes
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Dir,
    Subvolume { readonly: bool },
    File(String),
}

#[derive(Default)]
struct VolumeState {
    nodes: BTreeMap<PathBuf, Node>,
    owners: HashMap<PathBuf, String>,
    xattrs: HashMap<(PathBuf, String), String>,
    sizes: HashMap<PathBuf, u64>,
    mounted: HashSet<PathBuf>,
    /// (operation, path the failure is limited to)
    failures: Vec<(String, Option<PathBuf>)>,
    calls: Vec<String>,
}

impl VolumeState {
    fn check(&self, op: &str, path: &Path) -> Result<()> {
        let hit = self
            .failures
            .iter()
            .any(|(o, p)| o == op && p.as_deref().map_or(true, |p| p == path));
        if hit {
            return Err(failed("btrfs", format!("{} failed on {}", op, path.display())));
        }
        Ok(())
    }

    /// `path` and everything below it.
    fn subtree(&self, path: &Path) -> Vec<(PathBuf, Node)> {
        self.nodes
            .iter()
            .filter(|(p, _)| p.starts_with(path))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect()
    }

    fn remove_subtree(&mut self, path: &Path) -> Vec<(PathBuf, Node)> {
        let tree = self.subtree(path);
        for (p, _) in &tree {
            self.nodes.remove(p);
        }
        tree
    }
}

fn rebase(path: &Path, from: &Path, to: &Path) -> PathBuf {
    match path.strip_prefix(from) {
        Ok(rel) if !rel.as_os_str().is_empty() => to.join(rel),
        _ => to.to_path_buf(),
    }
}

/// Copy-on-write filesystem held in memory.
#[derive(Default)]
pub struct FakeVolumes {
    state: Mutex<VolumeState>,
}

impl FakeVolumes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        self.state.lock().unwrap().nodes.insert(path.as_ref().to_path_buf(), Node::Dir);
    }

    pub fn add_subvolume(&self, path: impl AsRef<Path>) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(path.as_ref().to_path_buf(), Node::Subvolume { readonly: false });
    }

    pub fn add_file(&self, path: impl AsRef<Path>, contents: &str) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(path.as_ref().to_path_buf(), Node::File(contents.to_string()));
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        self.state.lock().unwrap().remove_subtree(path.as_ref());
    }

    pub fn set_mounted(&self, path: impl AsRef<Path>) {
        self.state.lock().unwrap().mounted.insert(path.as_ref().to_path_buf());
    }

    pub fn set_size(&self, path: impl AsRef<Path>, bytes: u64) {
        self.state.lock().unwrap().sizes.insert(path.as_ref().to_path_buf(), bytes);
    }

    /// Fail every call of `op`.
    pub fn fail(&self, op: &str) {
        self.state.lock().unwrap().failures.push((op.to_string(), None));
    }

    /// Fail `op` only when its first path argument is `path`.
    pub fn fail_at(&self, op: &str, path: impl AsRef<Path>) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((op.to_string(), Some(path.as_ref().to_path_buf())));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn has(&self, path: impl AsRef<Path>) -> bool {
        self.state.lock().unwrap().nodes.contains_key(path.as_ref())
    }

    pub fn is_subvolume_at(&self, path: impl AsRef<Path>) -> bool {
        matches!(self.state.lock().unwrap().nodes.get(path.as_ref()), Some(Node::Subvolume { .. }))
    }

    pub fn is_readonly(&self, path: impl AsRef<Path>) -> bool {
        matches!(
            self.state.lock().unwrap().nodes.get(path.as_ref()),
            Some(Node::Subvolume { readonly: true })
        )
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        match self.state.lock().unwrap().nodes.get(path.as_ref()) {
            Some(Node::File(contents)) => Some(contents.clone()),
            _ => None,
        }
    }

    pub fn owner(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state.lock().unwrap().owners.get(path.as_ref()).cloned()
    }

    /// Every mutating call made so far, as `op path`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(op)).count()
    }
}

#[async_trait]
impl VolumeTool for FakeVolumes {
    async fn is_subvolume(&self, path: &Path) -> bool {
        matches!(self.state.lock().unwrap().nodes.get(path), Some(Node::Subvolume { .. }))
    }

    async fn subvolume_info(&self, path: &Path) -> Result<SubvolumeInfo> {
        match self.state.lock().unwrap().nodes.get(path) {
            Some(Node::Subvolume { readonly }) => Ok(SubvolumeInfo { readonly: *readonly }),
            _ => Err(failed("btrfs", format!("not a subvolume: {}", path.display()))),
        }
    }

    async fn snapshot(&self, src: &Path, dst: &Path, readonly: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("snapshot", src)?;
        if !matches!(state.nodes.get(src), Some(Node::Subvolume { .. })) {
            return Err(failed("btrfs", format!("not a subvolume: {}", src.display())));
        }
        if state.nodes.contains_key(dst) {
            return Err(failed("btrfs", format!("target exists: {}", dst.display())));
        }
        for (path, node) in state.subtree(src) {
            let (key, copied) = if path == src {
                (dst.to_path_buf(), Node::Subvolume { readonly })
            } else {
                (rebase(&path, src, dst), node)
            };
            state.nodes.insert(key, copied);
        }
        state.calls.push(format!("snapshot {} {}", src.display(), dst.display()));
        Ok(())
    }

    async fn set_readonly(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("set_readonly", path)?;
        match state.nodes.get_mut(path) {
            Some(Node::Subvolume { readonly }) => *readonly = true,
            _ => return Err(failed("btrfs", format!("not a subvolume: {}", path.display()))),
        }
        state.calls.push(format!("set_readonly {}", path.display()));
        Ok(())
    }

    async fn delete_subvolume(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("delete_subvolume", path)?;
        if !matches!(state.nodes.get(path), Some(Node::Subvolume { .. })) {
            return Err(failed("btrfs", format!("not a subvolume: {}", path.display())));
        }
        state.remove_subtree(path);
        state.calls.push(format!("delete_subvolume {}", path.display()));
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        self.state.lock().unwrap().nodes.contains_key(path)
    }

    async fn file_exists(&self, path: &Path) -> bool {
        matches!(self.state.lock().unwrap().nodes.get(path), Some(Node::File(_)))
    }

    async fn is_mounted(&self, path: &Path) -> Result<bool> {
        Ok(self.state.lock().unwrap().mounted.contains(path))
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if !state.nodes.contains_key(dir) {
            return Err(failed("ls", format!("no such directory: {}", dir.display())));
        }
        Ok(state
            .nodes
            .iter()
            .filter(|(p, n)| p.parent() == Some(dir) && !matches!(n, Node::File(_)))
            .filter_map(|(p, _)| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }

    async fn chown_recursive(&self, path: &Path, owner: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("chown", path)?;
        state.owners.insert(path.to_path_buf(), owner.to_string());
        state.calls.push(format!("chown {} {}", owner, path.display()));
        Ok(())
    }

    async fn chmod_recursive(&self, path: &Path, mode: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("chmod", path)?;
        state.calls.push(format!("chmod {} {}", mode, path.display()));
        Ok(())
    }

    async fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("move_path", from)?;
        if !state.nodes.contains_key(from) {
            return Err(failed("mv", format!("no such path: {}", from.display())));
        }
        if state.nodes.contains_key(to) {
            return Err(failed("mv", format!("target exists: {}", to.display())));
        }
        for (path, node) in state.remove_subtree(from) {
            state.nodes.insert(rebase(&path, from, to), node);
        }
        if let Some(owner) = state.owners.remove(from) {
            state.owners.insert(to.to_path_buf(), owner);
        }
        state.calls.push(format!("move_path {} {}", from.display(), to.display()));
        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("write_file", path)?;
        state.nodes.insert(path.to_path_buf(), Node::File(String::from_utf8_lossy(contents).into_owned()));
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<String> {
        let state = self.state.lock().unwrap();
        state.check("read_file", path)?;
        match state.nodes.get(path) {
            Some(Node::File(contents)) => Ok(contents.clone()),
            _ => Err(failed("cat", format!("no such file: {}", path.display()))),
        }
    }

    async fn set_xattr(&self, path: &Path, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.check("set_xattr", path)?;
        state.xattrs.insert((path.to_path_buf(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn get_xattr(&self, path: &Path, key: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.xattrs.get(&(path.to_path_buf(), key.to_string())).cloned())
    }

    async fn disk_usage(&self, path: &Path) -> Option<u64> {
        self.state.lock().unwrap().sizes.get(path).copied()
    }
}

// ============================================================================
// Containers
// ============================================================================

#[derive(Default)]
struct RuntimeState {
    containers: BTreeMap<String, ContainerInfo>,
    networks: HashSet<String>,
    runs: Vec<RunSpec>,
    removed: Vec<String>,
    execs: Vec<(String, Vec<String>)>,
    copies: Vec<(String, PathBuf, String)>,
    run_failures: VecDeque<SnapError>,
    copy_failures: u32,
    copy_attempts: u32,
    image_user: Option<String>,
    /// Names another client takes as soon as they are freed.
    squatted: HashSet<String>,
}

/// One-shot pause point inside `inspect`.
#[derive(Default)]
pub struct Gate {
    /// Signalled once the paused call has read its answer.
    pub reached: Notify,
    pub resume: Notify,
}

/// Container engine held in memory.
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            state: Mutex::new(RuntimeState {
                image_user: Some("999:999".to_string()),
                ..RuntimeState::default()
            }),
            gates: Mutex::new(HashMap::new()),
        }
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: ContainerInfo) {
        self.state.lock().unwrap().containers.insert(info.name.clone(), info);
    }

    /// A running container with `source` mounted at the data root.
    pub fn insert_with_mount(&self, name: &str, source: impl AsRef<Path>, host_port: Option<u16>) {
        self.insert(ContainerInfo {
            name: name.to_string(),
            running: true,
            started_at: Some("2025-01-01T00:00:00Z".to_string()),
            mounts: vec![Mount {
                source: source.as_ref().to_path_buf(),
                destination: snaplicator_core::launcher::CONTAINER_DATA_ROOT.to_string(),
            }],
            ports: host_port
                .map(|p| vec![PortBinding { container_port: 5432, host_port: p }])
                .unwrap_or_default(),
            labels: BTreeMap::new(),
        });
    }

    /// Make the next `run` fail with `err`.
    pub fn fail_next_run(&self, err: SnapError) {
        self.state.lock().unwrap().run_failures.push_back(err);
    }

    pub fn port_conflict() -> SnapError {
        failed(
            "docker",
            "Bind for 0.0.0.0:5432 failed: port is already allocated",
        )
    }

    pub fn name_conflict(name: &str) -> SnapError {
        failed(
            "docker",
            format!("Conflict. The container name \"/{}\" is already in use by container \"abc\"", name),
        )
    }

    /// Let someone else create `name` right after it is next removed.
    pub fn squat_on_remove(&self, name: &str) {
        self.state.lock().unwrap().squatted.insert(name.to_string());
    }

    /// Pause the next `inspect` of `name` after it has read the container
    /// table, until the gate's `resume` is notified.
    pub fn pause_inspect(&self, name: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates.lock().unwrap().insert(name.to_string(), gate.clone());
        gate
    }

    pub fn fail_copies(&self, times: u32) {
        self.state.lock().unwrap().copy_failures = times;
    }

    /// `None` makes user detection fail.
    pub fn set_image_user(&self, user: Option<&str>) {
        self.state.lock().unwrap().image_user = user.map(String::from);
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.state.lock().unwrap().containers.keys().cloned().collect()
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn copy_attempts(&self) -> u32 {
        self.state.lock().unwrap().copy_attempts
    }

    pub fn copies(&self) -> Vec<(String, PathBuf, String)> {
        self.state.lock().unwrap().copies.clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list(&self, labels: &[(&str, &str)]) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .values()
            .filter(|c| labels.iter().all(|(k, v)| c.label(k) == Some(*v)))
            .map(|c| c.name.clone())
            .collect())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let info = self.state.lock().unwrap().containers.get(name).cloned();
        let gate = self.gates.lock().unwrap().remove(name);
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.resume.notified().await;
        }
        Ok(info)
    }

    async fn run(&self, spec: &RunSpec) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.runs.push(spec.clone());
        if state.containers.contains_key(&spec.name) {
            return Err(FakeRuntime::name_conflict(&spec.name));
        }

        let mut info = ContainerInfo {
            name: spec.name.clone(),
            running: true,
            started_at: Some("2025-01-01T12:00:05Z".to_string()),
            mounts: spec.volumes.clone(),
            ports: spec.ports.clone(),
            labels: spec.labels.clone(),
        };
        if let Some(err) = state.run_failures.pop_front() {
            // The engine creates the container before binding ports.
            info.running = false;
            info.ports.clear();
            state.containers.insert(spec.name.clone(), info);
            return Err(err);
        }
        state.containers.insert(spec.name.clone(), info);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.containers.remove(name).is_some() {
            state.removed.push(name.to_string());
        }
        if state.squatted.remove(name) {
            state.containers.insert(
                name.to_string(),
                ContainerInfo {
                    name: name.to_string(),
                    running: true,
                    started_at: None,
                    mounts: Vec::new(),
                    ports: Vec::new(),
                    labels: BTreeMap::new(),
                },
            );
        }
        Ok(())
    }

    async fn exec(&self, name: &str, cmd: &[String]) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.execs.push((name.to_string(), cmd.to_vec()));
        match state.containers.get(name) {
            Some(c) if c.running => Ok(CommandOutput::ok("")),
            _ => Ok(CommandOutput::failed(1, format!("container {} is not running", name))),
        }
    }

    async fn copy_into(&self, name: &str, src: &Path, dest: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.copy_attempts += 1;
        if state.copy_failures > 0 {
            state.copy_failures -= 1;
            return Err(failed("docker", "Error response from daemon: container is restarting"));
        }
        state.copies.push((name.to_string(), src.to_path_buf(), dest.to_string()));
        Ok(())
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().networks.insert(name.to_string());
        Ok(())
    }

    async fn image_user(&self, image: &str, _user: &str) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .image_user
            .clone()
            .ok_or_else(|| failed("docker", format!("Unable to find image '{}' locally", image)))
    }
}

// ============================================================================
// SQL
// ============================================================================

#[derive(Default)]
struct SqlState {
    /// First rule whose pattern occurs in the statement answers it.
    rules: Vec<(String, std::result::Result<String, String>)>,
    executed: Vec<(SqlTarget, String)>,
    not_ready: bool,
    file_failures: u32,
    file_output: String,
    files: Vec<(SqlTarget, String)>,
}

/// Scripted SQL endpoint.
#[derive(Default)]
pub struct FakeSql {
    state: Mutex<SqlState>,
}

/// Encode rows the way the psql client prints them.
pub fn rows(rows: &[&[&str]]) -> String {
    rows.iter()
        .map(|r| r.join(&FIELD_SEPARATOR.to_string()))
        .collect::<Vec<_>>()
        .join("\n")
}

impl FakeSql {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer statements containing `pattern` with `stdout`.
    pub fn respond(&self, pattern: &str, stdout: impl Into<String>) {
        self.state.lock().unwrap().rules.push((pattern.to_string(), Ok(stdout.into())));
    }

    /// Fail statements containing `pattern`.
    pub fn fail_on(&self, pattern: &str, stderr: &str) {
        self.state.lock().unwrap().rules.push((pattern.to_string(), Err(stderr.to_string())));
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().unwrap().not_ready = !ready;
    }

    pub fn fail_files(&self, times: u32) {
        self.state.lock().unwrap().file_failures = times;
    }

    pub fn set_file_output(&self, output: &str) {
        self.state.lock().unwrap().file_output = output.to_string();
    }

    pub fn executed(&self) -> Vec<(SqlTarget, String)> {
        self.state.lock().unwrap().executed.clone()
    }

    /// Statements containing `pattern`, with their targets.
    pub fn executed_matching(&self, pattern: &str) -> Vec<(SqlTarget, String)> {
        self.executed().into_iter().filter(|(_, sql)| sql.contains(pattern)).collect()
    }

    pub fn files(&self) -> Vec<(SqlTarget, String)> {
        self.state.lock().unwrap().files.clone()
    }

    fn answer(&self, target: &SqlTarget, sql: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.executed.push((target.clone(), sql.to_string()));
        let rule = state.rules.iter().find(|(pattern, _)| sql.contains(pattern.as_str()));
        match rule {
            Some((_, Ok(stdout))) => Ok(stdout.clone()),
            Some((_, Err(stderr))) => Err(failed("psql", stderr.clone())),
            None => Ok(String::new()),
        }
    }
}

#[async_trait]
impl SqlClient for FakeSql {
    async fn execute(&self, target: &SqlTarget, sql: &str) -> Result<String> {
        self.answer(target, sql)
    }

    async fn query_rows(&self, target: &SqlTarget, sql: &str) -> Result<Vec<Row>> {
        Ok(parse_rows(&self.answer(target, sql)?))
    }

    async fn execute_file(&self, target: &SqlTarget, path: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.files.push((target.clone(), path.to_string()));
        if state.file_failures > 0 {
            state.file_failures -= 1;
            return Err(failed("psql", "ERROR:  deadlock detected"));
        }
        Ok(state.file_output.clone())
    }

    async fn is_ready(&self, _target: &SqlTarget) -> bool {
        !self.state.lock().unwrap().not_ready
    }
}

// ============================================================================
// Ports
// ============================================================================

/// Listener table with a settable set of busy ports.
#[derive(Default)]
pub struct FakeProbe {
    busy: Mutex<HashSet<u16>>,
}

impl FakeProbe {
    pub fn busy(&self, ports: &[u16]) {
        self.busy.lock().unwrap().extend(ports.iter().copied());
    }
}

#[async_trait]
impl ListenerProbe for FakeProbe {
    async fn listening_ports(&self) -> Result<HashSet<u16>> {
        Ok(self.busy.lock().unwrap().clone())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// All fakes wired together around one root with one main volume.
pub struct Harness {
    pub volumes: Arc<FakeVolumes>,
    pub runtime: Arc<FakeRuntime>,
    pub sql: Arc<FakeSql>,
    pub probe: Arc<FakeProbe>,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    /// Root directory plus a main subvolume holding `pgdata/PG_VERSION`.
    pub fn new() -> Self {
        let harness = Self {
            volumes: Arc::new(FakeVolumes::new()),
            runtime: Arc::new(FakeRuntime::new()),
            sql: Arc::new(FakeSql::new()),
            probe: Arc::new(FakeProbe::default()),
            clock: Arc::new(FixedClock::at(2025, 1, 1, 12, 0, 0)),
        };
        harness.volumes.add_dir(ROOT);
        harness.volumes.add_subvolume(main_path());
        harness.volumes.add_dir(main_path().join("pgdata"));
        harness.volumes.add_file(main_path().join("pgdata").join("PG_VERSION"), "17\n");
        harness
    }

    /// Also run a replica container on the main volume.
    pub fn with_main_container(self) -> Self {
        self.runtime.insert_with_mount(MAIN_CONTAINER, main_path(), Some(5432));
        self
    }

    pub fn backends(&self) -> Backends {
        Backends {
            volumes: self.volumes.clone(),
            runtime: self.runtime.clone(),
            sql: self.sql.clone(),
            probe: self.probe.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn orchestrator(&self) -> CloneOrchestrator {
        CloneOrchestrator::new(&self.backends()).with_policy(LaunchPolicy::immediate())
    }

    pub fn snapshots(&self) -> SnapshotManager {
        SnapshotManager::new(self.volumes.clone(), self.clock.clone(), ROOT, MAIN)
    }

    pub fn config(&self) -> CloneConfig {
        CloneConfig {
            root_data_dir: PathBuf::from(ROOT),
            main_data_dir: MAIN.to_string(),
            container_base: "pgclone".to_string(),
            network_name: "snaplicator".to_string(),
            host_port: 5432,
            postgres_user: "postgres".to_string(),
            postgres_password: "secret".to_string(),
            postgres_db: "app".to_string(),
            postgres_image: "postgres:17".to_string(),
            anonymize_script: None,
            port_probe_attempts: 100,
            runtime_user: None,
        }
    }

    /// Current `YYYYMMDD-HHMMSS` stamp of the fake clock.
    pub fn stamp(&self) -> String {
        use snaplicator_core::clock::Clock;
        self.clock.timestamp()
    }
}

pub fn root() -> PathBuf {
    PathBuf::from(ROOT)
}

pub fn main_path() -> PathBuf {
    root().join(MAIN)
}

pub fn metadata_file(volume: impl AsRef<Path>) -> PathBuf {
    volume.as_ref().join(METADATA_FILE)
}
