//! The set of adapters every component is built from.

use crate::clock::{Clock, SystemClock};
use crate::exec::Executor;
use crate::ports::{ListenerProbe, PortAllocator, SsProbe};
use crate::runtime::{ContainerRuntime, DockerRuntime};
use crate::sql::{PsqlClient, SqlClient};
use crate::volume::{BtrfsTool, VolumeTool};
use std::sync::Arc;

/// Shared handles to the external systems.
#[derive(Clone)]
pub struct Backends {
    pub volumes: Arc<dyn VolumeTool>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub sql: Arc<dyn SqlClient>,
    pub probe: Arc<dyn ListenerProbe>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Production adapters: btrfs, docker, psql through docker, ss.
    pub fn system(use_sudo: bool) -> Self {
        let exec = Executor::new(use_sudo);
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::new(exec.clone()));
        Self {
            volumes: Arc::new(BtrfsTool::new(exec.clone())),
            sql: Arc::new(PsqlClient::new(runtime.clone())),
            runtime,
            probe: Arc::new(SsProbe::new(exec)),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn port_allocator(&self) -> PortAllocator {
        PortAllocator::new(self.probe.clone())
    }
}
