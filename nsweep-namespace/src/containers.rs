//! Containers as reported by a container engine collaborator

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use nsweep_core::{NamespaceId, NamespaceType, ProcessId, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::config::DiscoverOptions;
use crate::discovery::{DiscoveryResult, discover};
use crate::pidmap::PidMap;
use crate::process::ProcessTable;

/// A container and the process it runs as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Engine-specific identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Engine that manages the container
    pub engine: String,
    /// Initial process PID as reported by the engine; 0 if not running
    pub pid: ProcessId,
    /// PID namespace the engine reports `pid` in; `None` for ours
    #[serde(default)]
    pub pid_namespace: Option<NamespaceId>,
    /// Whether the container is paused
    #[serde(default)]
    pub paused: bool,
    /// Engine labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// The linked process in our PID namespace, set by discovery
    #[serde(default)]
    pub process: Option<ProcessId>,
}

impl Container {
    /// Create a running container
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, engine: impl Into<String>, pid: ProcessId) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            engine: engine.into(),
            pid,
            pid_namespace: None,
            paused: false,
            labels: BTreeMap::new(),
            process: None,
        }
    }
}

/// Source of container information
///
/// Implementations talk to container engines; discovery only consumes
/// what they return.
///
/// # Thread Safety
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait Containerizer: Send + Sync {
    /// Containers currently known to the engine
    ///
    /// # Errors
    /// Returns error if the engine cannot be queried
    async fn containers(&self, processes: &ProcessTable, pid_map: Option<&PidMap>) -> Result<Vec<Container>>;
}

/// Containerizer returning a fixed list (for testing)
#[derive(Clone)]
pub struct MockContainerizer {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    containers: Vec<Container>,
    call_count: usize,
}

impl MockContainerizer {
    /// Create a mock reporting `containers`
    #[must_use]
    pub fn new(containers: Vec<Container>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                containers,
                call_count: 0,
            })),
        }
    }

    /// Number of queries made (for testing)
    pub async fn call_count(&self) -> usize {
        self.state.lock().await.call_count
    }
}

impl std::fmt::Debug for MockContainerizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockContainerizer").finish_non_exhaustive()
    }
}

#[async_trait]
impl Containerizer for MockContainerizer {
    async fn containers(&self, _processes: &ProcessTable, _pid_map: Option<&PidMap>) -> Result<Vec<Container>> {
        let mut state = self.state.lock().await;
        state.call_count += 1;
        tracing::debug!(count = state.containers.len(), "Mock: Listed containers");
        Ok(state.containers.clone())
    }
}

/// Link containers to the processes they run as.
///
/// PIDs reported in another PID namespace are translated into the PID
/// namespace of the discovering process when a PID map is available.
pub fn link_containers(result: &mut DiscoveryResult, mut containers: Vec<Container>) {
    let own_pidns = result.own_namespace(NamespaceType::Pid);
    let mut linked = 0;

    for container in &mut containers {
        if container.pid.as_raw() == 0 {
            continue;
        }
        let pid = match (container.pid_namespace, own_pidns, result.pid_map()) {
            (Some(from), Some(to), _) if from == to => Some(container.pid),
            (Some(from), Some(to), Some(map)) => map.translate(container.pid, from, to),
            (Some(_), _, _) => None,
            (None, _, _) => Some(container.pid),
        };
        let Some(pid) = pid else {
            trace!(container = %container.name, pid = %container.pid, "Cannot translate container PID");
            continue;
        };
        if let Some(process) = result.processes_mut().get_mut(pid) {
            process.container = Some(container.name.clone());
            container.process = Some(pid);
            linked += 1;
        }
    }

    debug!(containers = containers.len(), linked, "Linked containers");
    result.containers = containers;
}

/// Run discovery on a blocking task, then ask `containerizer` for
/// containers and link them to processes.
///
/// # Errors
/// Fatal discovery errors, task failures and containerizer errors.
pub async fn discover_with_containers(
    options: &DiscoverOptions,
    containerizer: Arc<dyn Containerizer>,
) -> Result<DiscoveryResult> {
    let options = options.clone();
    let mut result = tokio::task::spawn_blocking(move || discover(&options)).await??;
    let containers = containerizer
        .containers(result.processes(), result.pid_map())
        .await?;
    link_containers(&mut result, containers);
    Ok(result)
}
