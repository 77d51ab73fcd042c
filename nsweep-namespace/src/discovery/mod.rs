//! The discovery pipeline
//!
//! [`discover`] reads the process table and runs the enabled phases in a
//! fixed order over one [`DiscoveryResult`]:
//!
//! 1. namespaces joined by processes, with leader election
//! 2. namespaces held open by file descriptors
//! 3. namespaces bind-mounted anywhere reachable
//! 4. PID and user namespace hierarchies
//! 5. owning user namespaces
//!
//! Mount tables and the PID map are attached afterwards when requested.
//! Permission gaps are absorbed and counted in [`Diagnostics`]; only
//! contract violations ([`Error::is_fatal`]) abort a run.

mod bindmounts;
mod context;
mod fds;
mod hierarchy;
mod mounts;
mod ownership;
mod procs;

pub use context::Diagnostics;
pub(crate) use context::DiscoveryContext;

use std::collections::BTreeMap;
use std::path::Path;

use nsweep_core::{Error, NAMESPACE_TYPES, NamespaceId, NamespaceType, Result};
use serde::Serialize;
use serde::ser::{SerializeSeq, Serializer};
use tracing::{debug, info, info_span, warn};

use crate::config::DiscoverOptions;
use crate::containers::Container;
use crate::graph::AllNamespaces;
use crate::mountinfo::MountInfo;
use crate::namespace::Namespace;
use crate::ops;
use crate::pidmap::PidMap;
use crate::process::ProcessTable;

/// Order in which species are visited by per-species phases. User
/// namespaces come first so owners exist before the namespaces they own.
pub const DISCOVERY_SEQUENCE: [NamespaceType; NAMESPACE_TYPES] = [
    NamespaceType::User,
    NamespaceType::Pid,
    NamespaceType::Mount,
    NamespaceType::Cgroup,
    NamespaceType::Uts,
    NamespaceType::Ipc,
    NamespaceType::Net,
    NamespaceType::Time,
];

type PerTypeFn = fn(&mut DiscoveryContext, &mut DiscoveryResult, NamespaceType) -> Result<()>;
type OnceFn = fn(&mut DiscoveryContext, &mut DiscoveryResult) -> Result<()>;

#[derive(Clone, Copy)]
enum Step {
    PerType(PerTypeFn, &'static [NamespaceType]),
    Once(OnceFn),
}

struct Phase {
    name: &'static str,
    enabled: fn(&DiscoverOptions) -> bool,
    step: Step,
}

const PHASES: [Phase; 5] = [
    Phase {
        name: "processes",
        enabled: |o| o.scan_processes,
        step: Step::PerType(procs::discover_from_processes, &DISCOVERY_SEQUENCE),
    },
    Phase {
        name: "fds",
        enabled: |o| o.scan_fds,
        step: Step::Once(fds::discover_from_fds),
    },
    Phase {
        name: "bind mounts",
        enabled: |o| o.scan_bind_mounts,
        step: Step::Once(bindmounts::discover_from_bind_mounts),
    },
    Phase {
        name: "hierarchy",
        enabled: |o| o.discover_hierarchy,
        step: Step::PerType(
            hierarchy::discover_hierarchy,
            &[NamespaceType::User, NamespaceType::Pid],
        ),
    },
    Phase {
        name: "ownership",
        enabled: |o| o.discover_ownership,
        step: Step::PerType(ownership::discover_ownership, &DISCOVERY_SEQUENCE),
    },
];

/// Snapshot produced by one discovery run
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    options: DiscoverOptions,
    namespaces: AllNamespaces,
    processes: ProcessTable,
    own_namespaces: [Option<NamespaceId>; NAMESPACE_TYPES],
    #[serde(serialize_with = "serialize_mounts", skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) mounts: BTreeMap<NamespaceId, Vec<MountInfo>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) containers: Vec<Container>,
    #[serde(skip)]
    pid_map: Option<PidMap>,
    diagnostics: Diagnostics,
}

#[derive(Serialize)]
struct MountTable<'a> {
    mnt: &'a NamespaceId,
    mounts: &'a [MountInfo],
}

fn serialize_mounts<S: Serializer>(
    mounts: &BTreeMap<NamespaceId, Vec<MountInfo>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(mounts.len()))?;
    for (mnt, mounts) in mounts {
        seq.serialize_element(&MountTable { mnt, mounts })?;
    }
    seq.end()
}

impl DiscoveryResult {
    fn new(options: &DiscoverOptions, processes: ProcessTable) -> Self {
        let mut own_namespaces = [None; NAMESPACE_TYPES];
        for ns_type in options.enabled_types() {
            let path = Path::new("/proc/self/ns").join(ns_type.name());
            own_namespaces[ns_type.index()] = ops::namespace_id_of_path(&path).ok();
        }
        Self {
            options: options.clone(),
            namespaces: AllNamespaces::new(),
            processes,
            own_namespaces,
            mounts: BTreeMap::new(),
            containers: Vec::new(),
            pid_map: None,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Options the run was started with
    #[must_use]
    pub const fn options(&self) -> &DiscoverOptions {
        &self.options
    }

    /// The namespace graph
    #[must_use]
    pub const fn namespaces(&self) -> &AllNamespaces {
        &self.namespaces
    }

    /// Processes that survived the run
    #[must_use]
    pub const fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// Look up a namespace
    #[must_use]
    pub fn namespace(&self, ns_type: NamespaceType, id: NamespaceId) -> Option<&Namespace> {
        self.namespaces.get(ns_type, id)
    }

    /// Namespaces of one species ordered by identity
    #[must_use]
    pub fn sorted_namespaces(&self, ns_type: NamespaceType) -> Vec<&Namespace> {
        self.namespaces.of_type(ns_type).values().collect()
    }

    /// User or PID namespaces without a known parent
    #[must_use]
    pub fn roots(&self, ns_type: NamespaceType) -> Vec<&Namespace> {
        self.namespaces.roots(ns_type)
    }

    /// Namespace of the discovering process itself
    #[must_use]
    pub const fn own_namespace(&self, ns_type: NamespaceType) -> Option<NamespaceId> {
        self.own_namespaces[ns_type.index()]
    }

    /// Mount tables by mount namespace, when requested
    #[must_use]
    pub const fn mounts(&self) -> &BTreeMap<NamespaceId, Vec<MountInfo>> {
        &self.mounts
    }

    /// Containers linked to processes, when a containerizer was used
    #[must_use]
    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    /// PID translation map, when requested
    #[must_use]
    pub const fn pid_map(&self) -> Option<&PidMap> {
        self.pid_map.as_ref()
    }

    /// What the run had to skip
    #[must_use]
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub(crate) fn processes_mut(&mut self) -> &mut ProcessTable {
        &mut self.processes
    }
}

/// Run one discovery.
///
/// # Errors
/// Only contract violations ([`Error::KernelContract`], [`Error::Reparent`])
/// abort the run. Anything else ends up in [`DiscoveryResult::diagnostics`].
pub fn discover(options: &DiscoverOptions) -> Result<DiscoveryResult> {
    let span = info_span!("discovery");
    let _entered = span.enter();

    let mut ctx = DiscoveryContext::new(options);
    let processes = ProcessTable::from_procfs(&options.procfs);
    debug!(processes = processes.len(), "Read process table");
    let mut result = DiscoveryResult::new(options, processes);
    let types = options.enabled_types();

    for phase in &PHASES {
        if !(phase.enabled)(options) {
            continue;
        }
        let phase_span = info_span!("phase", name = phase.name);
        let _phase = phase_span.enter();
        let outcome = match phase.step {
            Step::Once(run) => {
                let ran = run(&mut ctx, &mut result);
                absorb(&mut ctx, phase.name, ran)
            }
            Step::PerType(run, restrict) => {
                let mut outcome = Ok(true);
                for ns_type in restrict.iter().copied().filter(|t| types.contains(t)) {
                    let ran = run(&mut ctx, &mut result, ns_type);
                    outcome = absorb(&mut ctx, phase.name, ran);
                    if !matches!(outcome, Ok(true)) {
                        break;
                    }
                }
                outcome
            }
        };
        if !outcome? {
            break;
        }
    }

    if options.discover_mounts && ctx.diagnostics.interrupted.is_none() {
        let outcome = mounts::discover_mounts(&mut ctx, &mut result);
        absorb(&mut ctx, "mounts", outcome)?;
    }
    if options.with_pid_map {
        let map = PidMap::new(&result.namespaces, &result.processes);
        ctx.diagnostics.pid_map_mismatches = map.skipped();
        result.pid_map = Some(map);
    }

    result.diagnostics = ctx.diagnostics;
    info!(
        namespaces = result.namespaces.len(),
        processes = result.processes.len(),
        interrupted = result.diagnostics.interrupted.is_some(),
        "Discovery complete"
    );
    Ok(result)
}

/// Sort a phase outcome: `Ok(true)` to go on, `Ok(false)` to stop after the
/// deadline expired, `Err` for fatal errors.
fn absorb(ctx: &mut DiscoveryContext, phase: &str, outcome: Result<()>) -> Result<bool> {
    match outcome {
        Ok(()) => Ok(true),
        Err(Error::DeadlineExceeded { phase }) => {
            warn!(phase, "Discovery deadline exceeded");
            ctx.diagnostics.interrupted = Some(phase.to_string());
            Ok(false)
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(phase, error = %e, "Discovery phase failed");
            ctx.note(format!("{phase}: {e}"));
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sequence_covers_every_type_once() {
        let mut seen = DISCOVERY_SEQUENCE.to_vec();
        seen.sort_by_key(|t| t.index());
        seen.dedup();
        assert_eq!(seen, NamespaceType::ALL);
        assert_eq!(DISCOVERY_SEQUENCE[0], NamespaceType::User);
    }

    #[test]
    fn test_absorb() {
        let mut ctx = DiscoveryContext::new(&DiscoverOptions::default());
        assert!(absorb(&mut ctx, "fds", Ok(())).unwrap());
        assert!(
            absorb(&mut ctx, "fds", Err(Error::Namespace { message: "gone".into() })).unwrap()
        );
        assert_eq!(ctx.diagnostics.notes.len(), 1);
        assert!(!absorb(&mut ctx, "fds", Err(Error::DeadlineExceeded { phase: "fds" })).unwrap());
        assert_eq!(ctx.diagnostics.interrupted.as_deref(), Some("fds"));
        assert!(
            absorb(&mut ctx, "hierarchy", Err(Error::KernelContract { message: "x".into() })).is_err()
        );
    }

    #[test]
    fn test_no_phases() {
        let result = discover(&DiscoverOptions::none()).unwrap();
        assert!(result.namespaces().is_empty());
        assert!(!result.processes().is_empty());
        assert!(result.pid_map().is_none());
    }

    #[test]
    fn test_own_namespaces_found() {
        let result = discover(&DiscoverOptions::standard().with_bind_mounts(false)).unwrap();
        let own_net = result.own_namespace(NamespaceType::Net).unwrap();
        assert!(result.namespace(NamespaceType::Net, own_net).is_some());
        let mine = result.processes().get(nsweep_core::ProcessId::current()).unwrap();
        assert_eq!(mine.namespace(NamespaceType::Net), Some(own_net));
        assert!(!result.roots(NamespaceType::User).is_empty());
    }

    #[test]
    fn test_deadline_interrupts() {
        let options = DiscoverOptions::standard().with_timeout(Duration::ZERO);
        let result = discover(&options).unwrap();
        assert_eq!(result.diagnostics().interrupted.as_deref(), Some("processes"));
    }

    #[test]
    fn test_result_serializes() {
        let result = discover(&DiscoverOptions::standard().with_bind_mounts(false)).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["namespaces"]["net"].as_array().is_some_and(|a| !a.is_empty()));
        assert!(json["processes"].is_object());
        assert!(json.get("mounts").is_none());
    }
}
