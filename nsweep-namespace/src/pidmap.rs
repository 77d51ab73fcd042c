//! Translation of PIDs between PID namespaces

use std::collections::HashMap;
use std::sync::Arc;

use nsweep_core::{NamespaceId, NamespaceType, ProcessId};
use serde::Serialize;
use tracing::{debug, trace};

use crate::graph::AllNamespaces;
use crate::process::ProcessTable;

/// A PID as seen from one PID namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NamespacedPid {
    /// The PID namespace
    pub pidns: NamespaceId,
    /// The PID inside it
    pub pid: ProcessId,
}

/// Maps a PID in one PID namespace to the same process's PIDs in the
/// other PID namespaces it is visible in.
#[derive(Debug, Clone, Default)]
pub struct PidMap {
    map: HashMap<NamespacedPid, Arc<[NamespacedPid]>>,
    skipped: usize,
}

impl PidMap {
    /// Build the map from a finished discovery.
    ///
    /// Each process's `NSpid` list is paired with its PID namespace chain,
    /// outermost first. Processes where the two differ in length are left
    /// out; that happens when the hierarchy is only partly known.
    #[must_use]
    pub fn new(namespaces: &AllNamespaces, processes: &ProcessTable) -> Self {
        let mut map = HashMap::new();
        let mut skipped = 0;

        for process in processes.iter() {
            let Some(pidns) = process.namespace(NamespaceType::Pid) else {
                continue;
            };
            if process.nspid.is_empty() {
                continue;
            }
            let mut chain = namespaces.ancestors(NamespaceType::Pid, pidns);
            chain.reverse();
            chain.push(pidns);
            if chain.len() != process.nspid.len() {
                trace!(
                    pid = %process.pid,
                    nspid = process.nspid.len(),
                    chain = chain.len(),
                    "PID namespace chain does not match NSpid"
                );
                skipped += 1;
                continue;
            }
            let pids: Arc<[NamespacedPid]> = chain
                .into_iter()
                .zip(process.nspid.iter().copied())
                .map(|(pidns, pid)| NamespacedPid { pidns, pid })
                .collect();
            for namespaced in pids.iter() {
                map.insert(*namespaced, Arc::clone(&pids));
            }
        }

        debug!(entries = map.len(), skipped, "Built PID map");
        Self { map, skipped }
    }

    /// Translate `pid` from PID namespace `from` into PID namespace `to`.
    ///
    /// Returns `None` if the pair is unknown or the process is not visible
    /// in `to`.
    #[must_use]
    pub fn translate(&self, pid: ProcessId, from: NamespaceId, to: NamespaceId) -> Option<ProcessId> {
        self.map
            .get(&NamespacedPid { pidns: from, pid })?
            .iter()
            .find(|n| n.pidns == to)
            .map(|n| n.pid)
    }

    /// All PIDs of the process known as `pid` in `from`, outermost first
    #[must_use]
    pub fn namespaced_pids(&self, pid: ProcessId, from: NamespaceId) -> Option<&[NamespacedPid]> {
        self.map.get(&NamespacedPid { pidns: from, pid }).map(|pids| &**pids)
    }

    /// Number of (PID namespace, PID) pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the map is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Processes left out because their chain did not match
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Process;
    use nsweep_core::NamespaceRef;

    fn id(ino: u64) -> NamespaceId {
        NamespaceId::new(4, ino)
    }

    fn pid(raw: i32) -> ProcessId {
        ProcessId::from_raw(raw)
    }

    fn process(raw: i32, pidns: u64, nspid: &[i32]) -> Process {
        let mut p = Process::new(pid(raw), pid(1), "p", 0);
        p.namespaces[NamespaceType::Pid.index()] = Some(id(pidns));
        p.nspid = nspid.iter().copied().map(pid).collect();
        p
    }

    fn fixture() -> (AllNamespaces, ProcessTable) {
        let mut namespaces = AllNamespaces::new();
        for ino in [1, 2, 3] {
            namespaces.insert_new(NamespaceType::Pid, id(ino), NamespaceRef::empty());
        }
        namespaces.add_child(NamespaceType::Pid, id(1), id(2)).unwrap();
        namespaces.add_child(NamespaceType::Pid, id(2), id(3)).unwrap();
        let processes = ProcessTable::from_processes([
            process(1, 1, &[1]),
            process(500, 2, &[500, 1]),
            process(600, 3, &[600, 7, 1]),
            // NSpid says two levels, the graph knows three
            process(700, 3, &[700, 2]),
        ]);
        (namespaces, processes)
    }

    #[test]
    fn test_translate_both_directions() {
        let (namespaces, processes) = fixture();
        let map = PidMap::new(&namespaces, &processes);

        assert_eq!(map.translate(pid(600), id(1), id(3)), Some(pid(1)));
        assert_eq!(map.translate(pid(1), id(3), id(1)), Some(pid(600)));
        assert_eq!(map.translate(pid(7), id(2), id(3)), Some(pid(1)));
        assert_eq!(map.translate(pid(1), id(2), id(1)), Some(pid(500)));
        assert_eq!(map.translate(pid(1), id(1), id(1)), Some(pid(1)));
    }

    #[test]
    fn test_unknown_pairs() {
        let (namespaces, processes) = fixture();
        let map = PidMap::new(&namespaces, &processes);

        // not visible below its own namespace
        assert_eq!(map.translate(pid(500), id(1), id(3)), None);
        assert_eq!(map.translate(pid(42), id(1), id(2)), None);
        assert_eq!(map.translate(pid(600), id(2), id(1)), None);
    }

    #[test]
    fn test_mismatched_chain_skipped() {
        let (namespaces, processes) = fixture();
        let map = PidMap::new(&namespaces, &processes);
        assert_eq!(map.skipped(), 1);
        assert_eq!(map.translate(pid(700), id(1), id(3)), None);
        assert_eq!(map.len(), 1 + 2 + 3);

        let chain = map.namespaced_pids(pid(1), id(3)).unwrap();
        let pidns: Vec<NamespaceId> = chain.iter().map(|n| n.pidns).collect();
        assert_eq!(pidns, [id(1), id(2), id(3)]);
    }
}
