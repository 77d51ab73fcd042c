//! Namespaces joined by processes

use std::path::Path;

use nsweep_core::{NamespaceId, NamespaceRef, NamespaceType, ProcessId, Result};
use tracing::{debug, trace};

use super::{DiscoveryContext, DiscoveryResult};
use crate::graph::AllNamespaces;
use crate::ops;
use crate::process::ProcessTable;

/// Record the `ns_type` namespace of every process, then elect leaders.
///
/// Processes whose namespace cannot be read are dropped from the table,
/// except for time namespaces, which older kernels lack.
pub(crate) fn discover_from_processes(
    ctx: &mut DiscoveryContext,
    result: &mut DiscoveryResult,
    ns_type: NamespaceType,
) -> Result<()> {
    let procfs = ctx.options.procfs.clone();
    let mut unreadable = Vec::new();

    for pid in result.processes.pids() {
        ctx.check_deadline("processes")?;
        let path = procfs.join(pid.to_string()).join("ns").join(ns_type.name());
        let opened = ops::open_namespace(&path).and_then(|file| Ok((ops::namespace_id(&file)?, file)));
        let (id, file) = match opened {
            Ok(found) => found,
            Err(e) => {
                trace!(%pid, %ns_type, error = %e, "Cannot read namespace");
                unreadable.push(pid);
                continue;
            }
        };
        let (ns, created) = result
            .namespaces
            .insert_new(ns_type, id, NamespaceRef::empty());
        if created {
            trace!(%pid, %ns_type, %id, "New namespace");
        }
        if ns_type != NamespaceType::User && ns.owner_id().is_none() {
            if let Ok(owner) = ops::owner_id(&file) {
                ns.set_owner_id(owner);
            }
        }
        if let Some(process) = result.processes.get_mut(pid) {
            process.namespaces[ns_type.index()] = Some(id);
        }
    }

    let mut pruned = false;
    if ns_type != NamespaceType::Time {
        for pid in unreadable {
            if result.processes.remove(pid).is_some() {
                ctx.diagnostics.skipped_processes += 1;
                pruned = true;
            }
        }
    }

    // Dropped processes may have led namespaces of species scanned earlier.
    let mut elect = vec![ns_type];
    if pruned {
        elect.extend(
            NamespaceType::ALL
                .into_iter()
                .filter(|t| *t != ns_type && !result.namespaces.of_type(*t).is_empty()),
        );
    }
    for t in elect {
        elect_leaders(&result.processes, &mut result.namespaces, t);
        refresh_references(result, &procfs, t);
    }

    debug!(
        %ns_type,
        namespaces = result.namespaces.of_type(ns_type).len(),
        processes = result.processes.len(),
        "Scanned processes"
    );
    Ok(())
}

/// Point each namespace with a leader at its ealdorman's namespace file.
fn refresh_references(result: &mut DiscoveryResult, procfs: &Path, ns_type: NamespaceType) {
    let ids: Vec<NamespaceId> = result.namespaces.of_type(ns_type).keys().copied().collect();
    for id in ids {
        let ealdorman = result
            .namespaces
            .get(ns_type, id)
            .and_then(|n| n.ealdorman(&result.processes))
            .map(|p| p.pid);
        if let (Some(pid), Some(namespace)) = (ealdorman, result.namespaces.get_mut(ns_type, id)) {
            namespace.set_reference(NamespaceRef::new(
                procfs.join(pid.to_string()).join("ns").join(ns_type.name()),
            ));
        }
    }
}

/// Attach to each namespace the processes whose parent is not joined to it.
///
/// Earlier leaders are forgotten first, so only processes still in the
/// table lead.
pub(crate) fn elect_leaders(processes: &ProcessTable, namespaces: &mut AllNamespaces, ns_type: NamespaceType) {
    let ids: Vec<NamespaceId> = namespaces.of_type(ns_type).keys().copied().collect();
    for id in ids {
        if let Some(ns) = namespaces.get_mut(ns_type, id) {
            ns.clear_leaders();
        }
    }
    for process in processes.iter() {
        let Some(id) = process.namespace(ns_type) else {
            continue;
        };
        let mut leader: ProcessId = process.pid;
        let mut current = process;
        while let Some(parent) = processes.parent_of(current) {
            if parent.namespace(ns_type) != Some(id) {
                break;
            }
            leader = parent.pid;
            current = parent;
        }
        if let Some(ns) = namespaces.get_mut(ns_type, id) {
            ns.add_leader(leader);
        }
    }
}
