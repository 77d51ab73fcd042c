//! Mount tables of the discovered mount namespaces

use std::collections::BTreeMap;
use std::fs;

use nsweep_core::{NamespaceId, NamespaceType, Result};
use tracing::debug;

use super::{DiscoveryContext, DiscoveryResult};
use crate::gateway::MountGateway;
use crate::mountinfo::{self, MountInfo};

/// Read the mount table of every reachable mount namespace.
pub(crate) fn discover_mounts(ctx: &mut DiscoveryContext, result: &mut DiscoveryResult) -> Result<()> {
    let mut mounts = BTreeMap::new();
    let ids: Vec<NamespaceId> = result.namespaces.of_type(NamespaceType::Mount).keys().copied().collect();

    for id in ids {
        ctx.check_deadline("mounts")?;
        let Some(namespace) = result.namespaces.get(NamespaceType::Mount, id) else {
            continue;
        };
        let gateway = match MountGateway::for_namespace(namespace, &result.processes, ctx.options.sandbox_timeout) {
            Ok(gateway) => gateway,
            Err(e) => {
                debug!(%id, error = %e, "Mount namespace unreachable");
                if !ctx.diagnostics.unreachable_mount_namespaces.contains(&id) {
                    ctx.diagnostics.unreachable_mount_namespaces.push(id);
                }
                continue;
            }
        };
        ctx.diagnostics.sandboxes_spawned += gateway.spawned();
        let table = fs::read(gateway.mountinfo_path());
        gateway.close();
        match table {
            Ok(table) => {
                let entries: Vec<MountInfo> = mountinfo::parse(&table);
                debug!(%id, mounts = entries.len(), "Read mount table");
                mounts.insert(id, entries);
            }
            Err(e) => ctx.note(format!("no mount table for mnt namespace {id}: {e}")),
        }
    }

    result.mounts = mounts;
    Ok(())
}
