//! Namespaces kept alive by bind mounts, in every reachable mount namespace

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::Path;

use nsweep_core::{NamespaceId, NamespaceRef, NamespaceType, ProcessId, Result};
use tracing::{debug, trace, warn};

use super::{DiscoveryContext, DiscoveryResult};
use crate::gateway::MountGateway;
use crate::mountinfo;
use crate::ops;

/// Scan the mount tables of our own and all known mount namespaces for
/// nsfs bind mounts. Mount namespaces found this way are scanned as well.
pub(crate) fn discover_from_bind_mounts(
    ctx: &mut DiscoveryContext,
    result: &mut DiscoveryResult,
) -> Result<()> {
    let own = match ops::namespace_id_of_path(Path::new("/proc/self/ns/mnt")) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "Cannot identify own mount namespace");
            ctx.note(format!("bind mounts not scanned: {e}"));
            return Ok(());
        }
    };
    let initial = ops::namespace_id_of_path(Path::new("/proc/1/ns/mnt")).ok();
    let own_reference = if initial == Some(own) {
        NamespaceRef::empty()
    } else {
        NamespaceRef::new(format!("/proc/{}/ns/mnt", ProcessId::current()))
    };

    let mut visited = HashSet::from([own]);
    let mut backlog: VecDeque<NamespaceId> = result
        .namespaces
        .of_type(NamespaceType::Mount)
        .keys()
        .copied()
        .filter(|id| *id != own)
        .collect();

    scan(ctx, result, &MountGateway::own(own_reference), &mut backlog)?;

    while let Some(id) = backlog.pop_front() {
        ctx.check_deadline("bind mounts")?;
        if !visited.insert(id) {
            continue;
        }
        let Some(namespace) = result.namespaces.get(NamespaceType::Mount, id) else {
            continue;
        };
        let gateway = match MountGateway::for_namespace(
            namespace,
            &result.processes,
            ctx.options.sandbox_timeout,
        ) {
            Ok(gateway) => gateway,
            Err(e) => {
                debug!(%id, error = %e, "Mount namespace unreachable");
                ctx.diagnostics.unreachable_mount_namespaces.push(id);
                continue;
            }
        };
        ctx.diagnostics.sandboxes_spawned += gateway.spawned();
        let scanned = scan(ctx, result, &gateway, &mut backlog);
        gateway.close();
        scanned?;
    }
    Ok(())
}

/// Record the namespace bind mounts listed in one mount table.
fn scan(
    ctx: &mut DiscoveryContext,
    result: &mut DiscoveryResult,
    gateway: &MountGateway,
    backlog: &mut VecDeque<NamespaceId>,
) -> Result<()> {
    let table = match fs::read(gateway.mountinfo_path()) {
        Ok(table) => table,
        Err(e) => {
            debug!(reference = %gateway.reference(), error = %e, "Cannot read mount table");
            ctx.note(format!("no mount table for {}: {e}", gateway.reference()));
            return Ok(());
        }
    };

    for mount in mountinfo::parse(&table).into_iter().filter(mountinfo::MountInfo::is_nsfs) {
        ctx.check_deadline("bind mounts")?;
        let Some((ns_type, ino)) = NamespaceType::parse_text(&mount.root) else {
            continue;
        };
        if !ctx.options.includes(ns_type) {
            continue;
        }
        let opened = gateway
            .resolve(&mount.mount_point)
            .and_then(|path| ops::open_namespace(&path))
            .and_then(|file| Ok((ops::namespace_id(&file)?, file)));
        let (id, file) = match opened {
            Ok(found) if found.0.matches_inode(ino) => found,
            Ok(_) | Err(_) => {
                trace!(mount_point = %mount.mount_point.display(), "Bind mount vanished");
                ctx.diagnostics.skipped_bind_mounts += 1;
                continue;
            }
        };
        if result.namespaces.contains(ns_type, id) {
            continue;
        }

        let reference = gateway.reference().join(mount.mount_point.clone());
        trace!(%ns_type, %id, %reference, "Namespace bind-mounted");
        let (ns, _) = result.namespaces.insert_new(ns_type, id, reference);
        if ns_type != NamespaceType::User {
            if let Ok(owner) = ops::owner_id(&file) {
                ns.set_owner_id(owner);
            }
        }
        if ns_type == NamespaceType::Mount {
            backlog.push_back(id);
        }
    }
    Ok(())
}
