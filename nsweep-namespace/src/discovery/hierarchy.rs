//! Parent chains of PID and user namespaces

use nsweep_core::{Error, NamespaceId, NamespaceRef, NamespaceType, Result};
use tracing::{debug, trace};

use super::{DiscoveryContext, DiscoveryResult};
use crate::gateway::open_reference;
use crate::ops;

/// Climb from every known namespace of `ns_type` towards its root, adding
/// hidden namespaces for ancestors nobody else revealed.
///
/// # Errors
/// [`Error::KernelContract`] when the kernel hands out a parent that cannot
/// be identified, [`Error::Reparent`] on contradictory parents.
pub(crate) fn discover_hierarchy(
    ctx: &mut DiscoveryContext,
    result: &mut DiscoveryResult,
    ns_type: NamespaceType,
) -> Result<()> {
    let known: Vec<NamespaceId> = result.namespaces.of_type(ns_type).keys().copied().collect();
    let hidden_before = ctx.diagnostics.hidden_namespaces;

    for id in known {
        ctx.check_deadline("hierarchy")?;
        let Some(ns) = result.namespaces.get(ns_type, id) else {
            continue;
        };
        if ns.parent().is_some() || ns.is_hidden() {
            continue;
        }
        let mut file = match open_reference(ns.reference(), ctx.options.sandbox_timeout) {
            Ok(file) => file,
            Err(e) => {
                debug!(%ns_type, %id, error = %e, "Cannot open namespace");
                continue;
            }
        };

        let mut child = id;
        loop {
            if ns_type == NamespaceType::User {
                if let (Ok(uid), Some(ns)) = (ops::owner_uid(&file), result.namespaces.get_mut(ns_type, child)) {
                    ns.set_owner_uid(uid);
                }
            }
            let parent_file = match ops::parent_namespace(&file) {
                Ok(parent) => parent,
                Err(e) => {
                    trace!(%ns_type, %child, error = %e, "No reachable parent");
                    break;
                }
            };
            let parent = ops::namespace_id(&parent_file).map_err(|e| Error::KernelContract {
                message: format!("parent of {ns_type} namespace {child} has no identity: {e}"),
            })?;

            let (parent_ns, created) = result.namespaces.insert_new(ns_type, parent, NamespaceRef::empty());
            let parent_had_parent = parent_ns.parent().is_some();
            if created {
                trace!(%ns_type, %parent, "Hidden namespace");
                ctx.diagnostics.hidden_namespaces += 1;
            }
            result.namespaces.add_child(ns_type, parent, child)?;

            if parent_had_parent {
                break;
            }
            child = parent;
            file = parent_file;
        }
    }

    debug!(
        %ns_type,
        hidden = ctx.diagnostics.hidden_namespaces - hidden_before,
        roots = result.namespaces.roots(ns_type).len(),
        "Linked hierarchy"
    );
    Ok(())
}
