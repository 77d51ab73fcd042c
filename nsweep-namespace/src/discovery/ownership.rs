//! Owning user namespaces of non-user namespaces

use nsweep_core::{NamespaceId, NamespaceType, Result};
use tracing::{debug, trace};

use super::{DiscoveryContext, DiscoveryResult};
use crate::graph::resolve_owner;

/// Link every non-user namespace of `ns_type` to the user namespace owning it.
pub(crate) fn discover_ownership(
    ctx: &mut DiscoveryContext,
    result: &mut DiscoveryResult,
    ns_type: NamespaceType,
) -> Result<()> {
    if ns_type == NamespaceType::User {
        return Ok(());
    }
    let ids: Vec<NamespaceId> = result.namespaces.of_type(ns_type).keys().copied().collect();
    let mut unresolved = 0;
    for id in ids {
        if !resolve_owner(&mut result.namespaces, ns_type, id) {
            trace!(%ns_type, %id, "Owner unknown");
            unresolved += 1;
        }
    }
    ctx.diagnostics.unresolved_owners += unresolved;
    debug!(%ns_type, unresolved, "Resolved owners");
    Ok(())
}
