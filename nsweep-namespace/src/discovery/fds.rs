//! Namespaces kept alive by open file descriptors

use std::fs;

use nsweep_core::{NamespaceRef, NamespaceType, Result};
use tracing::{debug, trace};

use super::{DiscoveryContext, DiscoveryResult};
use crate::ops;

/// Scan the fd tables of all processes for namespace files of enabled
/// species not yet known.
pub(crate) fn discover_from_fds(ctx: &mut DiscoveryContext, result: &mut DiscoveryResult) -> Result<()> {
    let procfs = ctx.options.procfs.clone();
    let mut found = 0_usize;

    for pid in result.processes.pids() {
        ctx.check_deadline("fds")?;
        let fd_dir = procfs.join(pid.to_string()).join("fd");
        let entries = match fs::read_dir(&fd_dir) {
            Ok(entries) => entries,
            Err(e) => {
                trace!(%pid, error = %e, "Cannot list file descriptors");
                ctx.diagnostics.skipped_fd_dirs += 1;
                continue;
            }
        };

        for entry in entries.filter_map(std::result::Result::ok) {
            let fd_path = entry.path();
            let Ok(target) = fs::read_link(&fd_path) else {
                continue;
            };
            let Some((ns_type, _)) = target.to_str().and_then(NamespaceType::parse_text) else {
                continue;
            };
            if !ctx.options.includes(ns_type) {
                continue;
            }

            // The link text only carries the inode; the identity must come
            // from the file itself.
            let opened = ops::open_namespace(&fd_path)
                .and_then(|file| ops::namespace_id(&file).map(|id| (file, id)));
            let (file, id) = match opened {
                Ok(opened) => opened,
                Err(e) => {
                    trace!(%pid, fd = %fd_path.display(), error = %e, "Cannot open namespace fd");
                    ctx.diagnostics.skipped_fds += 1;
                    continue;
                }
            };
            if result.namespaces.contains(ns_type, id) {
                continue;
            }

            let (ns, _) = result
                .namespaces
                .insert_new(ns_type, id, NamespaceRef::new(fd_path.clone()));
            if ns_type != NamespaceType::User {
                if let Ok(owner) = ops::owner_id(&file) {
                    ns.set_owner_id(owner);
                }
            }
            found += 1;
            trace!(%pid, %ns_type, %id, fd = %fd_path.display(), "Namespace held open by fd");
        }
    }

    debug!(found, "Scanned file descriptors");
    Ok(())
}
