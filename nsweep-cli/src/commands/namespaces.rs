//! Namespaces command implementation

use std::path::Path;

use anyhow::{Context, Result};
use nsweep_core::{NamespaceType, ProcessId};
use nsweep_namespace::ops;

pub fn execute(pid: Option<ProcessId>) -> Result<()> {
    let target_pid = pid.unwrap_or_else(ProcessId::current);

    println!("\n🔒 Namespace Information for PID {target_pid}");
    println!("{:-<60}", "");

    let ns_dir = Path::new("/proc").join(target_pid.to_string()).join("ns");
    anyhow::ensure!(ns_dir.exists(), "Process {target_pid} not found");

    let mut shared = 0;
    for ns_type in NamespaceType::ALL {
        let path = ns_dir.join(ns_type.name());
        let id = match ops::namespace_id_of_path(&path) {
            Ok(id) => id,
            Err(e) if e.is_permission_denied() => {
                println!("{:<7} permission denied", ns_type.name());
                continue;
            }
            Err(e) => {
                println!("{:<7} unavailable ({e})", ns_type.name());
                continue;
            }
        };
        let own = ops::namespace_id_of_path(&Path::new("/proc/self/ns").join(ns_type.name()))
            .with_context(|| format!("Failed to read own {ns_type} namespace"))?;
        let marker = if id == own {
            shared += 1;
            "(shared with us)"
        } else {
            ""
        };
        println!("{:<7} {:<24} {marker}", ns_type.name(), ns_type.text(id.ino));
    }

    println!("{:-<60}", "");
    if shared == NamespaceType::ALL.len() {
        println!("⚠️  Process shares all our namespaces");
    }
    Ok(())
}
