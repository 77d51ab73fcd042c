//! Pid command implementation

use anyhow::{Context, Result};
use nsweep_core::{NamespaceType, ProcessId};
use nsweep_namespace::{DiscoverOptions, NamespaceFlags};

pub async fn execute(pid: ProcessId) -> Result<()> {
    let options = DiscoverOptions::none()
        .with_processes(true)
        .with_hierarchy(true)
        .with_pid_map(true)
        .with_namespace_types(NamespaceFlags::PID);

    let result = super::run_discovery(options).await?;
    let own_pidns = result
        .own_namespace(NamespaceType::Pid)
        .context("Own PID namespace unknown")?;
    let pids = result
        .pid_map()
        .and_then(|map| map.namespaced_pids(pid, own_pidns))
        .with_context(|| format!("No PID namespace information for process {pid}"))?;

    println!("\n🔢 PIDs of process {pid}");
    println!("{:-<60}", "");
    for (depth, namespaced) in pids.iter().enumerate() {
        let marker = if namespaced.pidns == own_pidns { "*" } else { " " };
        println!(
            "{marker}{:indent$}{} {}",
            "",
            NamespaceType::Pid.text(namespaced.pidns.ino),
            namespaced.pid,
            indent = depth * 2
        );
    }
    Ok(())
}
