//! Discover command implementation

use std::time::Duration;

use anyhow::{Context, Result};
use nsweep_core::NamespaceType;
use nsweep_namespace::{DiscoverOptions, DiscoveryResult, NamespaceFlags};

use crate::cli::DiscoverArgs;

fn options(args: &DiscoverArgs) -> DiscoverOptions {
    let mut options = DiscoverOptions::standard()
        .with_processes(!args.no_processes)
        .with_fds(!args.no_fds)
        .with_bind_mounts(!args.no_bind_mounts)
        .with_hierarchy(!args.no_hierarchy)
        .with_ownership(!args.no_ownership)
        .with_mounts(args.mounts);
    if !args.types.is_empty() {
        options = options.with_namespace_types(args.types.iter().copied().collect::<NamespaceFlags>());
    }
    if let Some(secs) = args.timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }
    options
}

pub async fn execute(args: DiscoverArgs) -> Result<()> {
    let options = options(&args);
    tracing::info!(types = ?options.enabled_types(), "Discovering namespaces");

    let result = super::run_discovery(options).await?;

    if args.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
        println!("{json}");
    } else {
        print_summary(&result);
    }
    Ok(())
}

fn print_summary(result: &DiscoveryResult) {
    println!("\n🔍 Namespaces");
    println!("{:-<72}", "");

    for ns_type in NamespaceType::ALL {
        let namespaces = result.sorted_namespaces(ns_type);
        if namespaces.is_empty() {
            continue;
        }
        for ns in namespaces {
            let own = if result.own_namespace(ns_type) == Some(ns.id()) {
                "*"
            } else {
                " "
            };
            let leader = ns
                .ealdorman(result.processes())
                .map_or_else(String::new, |p| format!("{} ({})", p.pid, p.display_name()));
            let reference = if ns.is_hidden() {
                "<hidden>".to_string()
            } else {
                ns.reference().to_string()
            };
            println!(
                "{own}{:<7} {:<24} {:<28} {reference}",
                ns_type.name(),
                ns.id().to_string(),
                leader
            );
        }
    }

    println!("{:-<72}", "");
    println!(
        "Total: {} namespace(s), {} process(es)",
        result.namespaces().len(),
        result.processes().len()
    );

    let diagnostics = result.diagnostics();
    if diagnostics.skipped_processes > 0 {
        println!("⚠️  {} process(es) not readable", diagnostics.skipped_processes);
    }
    if !diagnostics.unreachable_mount_namespaces.is_empty() {
        println!(
            "⚠️  {} mount namespace(s) unreachable",
            diagnostics.unreachable_mount_namespaces.len()
        );
    }
    if let Some(phase) = &diagnostics.interrupted {
        println!("⚠️  Deadline exceeded during {phase}, result is partial");
    }
}
