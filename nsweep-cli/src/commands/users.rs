//! Users command implementation

use std::time::Duration;

use anyhow::Result;
use nsweep_core::{NamespaceId, NamespaceType};
use nsweep_namespace::{DiscoverOptions, DiscoveryResult, NameSource, NamespaceFlags, UserNames, resolve_owner_names};

pub async fn execute(sandbox_timeout: u64) -> Result<()> {
    let timeout = Duration::from_secs(sandbox_timeout);
    let options = DiscoverOptions::standard()
        .with_ownership(false)
        .with_namespace_types(NamespaceFlags::USER)
        .with_sandbox_timeout(timeout);

    let result = super::run_discovery(options).await?;
    let names = tokio::task::spawn_blocking({
        let result = result.clone();
        move || resolve_owner_names(&result, timeout)
    })
    .await?;

    println!("\n👤 User namespaces");
    println!("{:-<60}", "");
    for root in result.roots(NamespaceType::User) {
        print_tree(&result, &names, root.id(), 0);
    }
    println!("{:-<60}", "");

    if names.source() == NameSource::OwnMountNamespace {
        println!("⚠️  Owner names taken from our own mount namespace");
    }
    Ok(())
}

fn print_tree(result: &DiscoveryResult, names: &UserNames, id: NamespaceId, depth: usize) {
    let Some(ns) = result.namespace(NamespaceType::User, id) else {
        return;
    };
    let owner = ns
        .owner_uid()
        .map_or_else(|| "?".to_string(), |uid| format!("{} ({uid})", names.display(uid)));
    let leader = ns
        .ealdorman(result.processes())
        .map_or_else(|| "-".to_string(), |p| format!("{} {}", p.pid, p.display_name()));
    println!(
        "{:indent$}{} owner {owner}, {leader}",
        "",
        NamespaceType::User.text(ns.id().ino),
        indent = depth * 2
    );
    for child in ns.children() {
        print_tree(result, names, *child, depth + 1);
    }
}
