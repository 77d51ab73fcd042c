use crate::cli::Commands;
use anyhow::Result;

pub mod discover;
pub mod namespaces;
pub mod pid;
pub mod users;

/// Dispatch command to appropriate handler
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Discover(args) => discover::execute(args).await,

        Commands::Users { sandbox_timeout } => users::execute(sandbox_timeout).await,

        Commands::Pid { pid } => pid::execute(pid).await,

        Commands::Namespaces { pid } => namespaces::execute(pid),
    }
}

/// Run discovery off the async runtime
pub async fn run_discovery(
    options: nsweep_namespace::DiscoverOptions,
) -> Result<nsweep_namespace::DiscoveryResult> {
    use anyhow::Context;

    let result = tokio::task::spawn_blocking(move || nsweep_namespace::discover(&options))
        .await
        .context("Discovery task failed")?
        .context("Discovery aborted")?;
    Ok(result)
}
