//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use nsweep_core::{NamespaceType, ProcessId};

#[derive(Parser)]
#[command(name = "nsweep")]
#[command(about = "Linux namespace discovery", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover namespaces and their relations
    Discover(DiscoverArgs),

    /// Show the user namespace tree with owner names
    Users {
        /// Sandbox attach timeout in seconds
        #[arg(long, default_value = "5")]
        sandbox_timeout: u64,
    },

    /// Show the PIDs of a process in every PID namespace it is visible in
    Pid {
        /// Process ID in our own PID namespace
        pid: ProcessId,
    },

    /// Show namespaces joined by a process
    Namespaces {
        /// Process ID (default: current process)
        #[arg(short, long)]
        pid: Option<ProcessId>,
    },
}

#[derive(Args)]
pub struct DiscoverArgs {
    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,

    /// Namespace types to include (default: all)
    #[arg(long, value_delimiter = ',')]
    pub types: Vec<NamespaceType>,

    /// Skip scanning processes
    #[arg(long)]
    pub no_processes: bool,

    /// Skip scanning open file descriptors
    #[arg(long)]
    pub no_fds: bool,

    /// Skip scanning bind mounts
    #[arg(long)]
    pub no_bind_mounts: bool,

    /// Skip climbing PID and user namespace hierarchies
    #[arg(long)]
    pub no_hierarchy: bool,

    /// Skip resolving owning user namespaces
    #[arg(long)]
    pub no_ownership: bool,

    /// Also read the mount table of every mount namespace
    #[arg(long)]
    pub mounts: bool,

    /// Overall deadline in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}
