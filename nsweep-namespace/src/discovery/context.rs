//! Per-run state handed to every discovery phase

use std::time::Instant;

use nsweep_core::{Error, NamespaceId, Result};
use serde::Serialize;

use crate::config::DiscoverOptions;

/// What a discovery run had to skip or work around
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Processes dropped because their namespaces could not be read
    pub skipped_processes: usize,
    /// Processes whose fd directory could not be read
    pub skipped_fd_dirs: usize,
    /// Namespace fds that closed or could not be opened while scanning
    pub skipped_fds: usize,
    /// Namespace bind mounts that vanished or could not be opened
    pub skipped_bind_mounts: usize,
    /// Mount namespaces that could not be entered
    pub unreachable_mount_namespaces: Vec<NamespaceId>,
    /// Hidden namespaces created while climbing hierarchies
    pub hidden_namespaces: usize,
    /// Namespaces whose owning user namespace is unknown
    pub unresolved_owners: usize,
    /// Processes left out of the PID map
    pub pid_map_mismatches: usize,
    /// Sandbox processes spawned
    pub sandboxes_spawned: usize,
    /// Phase during which the deadline expired
    pub interrupted: Option<String>,
    /// Other absorbed errors
    pub notes: Vec<String>,
}

impl Diagnostics {
    /// Whether the run completed without skipping anything
    #[must_use]
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Options, deadline and diagnostics of one discovery run
#[derive(Debug)]
pub struct DiscoveryContext {
    pub(crate) options: DiscoverOptions,
    deadline: Option<Instant>,
    pub(crate) diagnostics: Diagnostics,
}

impl DiscoveryContext {
    pub(crate) fn new(options: &DiscoverOptions) -> Self {
        Self {
            options: options.clone(),
            deadline: options.timeout.map(|t| Instant::now() + t),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Fail with [`Error::DeadlineExceeded`] once the run is out of time.
    pub(crate) fn check_deadline(&self, phase: &'static str) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded { phase }),
            _ => Ok(()),
        }
    }

    pub(crate) fn note(&mut self, message: impl Into<String>) {
        self.diagnostics.notes.push(message.into());
    }
}
