//! Discovery configuration

use std::path::PathBuf;
use std::time::Duration;

use nsweep_core::NamespaceType;
use serde::{Deserialize, Serialize};

/// Default time an auxiliary sandbox process gets to attach.
pub const DEFAULT_SANDBOX_TIMEOUT: Duration = Duration::from_secs(5);

/// Discovery options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverOptions {
    /// Namespace species in scope
    pub namespace_types: NamespaceFlags,

    /// Find namespaces joined by processes
    pub scan_processes: bool,

    /// Find namespaces referenced by open file descriptors
    pub scan_fds: bool,

    /// Find bind-mounted namespaces, in all reachable mount namespaces
    pub scan_bind_mounts: bool,

    /// Climb the PID and user namespace hierarchies
    pub discover_hierarchy: bool,

    /// Link namespaces to their owning user namespaces
    pub discover_ownership: bool,

    /// Read the mount table of every mount namespace
    pub discover_mounts: bool,

    /// Build the PID translation table
    pub with_pid_map: bool,

    /// Overall deadline for one discovery run
    pub timeout: Option<Duration>,

    /// Time an auxiliary sandbox process gets to attach
    pub sandbox_timeout: Duration,

    /// Where procfs is mounted
    pub procfs: PathBuf,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            namespace_types: NamespaceFlags::ALL,
            scan_processes: true,
            scan_fds: true,
            scan_bind_mounts: true,
            discover_hierarchy: true,
            discover_ownership: true,
            discover_mounts: false,
            with_pid_map: false,
            timeout: None,
            sandbox_timeout: DEFAULT_SANDBOX_TIMEOUT,
            procfs: PathBuf::from("/proc"),
        }
    }
}

impl DiscoverOptions {
    /// Create the default options: all phases, all species
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard discovery: the five namespace phases on all species
    #[must_use]
    pub fn standard() -> Self {
        Self::default()
    }

    /// Full discovery: standard plus mount tables and the PID map
    #[must_use]
    pub fn full() -> Self {
        Self {
            discover_mounts: true,
            with_pid_map: true,
            ..Self::default()
        }
    }

    /// No phase enabled; combine with the `with_*` builders
    #[must_use]
    pub fn none() -> Self {
        Self {
            scan_processes: false,
            scan_fds: false,
            scan_bind_mounts: false,
            discover_hierarchy: false,
            discover_ownership: false,
            ..Self::default()
        }
    }

    /// Restrict discovery to these species
    #[must_use]
    pub fn with_namespace_types(mut self, types: NamespaceFlags) -> Self {
        self.namespace_types = types;
        self
    }

    /// Enable scanning processes
    #[must_use]
    pub fn with_processes(mut self, enable: bool) -> Self {
        self.scan_processes = enable;
        self
    }

    /// Enable scanning open file descriptors
    #[must_use]
    pub fn with_fds(mut self, enable: bool) -> Self {
        self.scan_fds = enable;
        self
    }

    /// Enable scanning bind mounts
    #[must_use]
    pub fn with_bind_mounts(mut self, enable: bool) -> Self {
        self.scan_bind_mounts = enable;
        self
    }

    /// Enable climbing the namespace hierarchy
    #[must_use]
    pub fn with_hierarchy(mut self, enable: bool) -> Self {
        self.discover_hierarchy = enable;
        self
    }

    /// Enable resolving namespace ownership
    #[must_use]
    pub fn with_ownership(mut self, enable: bool) -> Self {
        self.discover_ownership = enable;
        self
    }

    /// Enable reading mount tables
    #[must_use]
    pub fn with_mounts(mut self, enable: bool) -> Self {
        self.discover_mounts = enable;
        self
    }

    /// Enable building the PID map
    #[must_use]
    pub fn with_pid_map(mut self, enable: bool) -> Self {
        self.with_pid_map = enable;
        self
    }

    /// Set an overall deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the sandbox attach timeout
    #[must_use]
    pub fn with_sandbox_timeout(mut self, timeout: Duration) -> Self {
        self.sandbox_timeout = timeout;
        self
    }

    /// Read processes from a procfs mounted elsewhere
    #[must_use]
    pub fn with_procfs(mut self, procfs: impl Into<PathBuf>) -> Self {
        self.procfs = procfs.into();
        self
    }

    /// Whether a species is in scope
    #[must_use]
    pub const fn includes(&self, ns_type: NamespaceType) -> bool {
        self.namespace_types.contains(NamespaceFlags::of(ns_type))
    }

    /// Species in scope, in slot order
    #[must_use]
    pub fn enabled_types(&self) -> Vec<NamespaceType> {
        self.namespace_types.types()
    }
}

/// Namespace species flags for bitwise operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceFlags(u32);

impl NamespaceFlags {
    /// Mount namespace flag
    pub const MNT: Self = Self::of(NamespaceType::Mount);
    /// Cgroup namespace flag
    pub const CGROUP: Self = Self::of(NamespaceType::Cgroup);
    /// UTS namespace flag
    pub const UTS: Self = Self::of(NamespaceType::Uts);
    /// IPC namespace flag
    pub const IPC: Self = Self::of(NamespaceType::Ipc);
    /// User namespace flag
    pub const USER: Self = Self::of(NamespaceType::User);
    /// PID namespace flag
    pub const PID: Self = Self::of(NamespaceType::Pid);
    /// Network namespace flag
    pub const NET: Self = Self::of(NamespaceType::Net);
    /// Time namespace flag
    pub const TIME: Self = Self::of(NamespaceType::Time);

    /// All namespaces
    pub const ALL: Self = Self(0b1111_1111);
    /// No namespaces
    pub const NONE: Self = Self(0);

    /// Flag of a single species
    #[must_use]
    pub const fn of(ns_type: NamespaceType) -> Self {
        Self(1 << ns_type.index())
    }

    /// Create from raw value
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Get raw value
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check if flag is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Whether no flag is set
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Species set in these flags, in slot order
    #[must_use]
    pub fn types(self) -> Vec<NamespaceType> {
        NamespaceType::ALL
            .into_iter()
            .filter(|t| self.contains(Self::of(*t)))
            .collect()
    }
}

impl Default for NamespaceFlags {
    fn default() -> Self {
        Self::ALL
    }
}

impl FromIterator<NamespaceType> for NamespaceFlags {
    fn from_iter<I: IntoIterator<Item = NamespaceType>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, |flags, t| flags | Self::of(t))
    }
}

impl std::ops::BitOr for NamespaceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for NamespaceFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = DiscoverOptions::default();
        assert!(opts.scan_processes);
        assert!(opts.scan_fds);
        assert!(opts.scan_bind_mounts);
        assert!(opts.discover_hierarchy);
        assert!(opts.discover_ownership);
        assert!(!opts.with_pid_map);
        assert_eq!(opts.enabled_types().len(), 8);
    }

    #[test]
    fn test_builder_pattern() {
        let opts = DiscoverOptions::none()
            .with_processes(true)
            .with_namespace_types(NamespaceFlags::NET | NamespaceFlags::USER)
            .with_procfs("/tmp/fakeproc");

        assert!(opts.scan_processes);
        assert!(!opts.scan_bind_mounts);
        assert!(opts.includes(NamespaceType::Net));
        assert!(!opts.includes(NamespaceType::Mount));
        assert_eq!(opts.procfs, PathBuf::from("/tmp/fakeproc"));
    }

    #[test]
    fn test_full_options() {
        let opts = DiscoverOptions::full();
        assert!(opts.discover_mounts);
        assert!(opts.with_pid_map);
    }

    #[test]
    fn test_namespace_flags() {
        let flags = NamespaceFlags::PID | NamespaceFlags::NET;

        assert!(flags.contains(NamespaceFlags::PID));
        assert!(flags.contains(NamespaceFlags::NET));
        assert!(!flags.contains(NamespaceFlags::MNT));
        assert_eq!(flags.types(), [NamespaceType::Pid, NamespaceType::Net]);

        let collected: NamespaceFlags = [NamespaceType::Time, NamespaceType::Mount]
            .into_iter()
            .collect();
        assert_eq!(collected, NamespaceFlags::TIME | NamespaceFlags::MNT);
        assert!(NamespaceFlags::from_bits(0xffff).contains(NamespaceFlags::ALL));
        assert_eq!(NamespaceFlags::from_bits(0xffff), NamespaceFlags::ALL);
    }

    #[test]
    fn test_options_serde() {
        let opts = DiscoverOptions::none().with_namespace_types(NamespaceFlags::IPC);
        let json = serde_json::to_string(&opts).unwrap();
        let back: DiscoverOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(opts, back);
    }
}
