//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{Error, Result};

/// Identity of a namespace: the device and inode of its nsfs file.
///
/// Two namespaces are the same iff both fields match. Identities are only
/// meaningful for the duration of one discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespaceId {
    /// Device number of the nsfs filesystem
    pub dev: u64,
    /// Inode number of the namespace
    pub ino: u64,
}

impl NamespaceId {
    /// Create an identity from device and inode numbers
    #[must_use]
    pub const fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Whether this identity matches an inode number taken from kernel text
    /// such as `net:[4026531993]`, which carries no device.
    #[must_use]
    pub const fn matches_inode(&self, ino: u64) -> bool {
        self.ino == ino
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.ino, self.dev)
    }
}

/// The eight Linux namespace species.
///
/// The declaration order defines the slot index used by per-type arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    /// Mount namespace
    #[serde(rename = "mnt")]
    Mount,
    /// Cgroup namespace
    Cgroup,
    /// UTS namespace (hostname, domain name)
    Uts,
    /// IPC namespace
    Ipc,
    /// User namespace
    User,
    /// PID namespace
    Pid,
    /// Network namespace
    Net,
    /// Time namespace
    Time,
}

/// Number of namespace species.
pub const NAMESPACE_TYPES: usize = 8;

impl NamespaceType {
    /// All species in slot order
    pub const ALL: [Self; NAMESPACE_TYPES] = [
        Self::Mount,
        Self::Cgroup,
        Self::Uts,
        Self::Ipc,
        Self::User,
        Self::Pid,
        Self::Net,
        Self::Time,
    ];

    /// Slot index of this species in per-type arrays
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Species for a slot index
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < NAMESPACE_TYPES {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    /// Short name as used in `/proc/<pid>/ns/`
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mount => "mnt",
            Self::Cgroup => "cgroup",
            Self::Uts => "uts",
            Self::Ipc => "ipc",
            Self::User => "user",
            Self::Pid => "pid",
            Self::Net => "net",
            Self::Time => "time",
        }
    }

    /// Species for a short name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Kernel `CLONE_NEW*` flag value of this species
    #[must_use]
    pub const fn clone_flag(self) -> u64 {
        match self {
            Self::Mount => 0x0002_0000,
            Self::Cgroup => 0x0200_0000,
            Self::Uts => 0x0400_0000,
            Self::Ipc => 0x0800_0000,
            Self::User => 0x1000_0000,
            Self::Pid => 0x2000_0000,
            Self::Net => 0x4000_0000,
            Self::Time => 0x0000_0080,
        }
    }

    /// Species for a `CLONE_NEW*` flag value, as returned by `NS_GET_NSTYPE`
    #[must_use]
    pub fn from_clone_flag(flag: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.clone_flag() == flag)
    }

    /// PID and user namespaces form a parent/child hierarchy.
    #[must_use]
    pub const fn is_hierarchical(self) -> bool {
        matches!(self, Self::User | Self::Pid)
    }

    /// Kernel text form of a namespace of this species, e.g. `net:[4026531993]`
    #[must_use]
    pub fn text(self, ino: u64) -> String {
        format!("{}:[{ino}]", self.name())
    }

    /// Parse kernel text such as `net:[4026531993]` into species and inode.
    ///
    /// The text carries no device number, so the inode alone must not be
    /// taken for a full [`NamespaceId`].
    #[must_use]
    pub fn parse_text(text: &str) -> Option<(Self, u64)> {
        let (name, rest) = text.split_once(":[")?;
        let ino = rest.strip_suffix(']')?.parse().ok()?;
        Some((Self::from_name(name)?, ino))
    }
}

impl fmt::Display for NamespaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NamespaceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| Error::InvalidConfig {
            message: format!("unknown namespace type {s:?}"),
        })
    }
}

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        #[allow(clippy::cast_possible_wrap)]
        Self(std::process::id() as i32)
    }

    /// Convert to `nix::unistd::Pid`
    #[must_use]
    pub const fn as_nix_pid(self) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(self.0)
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse().map(Self).map_err(|e| Error::Parse {
            what: "process ID",
            message: format!("{s:?}: {e}"),
        })
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for nix::unistd::Pid {
    fn from(pid: ProcessId) -> Self {
        Self::from_raw(pid.0)
    }
}

/// Filesystem paths addressing a namespace.
///
/// The first path is interpreted in the initial mount namespace, every
/// following path inside the mount namespace referenced by the paths before
/// it. An empty reference marks a namespace only known through hierarchy
/// queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceRef(Vec<PathBuf>);

impl NamespaceRef {
    /// Reference without any path
    #[must_use]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Reference with a single path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(vec![path.into()])
    }

    /// Whether the reference has no path at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of paths (hops) in the reference
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The paths of this reference, outermost first
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.0
    }

    /// The innermost path
    #[must_use]
    pub fn last(&self) -> Option<&Path> {
        self.0.last().map(PathBuf::as_path)
    }

    /// Reference to something found at `path` inside the namespace this
    /// reference addresses.
    #[must_use]
    pub fn join(&self, path: impl Into<PathBuf>) -> Self {
        let mut paths = self.0.clone();
        paths.push(path.into());
        Self(paths)
    }

    /// Reference made of the first `len` paths
    #[must_use]
    pub fn prefix(&self, len: usize) -> Self {
        Self(self.0.iter().take(len).cloned().collect())
    }
}

impl fmt::Display for NamespaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<hidden>");
        }
        for (i, path) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ▸ ")?;
            }
            write!(f, "{}", path.display())?;
        }
        Ok(())
    }
}

impl From<PathBuf> for NamespaceRef {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&str> for NamespaceRef {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for NamespaceRef {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_slots_and_flags() {
        for (i, t) in NamespaceType::ALL.into_iter().enumerate() {
            assert_eq!(t.index(), i);
            assert_eq!(NamespaceType::from_index(i), Some(t));
            assert_eq!(NamespaceType::from_clone_flag(t.clone_flag()), Some(t));
            assert_eq!(NamespaceType::from_name(t.name()), Some(t));
        }
        assert_eq!(NamespaceType::from_index(NAMESPACE_TYPES), None);
        assert_eq!(NamespaceType::from_clone_flag(0x0001_0000), None);
        assert_eq!(NamespaceType::User.clone_flag(), 0x1000_0000);
        assert_eq!(NamespaceType::Time.clone_flag(), 0x80);
    }

    #[test]
    fn test_type_serde_names() {
        let json = serde_json::to_string(&NamespaceType::Mount).unwrap();
        assert_eq!(json, "\"mnt\"");
        let t: NamespaceType = serde_json::from_str("\"cgroup\"").unwrap();
        assert_eq!(t, NamespaceType::Cgroup);
    }

    #[test]
    fn test_parse_text() {
        assert_eq!(
            NamespaceType::parse_text("net:[4026531993]"),
            Some((NamespaceType::Net, 4_026_531_993))
        );
        assert_eq!(
            NamespaceType::parse_text(&NamespaceType::Time.text(42)),
            Some((NamespaceType::Time, 42))
        );
        assert_eq!(NamespaceType::parse_text("socket:[123]"), None);
        assert_eq!(NamespaceType::parse_text("net:[abc]"), None);
        assert_eq!(NamespaceType::parse_text("net:[123"), None);
        assert_eq!(NamespaceType::parse_text("/dev/null"), None);
    }

    #[test]
    fn test_namespace_id_identity() {
        let a = NamespaceId::new(4, 100);
        let b = NamespaceId::new(5, 100);
        assert_ne!(a, b);
        assert!(a.matches_inode(100));
        assert!(b.matches_inode(100));
    }

    #[test]
    fn test_namespace_ref() {
        let r = NamespaceRef::new("/run/netns/a");
        assert_eq!(r.len(), 1);
        let chained = r.join("/inner/mnt");
        assert_eq!(chained.len(), 2);
        assert_eq!(chained.last(), Some(Path::new("/inner/mnt")));
        assert_eq!(chained.prefix(1), r);
        assert_eq!(chained.to_string(), "/run/netns/a ▸ /inner/mnt");
        assert_eq!(NamespaceRef::empty().to_string(), "<hidden>");
        assert!(NamespaceRef::empty().is_empty());
    }

    #[test]
    fn test_process_id() {
        let pid = ProcessId::from_raw(123);
        assert_eq!(pid.as_raw(), 123);

        let nix_pid = pid.as_nix_pid();
        assert_eq!(nix_pid.as_raw(), 123);
        assert_eq!("42".parse::<ProcessId>().unwrap(), ProcessId::from_raw(42));
        assert!("x".parse::<ProcessId>().is_err());
    }
}
