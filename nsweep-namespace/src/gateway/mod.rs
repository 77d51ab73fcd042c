//! Access to the file-system contents of other mount namespaces
//!
//! A [`MountGateway`] turns a [`NamespaceRef`] to a mount namespace into a
//! contents root: a path prefix under which paths inside that mount
//! namespace can be resolved from the caller's own view. Mount namespaces
//! joined by a live process are reached through `/proc/<pid>/root`; those
//! only kept alive by bind mounts or file descriptors get a [`Sandbox`]
//! process attached to them, one per hop of the reference.

mod resolve;
mod sandbox;

pub use resolve::resolve_in_root;
pub use sandbox::Sandbox;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nsweep_core::{Error, NamespaceRef, NamespaceType, ProcessId, Result};
use tracing::{debug, trace};

use crate::namespace::Namespace;
use crate::ops;
use crate::process::ProcessTable;

/// Contents root of a mount namespace, plus whatever keeps it reachable.
///
/// Sandbox processes are released when the gateway is closed or dropped.
#[derive(Debug)]
pub struct MountGateway {
    reference: NamespaceRef,
    contents_root: PathBuf,
    pid: Option<ProcessId>,
    sandbox: Option<Sandbox>,
    spawned: usize,
}

/// PID named by a `/proc/<pid>/...` path; `self` is the caller.
fn proc_pid(path: &Path) -> Option<(ProcessId, PathBuf)> {
    let rest = path.strip_prefix("/proc").ok()?;
    let mut components = rest.components();
    let pid = match components.next()?.as_os_str().to_str()? {
        "self" => ProcessId::current(),
        digits => digits.parse().ok()?,
    };
    Some((pid, components.as_path().to_path_buf()))
}

/// Root under which first-hop paths of a reference are resolved: the root
/// of PID 1 when we may look there, our own view otherwise.
fn initial_contents_root() -> PathBuf {
    let init_root = PathBuf::from("/proc/1/root");
    if std::fs::read_link(&init_root).is_ok() {
        init_root
    } else {
        PathBuf::new()
    }
}

fn invalid(reference: &NamespaceRef, reason: impl Into<String>) -> Error {
    Error::InvalidReference {
        reference: reference.to_string(),
        reason: reason.into(),
    }
}

fn validate(reference: &NamespaceRef) -> Result<()> {
    if reference.is_empty() {
        return Err(invalid(reference, "no path"));
    }
    for (hop, path) in reference.paths().iter().enumerate() {
        if !path.is_absolute() {
            return Err(invalid(reference, format!("{} is not absolute", path.display())));
        }
        if hop > 0 && path.starts_with("/proc") {
            return Err(invalid(
                reference,
                format!("{} refers to procfs inside another mount namespace", path.display()),
            ));
        }
    }
    Ok(())
}

/// Open the mount namespace at `path` and check its species.
fn open_mount_namespace(reference: &NamespaceRef, path: &Path) -> Result<File> {
    let file = ops::open_namespace(path)?;
    match ops::namespace_type(&file) {
        Ok(NamespaceType::Mount) => Ok(file),
        Ok(other) => Err(invalid(
            reference,
            format!("{} is a {other} namespace", path.display()),
        )),
        Err(_) => Err(invalid(
            reference,
            format!("{} is no namespace", path.display()),
        )),
    }
}

/// The owning user namespace of `mnt`, if it differs from ours.
fn user_namespace_to_enter(mnt: &File) -> Option<File> {
    let owner = ops::owning_user_namespace(mnt).ok()?;
    let owner_id = ops::namespace_id(&owner).ok()?;
    let own_id = ops::namespace_id_of_path(Path::new("/proc/self/ns/user")).ok()?;
    (owner_id != own_id).then_some(owner)
}

impl MountGateway {
    /// Gateway to the caller's own mount namespace.
    ///
    /// `reference` is the prefix for references to things found inside it.
    #[must_use]
    pub fn own(reference: NamespaceRef) -> Self {
        Self {
            reference,
            contents_root: PathBuf::new(),
            pid: None,
            sandbox: None,
            spawned: 0,
        }
    }

    /// Open the mount namespace addressed by `reference`.
    ///
    /// The first path is taken in the initial mount namespace, each further
    /// path inside the mount namespace opened by the previous one. A first
    /// path `/proc/<pid>/ns/mnt` is reached through that process's root;
    /// every other hop gets a sandbox, replacing the sandbox of the hop
    /// before.
    ///
    /// # Errors
    /// [`Error::InvalidReference`] before anything is spawned if the
    /// reference is empty, relative, or addresses no mount namespace;
    /// sandbox errors if a hop cannot be attached, after tearing down the
    /// hops attached so far.
    pub fn open(reference: &NamespaceRef, attach_timeout: Duration) -> Result<Self> {
        validate(reference)?;
        let mut gateway = Self::own(reference.clone());

        for (hop, path) in reference.paths().iter().enumerate() {
            if hop == 0 {
                if let Some((pid, rest)) = proc_pid(path) {
                    if rest == Path::new("ns/mnt") {
                        open_mount_namespace(reference, path)?;
                        gateway.contents_root = PathBuf::from(format!("/proc/{pid}/root"));
                        gateway.pid = Some(pid);
                        trace!(%pid, "Mount namespace reachable through process root");
                        continue;
                    }
                }
            }

            let host_path = if hop == 0 {
                if path.starts_with("/proc") {
                    path.clone()
                } else {
                    resolve_in_root(&initial_contents_root(), path)?
                }
            } else {
                gateway.resolve(path)?
            };
            let mnt = open_mount_namespace(reference, &host_path)?;
            let user = user_namespace_to_enter(&mnt);
            let sandbox = Sandbox::spawn(&mnt, user.as_ref(), attach_timeout)?;
            gateway.spawned += 1;
            gateway.contents_root = sandbox.root();
            gateway.pid = Some(sandbox.pid());
            debug!(hop, path = %path.display(), pid = %sandbox.pid(), "Attached sandbox");
            if let Some(previous) = gateway.sandbox.replace(sandbox) {
                previous.close();
            }
        }
        Ok(gateway)
    }

    /// Gateway to a discovered mount namespace, preferring the root of its
    /// ealdorman over spawning sandboxes.
    ///
    /// # Errors
    /// See [`MountGateway::open`]; hidden namespaces are invalid references.
    pub fn for_namespace(
        namespace: &Namespace,
        processes: &ProcessTable,
        attach_timeout: Duration,
    ) -> Result<Self> {
        if namespace.ns_type() != NamespaceType::Mount {
            return Err(invalid(
                namespace.reference(),
                format!("{} is a {} namespace", namespace.id(), namespace.ns_type()),
            ));
        }
        if let Some(ealdorman) = namespace.ealdorman(processes) {
            return Ok(Self {
                reference: namespace.reference().clone(),
                contents_root: PathBuf::from(format!("/proc/{}/root", ealdorman.pid)),
                pid: Some(ealdorman.pid),
                sandbox: None,
                spawned: 0,
            });
        }
        Self::open(namespace.reference(), attach_timeout)
    }

    /// Reference this gateway was opened for
    #[must_use]
    pub const fn reference(&self) -> &NamespaceRef {
        &self.reference
    }

    /// Path prefix showing the mount namespace's contents; empty for our own
    #[must_use]
    pub fn contents_root(&self) -> &Path {
        &self.contents_root
    }

    /// Process whose procfs entry shows the mount namespace, `None` for our own
    #[must_use]
    pub const fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    /// Number of sandbox processes spawned while opening
    #[must_use]
    pub const fn spawned(&self) -> usize {
        self.spawned
    }

    /// Mount table of the mount namespace
    #[must_use]
    pub fn mountinfo_path(&self) -> PathBuf {
        self.pid.map_or_else(
            || PathBuf::from("/proc/self/mountinfo"),
            |pid| PathBuf::from(format!("/proc/{pid}/mountinfo")),
        )
    }

    /// Host path of `path` inside the mount namespace, symlinks resolved
    /// within the contents root. Relative paths are taken relative to our
    /// working directory.
    ///
    /// # Errors
    /// See [`resolve_in_root`].
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        resolve_in_root(&self.contents_root, &absolute)
    }

    /// Open a file inside the mount namespace
    ///
    /// # Errors
    /// Resolution or open errors.
    pub fn open_file(&self, path: &Path) -> Result<File> {
        Ok(File::open(self.resolve(path)?)?)
    }

    /// Read a file inside the mount namespace
    ///
    /// # Errors
    /// Resolution or read errors.
    pub fn read_to_string(&self, path: &Path) -> Result<String> {
        Ok(std::fs::read_to_string(self.resolve(path)?)?)
    }

    /// Release sandbox processes
    pub fn close(mut self) {
        if let Some(sandbox) = self.sandbox.take() {
            sandbox.close();
        }
    }
}

/// Open the namespace addressed by `reference`, crossing mount namespaces
/// through a [`MountGateway`] for references longer than one path.
///
/// # Errors
/// Invalid references, gateway errors and open errors.
pub fn open_reference(reference: &NamespaceRef, attach_timeout: Duration) -> Result<File> {
    validate(reference)?;
    let paths = reference.paths();
    let Some((last, outer)) = paths.split_last() else {
        return Err(invalid(reference, "no path"));
    };
    if outer.is_empty() {
        let path = if last.starts_with("/proc") {
            last.clone()
        } else {
            resolve_in_root(&initial_contents_root(), last)?
        };
        return ops::open_namespace(&path);
    }
    let gateway = MountGateway::open(&reference.prefix(outer.len()), attach_timeout)?;
    let file = gateway.open_file(last);
    gateway.close();
    file
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_invalid_references_rejected() {
        let cases: Vec<NamespaceRef> = vec![
            NamespaceRef::empty(),
            NamespaceRef::new(""),
            NamespaceRef::new("foobar"),
            ["/proc/self/ns/mnt", "/proc/self/ns/mnt"].into_iter().collect(),
            NamespaceRef::new("/proc/self"),
            NamespaceRef::new("/proc/self/"),
            NamespaceRef::new("/proc/self/ns/net"),
            NamespaceRef::new("/nonexisting/mnt"),
        ];
        for reference in cases {
            let result = MountGateway::open(&reference, TIMEOUT);
            assert!(result.is_err(), "accepted {reference}");
        }
    }

    #[test]
    fn test_process_root_needs_no_sandbox() {
        let pid = ProcessId::current();
        let reference = NamespaceRef::new(format!("/proc/{pid}/ns/mnt"));
        let gateway = MountGateway::open(&reference, TIMEOUT).unwrap();
        assert_eq!(gateway.contents_root(), Path::new(&format!("/proc/{pid}/root")));
        assert_eq!(gateway.pid(), Some(pid));
        assert_eq!(gateway.spawned(), 0);
        assert_eq!(
            gateway.mountinfo_path(),
            PathBuf::from(format!("/proc/{pid}/mountinfo"))
        );

        let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
        let contents = gateway.read_to_string(&manifest).unwrap();
        assert!(contents.contains("nsweep-namespace"));
        assert!(gateway.open_file(Path::new("/no/such/file")).is_err());
        gateway.close();
    }

    #[test]
    fn test_own_gateway() {
        let gateway = MountGateway::own(NamespaceRef::empty());
        assert_eq!(gateway.contents_root(), Path::new(""));
        assert_eq!(gateway.mountinfo_path(), PathBuf::from("/proc/self/mountinfo"));
        assert!(gateway.read_to_string(Path::new("/proc/self/mountinfo")).is_ok());
    }

    #[test]
    fn test_proc_pid() {
        assert_eq!(
            proc_pid(Path::new("/proc/42/ns/mnt")),
            Some((ProcessId::from_raw(42), PathBuf::from("ns/mnt")))
        );
        assert_eq!(
            proc_pid(Path::new("/proc/self/fd/3")).map(|(pid, _)| pid),
            Some(ProcessId::current())
        );
        assert_eq!(proc_pid(Path::new("/run/netns/x")), None);
        assert_eq!(proc_pid(Path::new("/proc/sys")), None);
    }

    #[test]
    fn test_open_single_path_reference() {
        let file = open_reference(&NamespaceRef::new("/proc/self/ns/net"), TIMEOUT).unwrap();
        assert_eq!(ops::namespace_type(&file).unwrap(), NamespaceType::Net);
        assert!(open_reference(&NamespaceRef::empty(), TIMEOUT).is_err());
    }
}
