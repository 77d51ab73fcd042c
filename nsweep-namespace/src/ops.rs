//! Namespace queries on nsfs file descriptors
//!
//! Thin wrappers around the `NS_GET_*` ioctls and `fstat(2)` that turn
//! namespace files into identities and relatives.

#![allow(unsafe_code)]

use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nsweep_core::{Error, NamespaceId, NamespaceType, Result};

const NSIO: u8 = 0xb7;

nix::ioctl_none!(
    /// `NS_GET_USERNS`
    ns_get_userns,
    NSIO,
    0x1
);
nix::ioctl_none!(
    /// `NS_GET_PARENT`
    ns_get_parent,
    NSIO,
    0x2
);
nix::ioctl_none!(
    /// `NS_GET_NSTYPE`
    ns_get_nstype,
    NSIO,
    0x3
);
nix::ioctl_read_bad!(
    /// `NS_GET_OWNER_UID`
    ns_get_owner_uid,
    nix::request_code_none!(NSIO, 0x4),
    libc::uid_t
);

/// Open a namespace file (or any file) read-only.
///
/// # Errors
/// Returns the I/O error of `open(2)`.
pub fn open_namespace(path: &Path) -> Result<File> {
    File::open(path).map_err(Error::from)
}

/// Identity of the namespace an open nsfs file refers to
///
/// # Errors
/// Returns the I/O error of `fstat(2)`.
pub fn namespace_id(file: &File) -> Result<NamespaceId> {
    let meta = file.metadata()?;
    Ok(NamespaceId::new(meta.dev(), meta.ino()))
}

/// Identity of the namespace at `path`, following symlinks
///
/// # Errors
/// Returns the I/O error of `stat(2)`.
pub fn namespace_id_of_path(path: &Path) -> Result<NamespaceId> {
    let meta = std::fs::metadata(path)?;
    Ok(NamespaceId::new(meta.dev(), meta.ino()))
}

fn owned_file(fd: libc::c_int) -> File {
    // SAFETY: the ioctl returned a fresh file descriptor we now own.
    File::from(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// The user namespace owning the namespace `file` refers to
///
/// # Errors
/// `EPERM` if the owner is outside the caller's user namespace, `ENOTTY`
/// if `file` is no namespace.
pub fn owning_user_namespace(file: &File) -> Result<File> {
    // SAFETY: NS_GET_USERNS takes no argument.
    let fd = unsafe { ns_get_userns(file.as_raw_fd()) }?;
    Ok(owned_file(fd))
}

/// The parent of a PID or user namespace
///
/// # Errors
/// `EPERM` for a root namespace or if the parent is out of reach, `EINVAL`
/// for non-hierarchical namespaces.
pub fn parent_namespace(file: &File) -> Result<File> {
    // SAFETY: NS_GET_PARENT takes no argument.
    let fd = unsafe { ns_get_parent(file.as_raw_fd()) }?;
    Ok(owned_file(fd))
}

/// Species of the namespace `file` refers to
///
/// # Errors
/// Fails for files that are no namespaces or unknown species.
pub fn namespace_type(file: &File) -> Result<NamespaceType> {
    // SAFETY: NS_GET_NSTYPE takes no argument.
    let flag = unsafe { ns_get_nstype(file.as_raw_fd()) }?;
    u64::try_from(flag)
        .ok()
        .and_then(NamespaceType::from_clone_flag)
        .ok_or_else(|| Error::Namespace {
            message: format!("unknown namespace type flag {flag:#x}"),
        })
}

/// UID of the creator of the user namespace `file` refers to
///
/// # Errors
/// `EINVAL` if `file` is no user namespace.
pub fn owner_uid(file: &File) -> Result<u32> {
    let mut uid: libc::uid_t = 0;
    // SAFETY: NS_GET_OWNER_UID writes one uid_t into the pointed-to value.
    unsafe { ns_get_owner_uid(file.as_raw_fd(), &raw mut uid) }?;
    Ok(uid)
}

/// Identity of the user namespace owning the namespace `file` refers to
///
/// # Errors
/// See [`owning_user_namespace`].
pub fn owner_id(file: &File) -> Result<NamespaceId> {
    namespace_id(&owning_user_namespace(file)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_namespaces() {
        let file = open_namespace(Path::new("/proc/self/ns/net")).unwrap();
        assert_eq!(namespace_type(&file).unwrap(), NamespaceType::Net);
        let id = namespace_id(&file).unwrap();
        assert_eq!(namespace_id_of_path(Path::new("/proc/self/ns/net")).unwrap(), id);
    }

    #[test]
    fn test_user_namespace_queries() {
        let user = open_namespace(Path::new("/proc/self/ns/user")).unwrap();
        assert_eq!(namespace_type(&user).unwrap(), NamespaceType::User);
        // Creator UID is always readable for our own user namespace.
        assert!(owner_uid(&user).is_ok());

        let net = open_namespace(Path::new("/proc/self/ns/net")).unwrap();
        assert!(owner_uid(&net).is_err());
        assert!(parent_namespace(&net).is_err());
    }

    #[test]
    fn test_owner_of_own_net_namespace() {
        let net = open_namespace(Path::new("/proc/self/ns/net")).unwrap();
        let user_id = namespace_id_of_path(Path::new("/proc/self/ns/user")).unwrap();
        assert_eq!(owner_id(&net).unwrap(), user_id);
    }

    #[test]
    fn test_not_a_namespace() {
        let file = File::open("/proc/self/stat").unwrap();
        assert!(namespace_type(&file).is_err());
    }
}
