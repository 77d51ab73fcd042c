//! Symlink evaluation confined to a contents root

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use nsweep_core::{NamespaceType, Result};

/// Maximum number of symlinks followed while resolving one path.
const MAX_SYMLINKS: usize = 40;

fn components(path: &Path) -> impl Iterator<Item = OsString> + '_ {
    path.components().filter_map(|c| match c {
        Component::Normal(name) => Some(name.to_os_string()),
        Component::ParentDir => Some(OsString::from("..")),
        Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
    })
}

/// Resolve `path` as if `root` were `/`.
///
/// Absolute symlink targets restart at `root` and `..` never climbs above
/// it. Links to namespaces (`net:[…]` targets of procfs magic links) are
/// not followed. Missing components are kept literally.
///
/// # Errors
/// Fails on symlink loops and on I/O errors other than a missing entry.
pub fn resolve_in_root(root: &Path, path: &Path) -> Result<PathBuf> {
    let host = |inner: &Path| -> PathBuf {
        let relative = inner.strip_prefix("/").unwrap_or(inner);
        if root.as_os_str().is_empty() {
            Path::new("/").join(relative)
        } else {
            root.join(relative)
        }
    };

    let mut resolved = PathBuf::from("/");
    let mut pending: VecDeque<OsString> = components(path).collect();
    let mut followed = 0;

    while let Some(name) = pending.pop_front() {
        if name == ".." {
            resolved.pop();
            continue;
        }
        let candidate = resolved.join(&name);
        let meta = match fs::symlink_metadata(host(&candidate)) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                resolved = candidate;
                resolved.extend(pending.drain(..));
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.file_type().is_symlink() {
            resolved = candidate;
            continue;
        }
        let target = fs::read_link(host(&candidate))?;
        if target
            .to_str()
            .and_then(NamespaceType::parse_text)
            .is_some()
        {
            resolved = candidate;
            continue;
        }
        followed += 1;
        if followed > MAX_SYMLINKS {
            return Err(io::Error::other(format!(
                "too many levels of symbolic links resolving {}",
                path.display()
            ))
            .into());
        }
        if target.is_absolute() {
            resolved = PathBuf::from("/");
        }
        for name in components(&target).collect::<Vec<_>>().into_iter().rev() {
            pending.push_front(name);
        }
    }
    Ok(host(&resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::write(root.join("b/file"), "canary").unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        symlink("/b", root.join("a/abs")).unwrap();
        symlink("../b", root.join("a/rel")).unwrap();
        symlink("/../../../b", root.join("a/escape")).unwrap();
        symlink("loop2", root.join("loop1")).unwrap();
        symlink("loop1", root.join("loop2")).unwrap();
        symlink("net:[4026531993]", root.join("nslink")).unwrap();
        dir
    }

    #[test]
    fn test_absolute_links_stay_inside_root() {
        let dir = fixture();
        let root = dir.path();
        let resolved = resolve_in_root(root, Path::new("/a/abs/file")).unwrap();
        assert_eq!(resolved, root.join("b/file"));
        assert_eq!(fs::read_to_string(resolved).unwrap(), "canary");

        let resolved = resolve_in_root(root, Path::new("/a/escape/file")).unwrap();
        assert_eq!(resolved, root.join("b/file"));
    }

    #[test]
    fn test_relative_links_and_dotdot() {
        let dir = fixture();
        let root = dir.path();
        assert_eq!(
            resolve_in_root(root, Path::new("/a/rel/file")).unwrap(),
            root.join("b/file")
        );
        assert_eq!(
            resolve_in_root(root, Path::new("/../../b/./file")).unwrap(),
            root.join("b/file")
        );
    }

    #[test]
    fn test_missing_and_namespace_links() {
        let dir = fixture();
        let root = dir.path();
        assert_eq!(
            resolve_in_root(root, Path::new("/missing/x/y")).unwrap(),
            root.join("missing/x/y")
        );
        assert_eq!(
            resolve_in_root(root, Path::new("/nslink")).unwrap(),
            root.join("nslink")
        );
    }

    #[test]
    fn test_symlink_loop() {
        let dir = fixture();
        assert!(resolve_in_root(dir.path(), Path::new("/loop1")).is_err());
    }

    #[test]
    fn test_empty_root_is_own_view() {
        let dir = fixture();
        let file = dir.path().join("b/file");
        let resolved = resolve_in_root(Path::new(""), &file).unwrap();
        assert_eq!(fs::read_to_string(resolved).unwrap(), "canary");
    }
}
