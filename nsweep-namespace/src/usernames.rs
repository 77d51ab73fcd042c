//! Login names for the owner UIDs of user namespaces
//!
//! Names come from the user database of the initial mount namespace; our
//! own `/etc/passwd` may belong to a container and describe other users.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use nsweep_core::{NamespaceRef, NamespaceType, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::discovery::DiscoveryResult;
use crate::gateway::MountGateway;
use crate::ops;

const PASSWD: &str = "/etc/passwd";

/// Where the names were looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NameSource {
    /// The user database of the initial mount namespace
    InitialMountNamespace,
    /// Our own, possibly non-authoritative, user database
    OwnMountNamespace,
}

/// UID to login name table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserNames {
    names: BTreeMap<u32, String>,
    source: NameSource,
}

/// Parse `passwd(5)` lines into a UID to name map.
///
/// Comments, NIS compat entries and malformed lines are skipped; the first
/// name of a UID wins.
pub fn parse_passwd(reader: impl BufRead) -> BTreeMap<u32, String> {
    let mut names = BTreeMap::new();
    for line in reader.lines().map_while(std::result::Result::ok) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(['+', '-']) {
            continue;
        }
        let mut fields = line.splitn(4, ':');
        let (Some(name), Some(_password), Some(uid)) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };
        if let Ok(uid) = uid.parse::<u32>() {
            names.entry(uid).or_insert_with(|| name.to_string());
        }
    }
    names
}

impl UserNames {
    /// Load the user database of the initial mount namespace, falling back
    /// to our own with a warning.
    #[must_use]
    pub fn load(attach_timeout: Duration) -> Self {
        match Self::from_initial_mount_namespace(attach_timeout) {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Initial mount namespace unreachable, using own user database");
                Self::from_own_mount_namespace()
            }
        }
    }

    fn from_initial_mount_namespace(attach_timeout: Duration) -> Result<Self> {
        let init = Path::new("/proc/1/ns/mnt");
        let initial = ops::namespace_id_of_path(init)?;
        let own = ops::namespace_id_of_path(Path::new("/proc/self/ns/mnt"))?;
        let contents = if initial == own {
            fs::read_to_string(PASSWD)?
        } else {
            let gateway = MountGateway::open(&NamespaceRef::new(init), attach_timeout)?;
            let contents = gateway.read_to_string(Path::new(PASSWD));
            gateway.close();
            contents?
        };
        debug!(%initial, "Read initial user database");
        Ok(Self::from_passwd(contents.as_bytes(), NameSource::InitialMountNamespace))
    }

    fn from_own_mount_namespace() -> Self {
        let contents = fs::read_to_string(PASSWD).unwrap_or_else(|e| {
            warn!(error = %e, "Cannot read own user database");
            String::new()
        });
        Self::from_passwd(contents.as_bytes(), NameSource::OwnMountNamespace)
    }

    /// Names parsed from passwd-formatted text
    #[must_use]
    pub fn from_passwd(reader: impl BufRead, source: NameSource) -> Self {
        Self {
            names: parse_passwd(reader),
            source,
        }
    }

    /// Login name of `uid`
    #[must_use]
    pub fn get(&self, uid: u32) -> Option<&str> {
        self.names.get(&uid).map(String::as_str)
    }

    /// Login name of `uid`, or the number when unknown
    #[must_use]
    pub fn display(&self, uid: u32) -> String {
        self.get(uid).map_or_else(|| uid.to_string(), str::to_string)
    }

    /// Where the names were looked up
    #[must_use]
    pub const fn source(&self) -> NameSource {
        self.source
    }

    /// Keep only the given UIDs
    #[must_use]
    pub fn restricted_to(mut self, uids: &BTreeSet<u32>) -> Self {
        self.names.retain(|uid, _| uids.contains(uid));
        self
    }

    /// Number of known names
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no name is known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Names of the UIDs owning the user namespaces of `result`.
#[must_use]
pub fn resolve_owner_names(result: &DiscoveryResult, attach_timeout: Duration) -> UserNames {
    let uids: BTreeSet<u32> = result
        .namespaces()
        .of_type(NamespaceType::User)
        .values()
        .filter_map(|ns| ns.owner_uid())
        .collect();
    UserNames::load(attach_timeout).restricted_to(&uids)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD_SAMPLE: &str = "\
root:x:0:0:root:/root:/bin/bash
# a comment
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin

+nisuser::::::
broken line
alice:x:1000:1000:Alice,,,:/home/alice:/bin/zsh
toor:x:0:0:second root:/root:/bin/sh
nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin
";

    #[test]
    fn test_parse_passwd() {
        let names = parse_passwd(PASSWD_SAMPLE.as_bytes());
        assert_eq!(names.len(), 4);
        assert_eq!(names[&0], "root");
        assert_eq!(names[&1000], "alice");
        assert_eq!(names[&65534], "nobody");
    }

    #[test]
    fn test_lookup_and_restrict() {
        let names = UserNames::from_passwd(PASSWD_SAMPLE.as_bytes(), NameSource::OwnMountNamespace);
        assert_eq!(names.get(1), Some("daemon"));
        assert_eq!(names.display(4242), "4242");
        assert_eq!(names.source(), NameSource::OwnMountNamespace);

        let names = names.restricted_to(&BTreeSet::from([0, 4242]));
        assert_eq!(names.len(), 1);
        assert_eq!(names.display(0), "root");
    }

    #[test]
    fn test_load_always_yields_table() {
        let names = UserNames::load(Duration::from_secs(5));
        if std::path::Path::new(PASSWD).exists() {
            assert!(!names.is_empty());
        }
    }
}
