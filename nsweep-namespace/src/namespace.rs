//! Namespace graph nodes
//!
//! Every namespace is a [`Namespace`] carrying the properties common to all
//! species; what differs between species lives in its [`NamespaceKind`]:
//! plain namespaces have no relatives of their own type, PID namespaces
//! form a hierarchy, and user namespaces additionally own namespaces of all
//! other species. Relations are stored as identities and resolved through
//! [`crate::AllNamespaces`] and [`crate::ProcessTable`].

use nsweep_core::{NAMESPACE_TYPES, NamespaceId, NamespaceRef, NamespaceType, ProcessId};
use serde::Serialize;

use crate::process::{Process, ProcessTable};

/// A discovered namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespace {
    id: NamespaceId,
    #[serde(rename = "type")]
    ns_type: NamespaceType,
    reference: NamespaceRef,
    leaders: Vec<ProcessId>,
    owner_id: Option<NamespaceId>,
    owner: Option<NamespaceId>,
    kind: NamespaceKind,
}

/// Species-specific part of a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NamespaceKind {
    /// Mount, cgroup, UTS, IPC, network and time namespaces
    Plain,
    /// PID namespaces
    Hierarchical(Hierarchy),
    /// User namespaces
    User(UserDetails),
}

/// Parent and children of a hierarchical namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Hierarchy {
    /// Parent namespace, absent for roots
    pub parent: Option<NamespaceId>,
    /// Child namespaces
    pub children: Vec<NamespaceId>,
}

/// Ownership bookkeeping of a user namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserDetails {
    /// Parent and children user namespaces
    pub hierarchy: Hierarchy,
    /// UID of the process that created this user namespace
    pub owner_uid: Option<u32>,
    /// Owned namespaces of the other species, indexed by species slot
    pub owned: [Vec<NamespaceId>; NAMESPACE_TYPES],
}

impl Namespace {
    /// Create a namespace node of the shape matching its species
    #[must_use]
    pub fn new(id: NamespaceId, ns_type: NamespaceType, reference: NamespaceRef) -> Self {
        let kind = match ns_type {
            NamespaceType::User => NamespaceKind::User(UserDetails::default()),
            NamespaceType::Pid => NamespaceKind::Hierarchical(Hierarchy::default()),
            _ => NamespaceKind::Plain,
        };
        Self {
            id,
            ns_type,
            reference,
            leaders: Vec::new(),
            owner_id: None,
            owner: None,
            kind,
        }
    }

    /// Identity
    #[must_use]
    pub const fn id(&self) -> NamespaceId {
        self.id
    }

    /// Species
    #[must_use]
    pub const fn ns_type(&self) -> NamespaceType {
        self.ns_type
    }

    /// Paths addressing this namespace; empty if hidden
    #[must_use]
    pub const fn reference(&self) -> &NamespaceRef {
        &self.reference
    }

    /// Whether no path is known to address this namespace
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.reference.is_empty()
    }

    /// Topmost processes joined to this namespace
    #[must_use]
    pub fn leaders(&self) -> &[ProcessId] {
        &self.leaders
    }

    /// The leader process started first
    #[must_use]
    pub fn ealdorman<'a>(&self, processes: &'a ProcessTable) -> Option<&'a Process> {
        self.leaders
            .iter()
            .filter_map(|pid| processes.get(*pid))
            .min_by_key(|p| p.starttime)
    }

    /// Identity of the owning user namespace as reported by the kernel
    #[must_use]
    pub const fn owner_id(&self) -> Option<NamespaceId> {
        self.owner_id
    }

    /// Owning user namespace, once ownership has been resolved.
    ///
    /// For user namespaces this is their parent.
    #[must_use]
    pub fn owner(&self) -> Option<NamespaceId> {
        match &self.kind {
            NamespaceKind::User(user) => user.hierarchy.parent,
            _ => self.owner,
        }
    }

    /// Species-specific part
    #[must_use]
    pub const fn kind(&self) -> &NamespaceKind {
        &self.kind
    }

    /// Parent and children, for PID and user namespaces
    #[must_use]
    pub const fn hierarchy(&self) -> Option<&Hierarchy> {
        match &self.kind {
            NamespaceKind::Plain => None,
            NamespaceKind::Hierarchical(h) => Some(h),
            NamespaceKind::User(user) => Some(&user.hierarchy),
        }
    }

    /// Parent namespace of a hierarchical namespace
    #[must_use]
    pub fn parent(&self) -> Option<NamespaceId> {
        self.hierarchy().and_then(|h| h.parent)
    }

    /// Child namespaces of a hierarchical namespace
    #[must_use]
    pub fn children(&self) -> &[NamespaceId] {
        self.hierarchy().map_or(&[], |h| h.children.as_slice())
    }

    /// Ownership details, for user namespaces
    #[must_use]
    pub const fn user(&self) -> Option<&UserDetails> {
        match &self.kind {
            NamespaceKind::User(user) => Some(user),
            _ => None,
        }
    }

    /// UID of the creator, for user namespaces
    #[must_use]
    pub fn owner_uid(&self) -> Option<u32> {
        self.user().and_then(|u| u.owner_uid)
    }

    /// Namespaces of `ns_type` owned by this user namespace
    #[must_use]
    pub fn owned(&self, ns_type: NamespaceType) -> &[NamespaceId] {
        self.user()
            .map_or(&[], |u| u.owned[ns_type.index()].as_slice())
    }

    pub(crate) fn hierarchy_mut(&mut self) -> Option<&mut Hierarchy> {
        match &mut self.kind {
            NamespaceKind::Plain => None,
            NamespaceKind::Hierarchical(h) => Some(h),
            NamespaceKind::User(user) => Some(&mut user.hierarchy),
        }
    }

    pub(crate) fn user_mut(&mut self) -> Option<&mut UserDetails> {
        match &mut self.kind {
            NamespaceKind::User(user) => Some(user),
            _ => None,
        }
    }

    pub(crate) fn set_reference(&mut self, reference: NamespaceRef) {
        self.reference = reference;
    }

    pub(crate) fn add_leader(&mut self, pid: ProcessId) {
        if !self.leaders.contains(&pid) {
            self.leaders.push(pid);
        }
    }

    pub(crate) fn clear_leaders(&mut self) {
        self.leaders.clear();
    }

    pub(crate) fn set_owner_id(&mut self, owner_id: NamespaceId) {
        self.owner_id = Some(owner_id);
    }

    pub(crate) fn set_owner(&mut self, owner: NamespaceId) {
        self.owner = Some(owner);
    }

    pub(crate) fn set_owner_uid(&mut self, uid: u32) {
        if let Some(user) = self.user_mut() {
            user.owner_uid = Some(uid);
        }
    }
}
