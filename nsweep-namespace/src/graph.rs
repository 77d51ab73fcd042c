//! The per-species namespace maps and their relations

use std::collections::BTreeMap;

use nsweep_core::{Error, NAMESPACE_TYPES, NamespaceId, NamespaceRef, NamespaceType, Result};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::namespace::Namespace;

/// All discovered namespaces, one map per species
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllNamespaces {
    maps: [BTreeMap<NamespaceId, Namespace>; NAMESPACE_TYPES],
}

impl AllNamespaces {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespaces of one species, keyed by identity
    #[must_use]
    pub fn of_type(&self, ns_type: NamespaceType) -> &BTreeMap<NamespaceId, Namespace> {
        &self.maps[ns_type.index()]
    }

    /// Look up a namespace
    #[must_use]
    pub fn get(&self, ns_type: NamespaceType, id: NamespaceId) -> Option<&Namespace> {
        self.maps[ns_type.index()].get(&id)
    }

    pub(crate) fn get_mut(&mut self, ns_type: NamespaceType, id: NamespaceId) -> Option<&mut Namespace> {
        self.maps[ns_type.index()].get_mut(&id)
    }

    /// Whether a namespace is known
    #[must_use]
    pub fn contains(&self, ns_type: NamespaceType, id: NamespaceId) -> bool {
        self.maps[ns_type.index()].contains_key(&id)
    }

    /// Total number of namespaces over all species
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.iter().map(BTreeMap::len).sum()
    }

    /// Whether no namespace is known at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.iter().all(BTreeMap::is_empty)
    }

    /// All namespaces, species in slot order, identities ascending
    pub fn iter(&self) -> impl Iterator<Item = &Namespace> {
        self.maps.iter().flat_map(BTreeMap::values)
    }

    /// Record a namespace on first sighting.
    ///
    /// Returns the node and whether it was newly created. An existing node
    /// keeps its reference.
    pub(crate) fn insert_new(
        &mut self,
        ns_type: NamespaceType,
        id: NamespaceId,
        reference: NamespaceRef,
    ) -> (&mut Namespace, bool) {
        let map = &mut self.maps[ns_type.index()];
        let created = !map.contains_key(&id);
        let ns = map
            .entry(id)
            .or_insert_with(|| Namespace::new(id, ns_type, reference));
        (ns, created)
    }

    /// Roots of a hierarchical species: namespaces without a known parent
    #[must_use]
    pub fn roots(&self, ns_type: NamespaceType) -> Vec<&Namespace> {
        if !ns_type.is_hierarchical() {
            return Vec::new();
        }
        self.maps[ns_type.index()]
            .values()
            .filter(|ns| ns.parent().is_none())
            .collect()
    }

    /// Ancestors of a hierarchical namespace, starting with its parent
    #[must_use]
    pub fn ancestors(&self, ns_type: NamespaceType, id: NamespaceId) -> Vec<NamespaceId> {
        let map = &self.maps[ns_type.index()];
        let mut chain = Vec::new();
        let mut current = map.get(&id).and_then(Namespace::parent);
        while let Some(parent) = current {
            // Parent edges are checked on insertion, so a repeat means a cycle.
            if chain.contains(&parent) || chain.len() > map.len() {
                break;
            }
            chain.push(parent);
            current = map.get(&parent).and_then(Namespace::parent);
        }
        chain
    }

    /// Link `child` under `parent` within a hierarchical species.
    ///
    /// Re-adding an existing edge is a no-op. Both namespaces must already
    /// be known.
    ///
    /// # Errors
    /// [`Error::Reparent`] if `child` already has a different parent,
    /// [`Error::KernelContract`] if the edge would close a cycle, and
    /// [`Error::Namespace`] if either end is unknown or not hierarchical.
    pub fn add_child(
        &mut self,
        ns_type: NamespaceType,
        parent: NamespaceId,
        child: NamespaceId,
    ) -> Result<()> {
        if parent == child {
            return Err(Error::Namespace {
                message: format!("{ns_type} namespace {child} cannot be its own parent"),
            });
        }
        if !self.contains(ns_type, parent) {
            return Err(Error::Namespace {
                message: format!("unknown parent {ns_type} namespace {parent}"),
            });
        }
        let existing = self
            .get(ns_type, child)
            .and_then(Namespace::hierarchy)
            .ok_or_else(|| Error::Namespace {
                message: format!("{ns_type} namespace {child} is unknown or not hierarchical"),
            })?
            .parent;
        match existing {
            Some(existing) if existing == parent => return Ok(()),
            Some(existing) => {
                return Err(Error::Reparent {
                    ns_type,
                    namespace: child,
                    existing,
                    requested: parent,
                });
            }
            None => {}
        }
        if self.ancestors(ns_type, parent).contains(&child) {
            return Err(Error::KernelContract {
                message: format!("{ns_type} namespace {child} is an ancestor of {parent}"),
            });
        }

        let map = &mut self.maps[ns_type.index()];
        if let Some(h) = map.get_mut(&child).and_then(Namespace::hierarchy_mut) {
            h.parent = Some(parent);
        }
        if let Some(h) = map.get_mut(&parent).and_then(Namespace::hierarchy_mut) {
            if !h.children.contains(&child) {
                h.children.push(child);
            }
        }
        Ok(())
    }
}

/// Link a non-user namespace to the user namespace owning it, in both
/// directions.
///
/// Returns `false` when the namespace has no recorded owner identity or the
/// owning user namespace is unknown.
pub fn resolve_owner(namespaces: &mut AllNamespaces, ns_type: NamespaceType, id: NamespaceId) -> bool {
    if ns_type == NamespaceType::User {
        return false;
    }
    let Some(owner_id) = namespaces.get(ns_type, id).and_then(Namespace::owner_id) else {
        return false;
    };
    let Some(user) = namespaces
        .get_mut(NamespaceType::User, owner_id)
        .and_then(Namespace::user_mut)
    else {
        return false;
    };
    let owned = &mut user.owned[ns_type.index()];
    if !owned.contains(&id) {
        owned.push(id);
    }
    if let Some(ns) = namespaces.get_mut(ns_type, id) {
        ns.set_owner(owner_id);
    }
    true
}

impl Serialize for AllNamespaces {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NAMESPACE_TYPES))?;
        for ns_type in NamespaceType::ALL {
            let list: Vec<&Namespace> = self.maps[ns_type.index()].values().collect();
            map.serialize_entry(ns_type.name(), &list)?;
        }
        map.end()
    }
}
