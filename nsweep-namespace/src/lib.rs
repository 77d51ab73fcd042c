//! Discovery of Linux namespaces and their relations
//!
//! This crate finds the namespaces present on a host, including those no
//! process is joined to:
//! - Namespaces joined by processes, with their leader processes
//! - Namespaces held open by file descriptors
//! - Namespaces bind-mounted in any reachable mount namespace
//! - Hidden PID and user namespaces known only as ancestors
//!
//! and relates them: PID and user namespace hierarchies, owning user
//! namespaces, PID translation between PID namespaces and owner names.
//!
//! # Example
//! ```no_run
//! use nsweep_core::NamespaceType;
//! use nsweep_namespace::{DiscoverOptions, discover};
//!
//! let result = discover(&DiscoverOptions::default()).unwrap();
//! for ns in result.sorted_namespaces(NamespaceType::Net) {
//!     println!("{} {}", ns.id(), ns.reference());
//! }
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod config;
pub mod containers;
pub mod discovery;
pub mod gateway;
pub mod graph;
pub mod mountinfo;
pub mod namespace;
pub mod ops;
pub mod pidmap;
pub mod process;
pub mod usernames;

pub use config::{DiscoverOptions, NamespaceFlags};
pub use containers::{Container, Containerizer, MockContainerizer, discover_with_containers};
pub use discovery::{DISCOVERY_SEQUENCE, Diagnostics, DiscoveryResult, discover};
pub use gateway::{MountGateway, Sandbox, open_reference};
pub use graph::AllNamespaces;
pub use mountinfo::MountInfo;
pub use namespace::{Hierarchy, Namespace, NamespaceKind, UserDetails};
pub use pidmap::{NamespacedPid, PidMap};
pub use process::{Process, ProcessTable};
pub use usernames::{NameSource, UserNames, resolve_owner_names};
