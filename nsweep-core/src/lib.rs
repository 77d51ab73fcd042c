//! nsweep Core - Namespace identities, species and errors
//!
//! This crate provides the core types shared by the discovery engine and its
//! front-ends.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{NAMESPACE_TYPES, NamespaceId, NamespaceRef, NamespaceType, ProcessId};
