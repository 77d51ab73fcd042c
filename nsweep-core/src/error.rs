//! Error types for nsweep

use std::time::Duration;

use thiserror::Error;

use crate::types::{NamespaceId, NamespaceType};

/// nsweep error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// Namespace operation failed
    #[error("Namespace error: {message}")]
    Namespace {
        /// Error message
        message: String,
    },

    /// Permission denied
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// A namespace reference cannot be used to address a namespace
    #[error("Invalid namespace reference {reference}: {reason}")]
    InvalidReference {
        /// Offending reference, rendered
        reference: String,
        /// Why it was rejected
        reason: String,
    },

    /// Kernel-supplied text could not be parsed
    #[error("Cannot parse {what}: {message}")]
    Parse {
        /// What was being parsed
        what: &'static str,
        /// Error message
        message: String,
    },

    /// Auxiliary sandbox process failed to start or attach
    #[error("Sandbox error: {message}")]
    Sandbox {
        /// Error message
        message: String,
    },

    /// Auxiliary sandbox process did not report back in time
    #[error("Sandbox did not attach within {timeout:?}")]
    SandboxTimeout {
        /// Attach timeout that elapsed
        timeout: Duration,
    },

    /// The kernel answered a namespace query in a way that breaks its documented contract
    #[error("Kernel contract violated: {message}")]
    KernelContract {
        /// Error message
        message: String,
    },

    /// A hierarchical namespace was about to get a second, different parent
    #[error(
        "Cannot re-parent {ns_type} namespace {namespace}: already child of {existing}, not {requested}"
    )]
    Reparent {
        /// Type of the namespaces involved
        ns_type: NamespaceType,
        /// The child namespace
        namespace: NamespaceId,
        /// Parent already recorded
        existing: NamespaceId,
        /// Contradictory parent
        requested: NamespaceId,
    },

    /// The overall discovery deadline expired
    #[error("Deadline exceeded during {phase}")]
    DeadlineExceeded {
        /// Phase that was running
        phase: &'static str,
    },

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether this error aborts a discovery run instead of being absorbed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::KernelContract { .. } | Self::Reparent { .. })
    }

    /// Whether this error stems from missing privileges.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::PermissionDenied { .. } => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::PermissionDenied,
            Self::System(errno) => matches!(errno, nix::Error::EPERM | nix::Error::EACCES),
            _ => false,
        }
    }
}

/// Result type alias for nsweep operations
pub type Result<T> = std::result::Result<T, Error>;
