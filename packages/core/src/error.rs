//! Error types shared by both sides of the enclosure boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tunnel::TunnelId;

/// Discriminant of an [`Error`], stable across the host/worker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    DuplicateName,
    MissingParent,
    UnknownEnclosure,
    NoParent,
    NameCollision,
    InvalidName,
    UnknownTunnel,
    DuplicateDependency,
    MissingDependency,
    TooManyImports,
    TooManyArguments,
    ShadowedArgument,
    InvalidDependency,
    UnresolvedDependencies,
    InvalidEventName,
    InvalidFilter,
    Script,
    Deleted,
    Stopped,
    Unresponsive,
    BootTimeout,
    UnknownMessage,
    InvalidMessage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The serialized form of an error, as carried by a `reject` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Errors raised by enclosure, event, dependency and tunnel operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An enclosure with this name already exists.
    #[error("enclosure already exists: {0}")]
    DuplicateName(String),

    /// The parent of the named enclosure does not exist.
    #[error("parent enclosure does not exist: {0}")]
    MissingParent(String),

    #[error("unknown enclosure: {0}")]
    UnknownEnclosure(String),

    /// A root enclosure cannot be merged.
    #[error("enclosure has no parent: {0}")]
    NoParent(String),

    /// Renaming a descendant during merge would clobber an existing enclosure.
    #[error("merge would collide with existing enclosure: {0}")]
    NameCollision(String),

    #[error("invalid enclosure name: {0:?}")]
    InvalidName(String),

    #[error("unknown tunnel: {0}")]
    UnknownTunnel(TunnelId),

    #[error("dependency already defined: {0}")]
    DuplicateDependency(String),

    /// Imports that could not be resolved in the enclosure.
    #[error("missing dependencies: {}", .0.join(", "))]
    MissingDependency(Vec<String>),

    #[error("too many imports: {count} (limit {limit})")]
    TooManyImports { count: usize, limit: usize },

    #[error("too many arguments: {count} (limit {limit})")]
    TooManyArguments { count: usize, limit: usize },

    /// Argument names that collide with an import or reserved binding.
    #[error("arguments shadow bindings: {}", .0.join(", "))]
    ShadowedArgument(Vec<String>),

    #[error("invalid dependency: {0}")]
    InvalidDependency(String),

    /// A dependency set could not be ordered.
    #[error(
        "unresolved dependencies: {} (missing: {})",
        .pending.join(", "),
        .missing.join(", ")
    )]
    UnresolvedDependencies {
        pending: Vec<String>,
        missing: Vec<String>,
    },

    #[error("invalid event name: {0:?}")]
    InvalidEventName(String),

    #[error("invalid event filter: {0:?}")]
    InvalidFilter(String),

    /// The code body of a dependency threw.
    #[error("script error: {0}")]
    Script(String),

    /// The owning enclosure (or the VM) was deleted.
    #[error("deleted")]
    Deleted,

    #[error("stopped")]
    Stopped,

    #[error("worker unresponsive")]
    Unresponsive,

    #[error("worker did not boot within {0} ms")]
    BootTimeout(u64),

    #[error("unknown message: {0}")]
    UnknownMessage(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// An error reported by the other side of the boundary.
    #[error("{}", .0.message)]
    Remote(WireError),
}

impl Error {
    /// The discriminant of this error, looking through [`Error::Remote`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateName(_) => ErrorKind::DuplicateName,
            Error::MissingParent(_) => ErrorKind::MissingParent,
            Error::UnknownEnclosure(_) => ErrorKind::UnknownEnclosure,
            Error::NoParent(_) => ErrorKind::NoParent,
            Error::NameCollision(_) => ErrorKind::NameCollision,
            Error::InvalidName(_) => ErrorKind::InvalidName,
            Error::UnknownTunnel(_) => ErrorKind::UnknownTunnel,
            Error::DuplicateDependency(_) => ErrorKind::DuplicateDependency,
            Error::MissingDependency(_) => ErrorKind::MissingDependency,
            Error::TooManyImports { .. } => ErrorKind::TooManyImports,
            Error::TooManyArguments { .. } => ErrorKind::TooManyArguments,
            Error::ShadowedArgument(_) => ErrorKind::ShadowedArgument,
            Error::InvalidDependency(_) => ErrorKind::InvalidDependency,
            Error::UnresolvedDependencies { .. } => ErrorKind::UnresolvedDependencies,
            Error::InvalidEventName(_) => ErrorKind::InvalidEventName,
            Error::InvalidFilter(_) => ErrorKind::InvalidFilter,
            Error::Script(_) => ErrorKind::Script,
            Error::Deleted => ErrorKind::Deleted,
            Error::Stopped => ErrorKind::Stopped,
            Error::Unresponsive => ErrorKind::Unresponsive,
            Error::BootTimeout(_) => ErrorKind::BootTimeout,
            Error::UnknownMessage(_) => ErrorKind::UnknownMessage,
            Error::InvalidMessage(_) => ErrorKind::InvalidMessage,
            Error::Remote(wire) => wire.kind,
        }
    }

    /// Convert to the form carried by a `reject` message.
    pub fn to_wire(&self) -> WireError {
        match self {
            Error::Remote(wire) => wire.clone(),
            other => WireError {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}

impl From<WireError> for Error {
    fn from(wire: WireError) -> Self {
        Error::Remote(wire)
    }
}

/// Result type alias for enclosure operations.
pub type Result<T> = std::result::Result<T, Error>;
