//! Error taxonomy shared by every tree operation.

use crate::arena::ArenaError;

/// Errors that can occur during tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Exact-match probe, lookup or delete found no matching key.
    NotFound,
    /// Insert-only operation collided with an existing key.
    AlreadyExists,
    /// Bad order, feature combination, key size, opcode or anchor.
    InvalidArgument(String),
    /// The arena could not satisfy an allocation.
    OutOfMemory { size: usize },
    /// A visibility check reported an in-progress writer. Retry later.
    Conflict,
    /// A persistent structure failed validation.
    Corrupt(String),
    /// A class cannot update a record in place.
    ///
    /// Returned by `TreeClass::rec_update`; the engine falls back to
    /// allocating a new body and never surfaces this variant.
    NoPermission,
    /// A class with this id is already registered.
    AlreadyRegistered(u32),
    /// The handle refers to a destroyed tree.
    Destroyed,
    /// Any other arena fault.
    Arena(ArenaError),
}

impl BTreeError {
    /// Whether the caller should retry the whole operation later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict)
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::AlreadyExists => write!(f, "key already exists"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::OutOfMemory { size } => write!(f, "out of memory allocating {size} bytes"),
            Self::Conflict => write!(f, "conflicting in-progress update, retry later"),
            Self::Corrupt(message) => write!(f, "tree corrupted: {message}"),
            Self::NoPermission => write!(f, "record cannot be changed in place"),
            Self::AlreadyRegistered(class) => write!(f, "tree class {class} already registered"),
            Self::Destroyed => write!(f, "tree has been destroyed"),
            Self::Arena(e) => write!(f, "arena error: {e}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Arena(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ArenaError> for BTreeError {
    fn from(e: ArenaError) -> Self {
        match e {
            ArenaError::OutOfMemory { size } => Self::OutOfMemory { size },
            other => Self::Arena(other),
        }
    }
}
