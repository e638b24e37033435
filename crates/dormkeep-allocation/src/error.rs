//! Error types for the allocation layer.

use std::fmt;

use dormkeep_protocol::{ErrorKind, RoomId, StudentId};

/// The kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Room(RoomId),
    Student(StudentId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room(id) => write!(f, "room {id}"),
            Self::Student(id) => write!(f, "student {id}"),
        }
    }
}

/// Faults raised by a [`Store`](crate::Store) implementation.
///
/// These are never domain outcomes: a full room is an
/// [`AllocationError::CapacityExceeded`], not a `StoreError`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned")]
    Poisoned,

    /// The batch contradicted the stored records and was rolled back.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The backing storage could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by [`AllocationEngine`](crate::AllocationEngine)
/// operations.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// The referenced room or student does not exist.
    #[error("{0} not found")]
    NotFound(Entity),

    /// A uniqueness rule was violated (room number or email).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The room had no free slot at commit time.
    #[error("room {0} is at capacity")]
    CapacityExceeded(RoomId),

    /// The operation doesn't apply to the current state, e.g. releasing a
    /// student who holds no room.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Input failed validation before anything was locked.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Locks could not be acquired before the configured timeout. Nothing
    /// was written; the caller may retry.
    #[error("{operation} timed out waiting for locks")]
    Busy { operation: &'static str },

    /// Unexpected storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AllocationError {
    /// Wire category for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Numeric status code, HTTP-flavoured.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Conflict(_) | Self::CapacityExceeded(_) => 409,
            Self::InvalidState(_) => 422,
            Self::Validation(_) => 400,
            Self::Busy { .. } => 503,
            Self::Store(_) => 500,
        }
    }

    /// Returns `true` if repeating the same call may succeed without the
    /// caller changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}
