//! Unified error type for the Dormkeep service.

use dormkeep_allocation::AllocationError;
use dormkeep_protocol::{ErrorKind, ProtocolError};
use dormkeep_transport::TransportError;

use crate::{AuthError, Forbidden};

/// Top-level error wrapping every layer's errors.
///
/// `#[from]` on each variant lets `?` lift sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum DormkeepError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Forbidden(#[from] Forbidden),
}

impl DormkeepError {
    /// Wire category reported to the client.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Allocation(e) => e.kind(),
            Self::Auth(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Protocol(_) => ErrorKind::BadRequest,
            Self::Transport(_) => ErrorKind::Internal,
        }
    }

    /// Numeric status code, HTTP-flavoured.
    pub fn code(&self) -> u16 {
        match self {
            Self::Allocation(e) => e.code(),
            Self::Auth(_) => 401,
            Self::Forbidden(_) => 403,
            Self::Protocol(_) => 400,
            Self::Transport(_) => 500,
        }
    }
}
