//! Authentication hook for the connection handshake.
//!
//! Dormkeep doesn't issue or verify credentials itself. The first frame
//! on a connection carries an opaque token; an [`Authenticator`] turns it
//! into a [`Caller`] (or refuses it), and the caller's role is what the
//! access guard checks from then on.

use std::collections::HashMap;
use std::future::Future;

use dormkeep_protocol::Caller;

/// Why a handshake token was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no token presented")]
    MissingToken,

    #[error("token not recognised")]
    InvalidToken,
}

/// Resolves a handshake token to a caller.
///
/// Plug in JWT validation, an auth service call, or a fixed table
/// ([`TokenAuthenticator`]).
///
/// # Example
///
/// ```rust
/// use dormkeep::{AuthError, Authenticator};
/// use dormkeep_protocol::Caller;
///
/// /// Everyone with any token is a student named after it.
/// struct Permissive;
///
/// impl Authenticator for Permissive {
///     async fn authenticate(&self, token: &str) -> Result<Caller, AuthError> {
///         if token.is_empty() {
///             return Err(AuthError::MissingToken);
///         }
///         Ok(Caller::student(token))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// `token` is empty when the client sent none.
    fn authenticate(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Caller, AuthError>> + Send;
}

/// Maps fixed tokens to callers.
///
/// Suitable for deployments where the admin and student tokens are
/// provisioned out of band (the `dormkeepd` flags).
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, Caller>,
}

impl TokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` for `caller`, replacing any earlier entry.
    pub fn with_token(mut self, token: impl Into<String>, caller: Caller) -> Self {
        self.tokens.insert(token.into(), caller);
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}
