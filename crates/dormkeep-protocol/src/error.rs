//! Error types for the protocol layer.
//!
//! Each crate in Dormkeep defines its own error enum. A `ProtocolError`
//! always means the bytes or the message shape were wrong, never that a
//! room was full or a student missing.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, an unknown request `type`, or a
    /// field with the wrong shape (e.g. a negative capacity).
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded fine but breaks a protocol rule, e.g. a
    /// request sent before `Hello`.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
