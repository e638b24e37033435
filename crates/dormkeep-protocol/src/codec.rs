//! Codec trait and implementations for serializing/deserializing messages.
//!
//! The service front never touches `serde_json` directly: it goes through
//! a [`Codec`], so the wire format can change without touching the
//! handler or the engine.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to bytes and decodes bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task on the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be represented
    /// in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or don't
    /// match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Dashboards and admin tools consume the same frames the tests do, so a
/// human-readable format is the default. Behind the `json` feature
/// (enabled by default).
///
/// ## Example
///
/// ```rust
/// use dormkeep_protocol::{Codec, Envelope, JsonCodec, Payload, Request, RoomId};
///
/// let codec = JsonCodec;
///
/// let envelope = Envelope {
///     seq: 7,
///     payload: Payload::Request(Request::DeleteRoom { room_id: RoomId(3) }),
/// };
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: Envelope = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Envelope, Payload, Request, Response, Topic};

    #[test]
    fn test_decode_garbage_returns_decode_error() {
        let result: Result<Envelope, _> = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_unknown_request_type_is_rejected() {
        let raw = br#"{"seq":1,"payload":{"Request":{"type":"Teleport"}}}"#;
        let result: Result<Envelope, _> = JsonCodec.decode(raw);
        assert!(result.is_err());
    }

    #[test]
    fn test_changed_notice_encodes_topic_by_name() {
        let envelope = Envelope {
            seq: 0,
            payload: Payload::Response(Response::Changed {
                topic: Topic::Rooms,
            }),
        };
        let bytes = JsonCodec.encode(&envelope).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(r#""topic":"rooms""#), "got {text}");
    }

    #[test]
    fn test_hello_decodes_from_hand_written_json() {
        let raw = br#"{"seq":0,"payload":{"Request":{"type":"Hello","version":1,"token":"t"}}}"#;
        let envelope: Envelope = JsonCodec.decode(raw).unwrap();
        assert_eq!(
            envelope.payload,
            Payload::Request(Request::Hello {
                version: 1,
                token: Some("t".into()),
            })
        );
    }
}
