//! JSON codec for Peershare data-connection payloads.
//!
//! Wire format: one UTF-8 JSON object per transport message, with a string
//! `"type"` field.  The transport already frames messages, so there is no
//! length prefix or header.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Largest payload the decoder will attempt to parse.
///
/// A `list_response` carrying a few hundred sessions stays well below this.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The payload exceeds [`MAX_PAYLOAD_BYTES`].
    #[error("payload too large: {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The payload is valid JSON but has no string `"type"` field.
    #[error("payload has no \"type\" discriminant")]
    MissingType,

    /// The payload could not be parsed (not JSON, unknown type, bad field).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a protocol message into its JSON text form.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use peershare_core::protocol::{encode, HandshakeMessage};
///
/// let text = encode(&HandshakeMessage::PinRequest).unwrap();
/// assert_eq!(text, r#"{"type":"pin_request"}"#);
/// ```
pub fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes one protocol message from a JSON payload.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the payload is oversized, lacks a `"type"`
/// field, or does not match any variant of `T`.
pub fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }

    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;

    if !value.get("type").map_or(false, serde_json::Value::is_string) {
        return Err(ProtocolError::MissingType);
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
