//! JSON message types for the discovery and join-handshake protocols.
//!
//! Every payload exchanged on a Peershare data connection is a single JSON
//! object whose `"type"` field identifies the variant.  All other fields sit
//! beside it in the same object:
//!
//! ```json
//! {"type":"register","code":"ABC","timestamp":1700000000000,"isPrivate":false}
//! {"type":"pin_validated","success":true}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute handles the discriminant, and
//! `rename_all = "snake_case"` turns `RegisterAck` into `"register_ack"`.
//!
//! # Two message families
//!
//! - [`DiscoveryMessage`] travels between any peer and the discovery host.
//! - [`HandshakeMessage`] travels between a host and one joiner while the
//!   joiner negotiates admission.
//!
//! Keeping them as separate enums means a handshake driver can never be
//! handed a `list_response` by mistake: decoding into the wrong family fails.

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::session::SessionRecord;

/// Denial reason a host sends to pending joiners when it stops hosting.
///
/// Joiners compare against this exact string to tell an administrative
/// teardown apart from an operator's refusal.
pub const SESSION_ENDED_REASON: &str = "Session ended";

// ── Discovery messages ────────────────────────────────────────────────────────

/// Messages exchanged with the discovery host.
///
/// # Serde representation
///
/// ```json
/// {"type":"register","code":"K7M2...","timestamp":1700000000000,"name":"Studio","isPrivate":true}
/// {"type":"register_ack","code":"K7M2...","success":true}
/// {"type":"unregister","code":"K7M2..."}
/// {"type":"list"}
/// {"type":"list_response","sessions":[...]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryMessage {
    /// A host announces (or refreshes) its session.
    Register {
        code: String,

        /// Creation time in milliseconds since the Unix epoch.
        ///
        /// The discovery host falls back to its own clock when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,

        #[serde(
            rename = "isPrivate",
            default,
            deserialize_with = "deserialize_strict_bool"
        )]
        is_private: bool,
    },

    /// Reply to [`DiscoveryMessage::Register`].
    RegisterAck { code: String, success: bool },

    /// A host withdraws its session.  The discovery host never replies.
    Unregister { code: String },

    /// Request for the live session list.
    List,

    /// Reply to [`DiscoveryMessage::List`].
    ListResponse { sessions: Vec<SessionRecord> },
}

// ── Handshake messages ────────────────────────────────────────────────────────

/// Messages exchanged between a host and a joiner during admission.
///
/// | type                | direction     |
/// |---------------------|---------------|
/// | `pin_request`       | host → joiner |
/// | `pin_response`      | joiner → host |
/// | `pin_validated`     | host → joiner |
/// | `name_request`      | host → joiner |
/// | `name_response`     | joiner → host |
/// | `approval_pending`  | host → joiner |
/// | `approval_approved` | host → joiner |
/// | `approval_denied`   | host → joiner |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeMessage {
    PinRequest,

    /// The joiner's PIN attempt.  An empty string means the human cancelled.
    PinResponse {
        #[serde(default)]
        pin: String,
    },

    PinValidated { success: bool },

    NameRequest,

    /// The joiner's optional display name.  Serialized as `null` when absent.
    NameResponse {
        #[serde(default)]
        name: Option<String>,
    },

    ApprovalPending,

    ApprovalApproved,

    ApprovalDenied {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl HandshakeMessage {
    /// Returns the wire discriminant, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PinRequest => "pin_request",
            Self::PinResponse { .. } => "pin_response",
            Self::PinValidated { .. } => "pin_validated",
            Self::NameRequest => "name_request",
            Self::NameResponse { .. } => "name_response",
            Self::ApprovalPending => "approval_pending",
            Self::ApprovalApproved => "approval_approved",
            Self::ApprovalDenied { .. } => "approval_denied",
        }
    }

    /// Builds the denial sent to pending joiners when the host stops.
    pub fn session_ended() -> Self {
        Self::ApprovalDenied {
            reason: Some(SESSION_ENDED_REASON.to_string()),
        }
    }
}

// ── Field helpers ─────────────────────────────────────────────────────────────

/// Deserializes any JSON value into a definite boolean.
///
/// Only the literal `true` maps to `true`.  Strings, numbers, `null`, and
/// missing fields all become `false`, so privacy is normalised once at
/// ingestion and never re-interpreted later.
pub(crate) fn deserialize_strict_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value == serde_json::Value::Bool(true))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
