//! Session codes and discovery registry records.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::protocol::messages::deserialize_strict_bool;

/// Number of characters in a generated session code.
pub const CODE_LENGTH: usize = 18;

/// Characters a session code is drawn from.
///
/// `I`, `O`, `0`, and `1` are left out because they are easy to confuse when
/// a code is read aloud or typed from a screenshot.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
///
/// Session timestamps on the wire use this unit.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── SessionCode ───────────────────────────────────────────────────────────────

/// The shareable identifier of a hosted session.
///
/// A host binds its transport identity to this exact string, so a joiner that
/// knows the code can connect to the host directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(String);

impl SessionCode {
    /// Generates a fresh random code of [`CODE_LENGTH`] characters.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Wraps an existing code string without validation.
    ///
    /// Joiners must be able to reach any identity a host chose, so codes from
    /// links and discovery listings are accepted as-is.
    pub fn from_raw(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns `true` if `code` has the shape of a generated code.
    pub fn is_well_formed(code: &str) -> bool {
        code.len() == CODE_LENGTH && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── SessionRecord ─────────────────────────────────────────────────────────────

/// One advertised session in the discovery registry.
///
/// # Serde representation
///
/// ```json
/// {"code":"ABC","timestamp":1700000000000,"name":"Studio","isPrivate":false}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub code: String,

    /// Creation time in milliseconds since the Unix epoch.
    #[serde(rename = "timestamp")]
    pub created_at_ms: u64,

    /// Host display name, if the host chose one.
    #[serde(rename = "name", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// `true` only when the registering host sent the literal `true`.
    #[serde(
        rename = "isPrivate",
        default,
        deserialize_with = "deserialize_strict_bool"
    )]
    pub is_private: bool,
}

impl SessionRecord {
    pub fn new(
        code: impl Into<String>,
        created_at_ms: u64,
        display_name: Option<String>,
        is_private: bool,
    ) -> Self {
        Self {
            code: code.into(),
            created_at_ms,
            display_name,
            is_private,
        }
    }

    /// Age of the record at `now_ms`.  Records stamped in the future have age zero.
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.created_at_ms))
    }

    /// Returns `true` once the record is strictly older than `lifetime`.
    pub fn is_expired(&self, now_ms: u64, lifetime: Duration) -> bool {
        self.age(now_ms) > lifetime
    }

    /// Human-readable age for session pickers: `"Just now"` or `"<n> min ago"`.
    pub fn age_label(&self, now_ms: u64) -> String {
        let minutes = self.age(now_ms).as_secs() / 60;
        if minutes < 1 {
            "Just now".to_string()
        } else {
            format!("{minutes} min ago")
        }
    }
}

/// Sorts records newest first.
pub fn sort_newest_first(sessions: &mut [SessionRecord]) {
    sessions.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_has_fixed_length_and_alphabet() {
        for _ in 0..100 {
            let code = SessionCode::generate();
            assert!(SessionCode::is_well_formed(code.as_str()), "bad code {code}");
        }
    }

    #[test]
    fn test_generated_codes_differ() {
        assert_ne!(SessionCode::generate(), SessionCode::generate());
    }

    #[test]
    fn test_code_with_confusable_characters_is_not_well_formed() {
        assert!(!SessionCode::is_well_formed("ABCDEFGHJKLMNPQRS0"));
        assert!(!SessionCode::is_well_formed("ABC"));
    }

    #[test]
    fn test_record_expires_only_after_lifetime() {
        // Arrange
        let lifetime = Duration::from_secs(300);
        let record = SessionRecord::new("ABC", 1_000, None, false);

        // Act / Assert
        assert!(!record.is_expired(1_000 + 300_000, lifetime));
        assert!(record.is_expired(1_000 + 300_001, lifetime));
    }

    #[test]
    fn test_record_from_the_future_has_zero_age() {
        let record = SessionRecord::new("ABC", 10_000, None, false);
        assert_eq!(record.age(5_000), Duration::ZERO);
    }

    #[test]
    fn test_age_label_under_a_minute_is_just_now() {
        let record = SessionRecord::new("ABC", 0, None, false);
        assert_eq!(record.age_label(59_999), "Just now");
    }

    #[test]
    fn test_age_label_counts_whole_minutes() {
        let record = SessionRecord::new("ABC", 0, None, false);
        assert_eq!(record.age_label(60_000), "1 min ago");
        assert_eq!(record.age_label(179_000), "2 min ago");
    }

    #[test]
    fn test_sort_newest_first() {
        // Arrange
        let mut sessions = vec![
            SessionRecord::new("OLD", 1, None, false),
            SessionRecord::new("NEW", 3, None, false),
            SessionRecord::new("MID", 2, None, false),
        ];

        // Act
        sort_newest_first(&mut sessions);

        // Assert
        let codes: Vec<_> = sessions.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, ["NEW", "MID", "OLD"]);
    }

    #[test]
    fn test_record_wire_shape_uses_timestamp_and_name() {
        let record = SessionRecord::new("ABC", 7, Some("Studio".to_string()), true);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"code": "ABC", "timestamp": 7, "name": "Studio", "isPrivate": true})
        );
    }
}
