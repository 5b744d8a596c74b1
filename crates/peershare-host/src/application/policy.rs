//! Session policy: who may join and how the session is advertised.

use thiserror::Error;

/// Shortest PIN a host may choose.
pub const MIN_PIN_LEN: usize = 4;
/// Longest PIN a host may choose.
pub const MAX_PIN_LEN: usize = 6;

/// Errors raised when building a [`SessionPolicy`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("PIN must be {MIN_PIN_LEN}-{MAX_PIN_LEN} digits")]
    InvalidPin,
}

/// Host-local rules for one hosting session.
///
/// Set once when hosting starts and dropped when it stops.  A private session
/// always carries a PIN; a public one never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    pin: Option<String>,
    host_display_name: Option<String>,
}

impl SessionPolicy {
    /// A session anyone with the code may ask to join.
    pub fn public(host_display_name: Option<&str>) -> Self {
        Self {
            pin: None,
            host_display_name: normalize_name(host_display_name),
        }
    }

    /// A session that requires `pin` before the joiner reaches approval.
    ///
    /// # Errors
    ///
    /// [`PolicyError::InvalidPin`] unless `pin` is 4-6 ASCII digits.
    pub fn private(pin: &str, host_display_name: Option<&str>) -> Result<Self, PolicyError> {
        let pin = pin.trim();
        let valid = (MIN_PIN_LEN..=MAX_PIN_LEN).contains(&pin.len())
            && pin.bytes().all(|b| b.is_ascii_digit());
        if !valid {
            return Err(PolicyError::InvalidPin);
        }
        Ok(Self {
            pin: Some(pin.to_string()),
            host_display_name: normalize_name(host_display_name),
        })
    }

    pub fn is_private(&self) -> bool {
        self.pin.is_some()
    }

    pub fn host_display_name(&self) -> Option<&str> {
        self.host_display_name.as_deref()
    }

    /// Returns `true` when `candidate` unlocks this session.
    ///
    /// Public sessions accept anything.
    pub fn pin_matches(&self, candidate: &str) -> bool {
        match &self.pin {
            Some(pin) => pin == candidate,
            None => true,
        }
    }
}

/// Trims a display name and maps blank names to `None`.
pub fn normalize_name(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_policy_has_no_pin() {
        let policy = SessionPolicy::public(Some("Studio"));
        assert!(!policy.is_private());
        assert!(policy.pin_matches("anything"));
        assert_eq!(policy.host_display_name(), Some("Studio"));
    }

    #[test]
    fn test_private_policy_matches_only_its_pin() {
        // Arrange
        let policy = SessionPolicy::private("4242", None).unwrap();

        // Act / Assert
        assert!(policy.is_private());
        assert!(policy.pin_matches("4242"));
        assert!(!policy.pin_matches("0000"));
        assert!(!policy.pin_matches(""));
    }

    #[test]
    fn test_private_policy_rejects_bad_pins() {
        for pin in ["", "123", "1234567", "12a4", "١٢٣٤"] {
            assert_eq!(
                SessionPolicy::private(pin, None),
                Err(PolicyError::InvalidPin),
                "pin {pin:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_private_policy_accepts_six_digits() {
        assert!(SessionPolicy::private("123456", None).is_ok());
    }

    #[test]
    fn test_blank_host_name_is_dropped() {
        let policy = SessionPolicy::public(Some("   "));
        assert_eq!(policy.host_display_name(), None);
    }
}
