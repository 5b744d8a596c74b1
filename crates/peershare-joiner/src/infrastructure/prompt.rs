//! The seam between a join attempt and the user.
//!
//! A desktop shell would show dialogs; the simulator and the tests answer
//! from a script.  Only [`JoinPrompt::request_pin`] is mandatory: progress
//! reporting defaults to doing nothing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::application::connection_status::StatusSnapshot;
use crate::application::handshake::JoinFailure;

/// Shown when the session is known to be private before connecting.
pub const PRIVATE_SESSION_PROMPT: &str = "This is a private session. Enter the PIN to connect:";
/// Shown when the host asks for a PIN the joiner did not have.
pub const PIN_REQUESTED_PROMPT: &str = "This session is private. Enter the PIN to connect:";

#[async_trait]
pub trait JoinPrompt: Send + Sync {
    /// Asks the user for the session PIN.  `None` means the user cancelled.
    async fn request_pin(&self, message: &str) -> Option<String>;

    /// Called with every countdown update.
    fn status(&self, _snapshot: &StatusSnapshot) {}

    /// Called when 30 s and then 10 s remain.
    fn warning(&self, _remaining_secs: u64) {}

    /// Called once when the attempt fails.
    fn failed(&self, _failure: &JoinFailure) {}
}

/// Answers every PIN request with the same value and records what it saw.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    pin: Option<String>,
    pin_requests: AtomicUsize,
    warnings: Mutex<Vec<u64>>,
    last_status: Mutex<Option<String>>,
    failures: Mutex<Vec<JoinFailure>>,
}

impl ScriptedPrompt {
    /// A prompt that answers PIN requests with `pin` (`None` = cancel).
    pub fn answering(pin: Option<&str>) -> Self {
        Self {
            pin: pin.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn pin_requests(&self) -> usize {
        self.pin_requests.load(Ordering::SeqCst)
    }

    pub fn warnings(&self) -> Vec<u64> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn last_status(&self) -> Option<String> {
        self.last_status.lock().ok().and_then(|s| s.clone())
    }

    pub fn failures(&self) -> Vec<JoinFailure> {
        self.failures.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl JoinPrompt for ScriptedPrompt {
    async fn request_pin(&self, _message: &str) -> Option<String> {
        self.pin_requests.fetch_add(1, Ordering::SeqCst);
        self.pin.clone()
    }

    fn status(&self, snapshot: &StatusSnapshot) {
        if let Ok(mut last) = self.last_status.lock() {
            *last = Some(snapshot.status_line());
        }
    }

    fn warning(&self, remaining_secs: u64) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(remaining_secs);
        }
    }

    fn failed(&self, failure: &JoinFailure) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(failure.clone());
        }
    }
}
