//! peershare-joiner library entry point.
//!
//! # What does the joiner do? (for beginners)
//!
//! A *joiner* is the viewer: it has a session code (or a share link) and
//! wants to watch the host's stream.  Joining is a short negotiation:
//!
//! 1. The joiner calls the host's session code, offering a placeholder stream.
//! 2. The host opens a data connection back and asks, in order, for a PIN
//!    (private sessions only) and a display name.
//! 3. The host's operator approves or denies the request.
//! 4. On approval the host answers the call; the arrival of the host's stream
//!    is what marks the join as successful.
//!
//! A five-minute countdown runs alongside the whole negotiation so the user
//! always sees how long is left before the attempt gives up.

pub mod application;
pub mod infrastructure;

pub use application::connection_status::{
    ConnectionStatusTracker, StatusEvent, StatusSnapshot, StatusTrackerConfig,
};
pub use application::handshake::{JoinFailure, JoinerHandshake};
pub use infrastructure::network::{Admission, JoinAttempt, JoinError, JoinRequest};
pub use infrastructure::prompt::{JoinPrompt, ScriptedPrompt};
