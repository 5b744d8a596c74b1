//! Joiner-side join handshake state machine.
//!
//! The joiner never starts a conversation: it answers whatever the host asks
//! for and reports progress.  Like the host machine, [`JoinerHandshake`]
//! performs no I/O.  The driver feeds it [`JoinerInput`]s and carries out the
//! returned [`JoinerAction`]s.
//!
//! ```text
//! AwaitingHost ──pin_request──► (PromptingPin) ──► PinSent ──pin_validated{true}──┐
//!      │                                              │                           │
//!      │                                     pin_validated{false} ──► Failed      │
//!      └──────────────────────────────────────────────────────────────────────────┴──►
//!           name_request / approval_* ──► AwaitingApproval ──stream──► Admitted
//! ```
//!
//! Success is the arrival of the host's stream, not `approval_approved`:
//! the approval message only updates the status text.

use peershare_core::protocol::{HandshakeMessage, SESSION_ENDED_REASON};
use peershare_core::transport::MediaStream;
use thiserror::Error;
use tracing::{debug, info};

// ── Status labels ─────────────────────────────────────────────────────────────

pub const STAGE_CONNECTING: &str = "Connecting to host...";
pub const STAGE_VERIFYING_PIN: &str = "Verifying PIN...";
pub const STAGE_PIN_ACCEPTED: &str = "PIN accepted";
pub const STAGE_SENDING_NAME: &str = "Sending name...";
pub const STAGE_AWAITING_APPROVAL: &str = "Waiting for host approval...";
pub const STAGE_APPROVED: &str = "Approved! Connecting...";

/// Why a join attempt ended without the host's stream.
///
/// `Display` is the message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinFailure {
    #[error("Incorrect PIN. Connection rejected.")]
    WrongPin,

    #[error("PIN is required to join this private session.")]
    PinRequired,

    #[error("Host denied your request to join the session.")]
    Denied,

    #[error("The session has ended.")]
    SessionEnded,

    #[error("Connection timed out. The host did not respond in time.")]
    TimedOut,

    #[error("Connection to host lost")]
    ConnectionLost,

    #[error("Could not connect to host. Please check the Share ID and try again.")]
    HostUnreachable,
}

/// Where the joiner currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinerStage {
    AwaitingHost,
    /// The host asked for a PIN and the user is being prompted.
    PromptingPin,
    PinSent,
    AwaitingApproval,
    Approved,
    Admitted,
    Failed,
}

impl JoinerStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Admitted | Self::Failed)
    }
}

/// Everything the driver can tell the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinerInput {
    Message(HandshakeMessage),
    /// Result of a PIN prompt.  `None` means the user cancelled.
    PinEntered(Option<String>),
    StreamArrived(MediaStream),
    ChannelClosed,
    CallClosed,
    /// The overall join countdown ran out.
    TimedOut,
}

/// Everything the machine can ask the driver to do.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinerAction {
    Send(HandshakeMessage),
    /// Ask the user for the PIN, then feed back [`JoinerInput::PinEntered`].
    PromptPin,
    /// New stage label for the status display.
    Status(&'static str),
    Admitted(MediaStream),
    Failed(JoinFailure),
}

/// Joiner half of the admission negotiation.
#[derive(Debug)]
pub struct JoinerHandshake {
    stage: JoinerStage,
    pin: Option<String>,
    name: Option<String>,
}

impl JoinerHandshake {
    /// `pin` is the PIN known ahead of time, if any; `name` is the display
    /// name offered to the host.  Blank values count as absent.
    pub fn new(pin: Option<String>, name: Option<String>) -> Self {
        Self {
            stage: JoinerStage::AwaitingHost,
            pin: pin.filter(|p| !p.is_empty()),
            name: name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
        }
    }

    pub fn stage(&self) -> JoinerStage {
        self.stage
    }

    /// Applies one input.  Inputs after a terminal stage are ignored.
    pub fn handle(&mut self, input: JoinerInput) -> Vec<JoinerAction> {
        if self.stage.is_terminal() {
            debug!(stage = ?self.stage, "input after join finished; ignored");
            return Vec::new();
        }

        match input {
            JoinerInput::Message(msg) => self.on_message(msg),
            JoinerInput::PinEntered(pin) => self.on_pin_entered(pin),
            JoinerInput::StreamArrived(stream) => {
                info!(stream = %stream.id(), "host stream arrived");
                self.stage = JoinerStage::Admitted;
                vec![JoinerAction::Admitted(stream)]
            }
            JoinerInput::ChannelClosed | JoinerInput::CallClosed => {
                self.fail(JoinFailure::ConnectionLost)
            }
            JoinerInput::TimedOut => self.fail(JoinFailure::TimedOut),
        }
    }

    fn on_message(&mut self, msg: HandshakeMessage) -> Vec<JoinerAction> {
        debug!(kind = msg.kind(), stage = ?self.stage, "host message");
        match msg {
            HandshakeMessage::PinRequest => match self.pin.clone() {
                Some(pin) => self.send_pin(pin),
                None => {
                    self.stage = JoinerStage::PromptingPin;
                    vec![JoinerAction::PromptPin]
                }
            },
            HandshakeMessage::PinValidated { success: true } => {
                info!("PIN accepted by host");
                vec![JoinerAction::Status(STAGE_PIN_ACCEPTED)]
            }
            HandshakeMessage::PinValidated { success: false } => self.fail(JoinFailure::WrongPin),
            HandshakeMessage::NameRequest => {
                self.stage = JoinerStage::AwaitingApproval;
                vec![
                    JoinerAction::Send(HandshakeMessage::NameResponse {
                        name: self.name.clone(),
                    }),
                    JoinerAction::Status(STAGE_SENDING_NAME),
                ]
            }
            HandshakeMessage::ApprovalPending => {
                self.stage = JoinerStage::AwaitingApproval;
                vec![JoinerAction::Status(STAGE_AWAITING_APPROVAL)]
            }
            HandshakeMessage::ApprovalApproved => {
                self.stage = JoinerStage::Approved;
                vec![JoinerAction::Status(STAGE_APPROVED)]
            }
            HandshakeMessage::ApprovalDenied { reason } => {
                if reason.as_deref() == Some(SESSION_ENDED_REASON) {
                    self.fail(JoinFailure::SessionEnded)
                } else {
                    self.fail(JoinFailure::Denied)
                }
            }
            HandshakeMessage::PinResponse { .. } | HandshakeMessage::NameResponse { .. } => {
                debug!(kind = msg.kind(), "joiner-bound message from host; ignored");
                Vec::new()
            }
        }
    }

    fn on_pin_entered(&mut self, pin: Option<String>) -> Vec<JoinerAction> {
        if self.stage != JoinerStage::PromptingPin {
            debug!(stage = ?self.stage, "PIN entered without a pending request; ignored");
            return Vec::new();
        }
        match pin.filter(|p| !p.is_empty()) {
            Some(pin) => self.send_pin(pin),
            None => {
                // The host still expects an answer before it can reject us.
                let mut actions = vec![JoinerAction::Send(HandshakeMessage::PinResponse {
                    pin: String::new(),
                })];
                actions.extend(self.fail(JoinFailure::PinRequired));
                actions
            }
        }
    }

    fn send_pin(&mut self, pin: String) -> Vec<JoinerAction> {
        self.stage = JoinerStage::PinSent;
        vec![
            JoinerAction::Send(HandshakeMessage::PinResponse { pin }),
            JoinerAction::Status(STAGE_VERIFYING_PIN),
        ]
    }

    fn fail(&mut self, failure: JoinFailure) -> Vec<JoinerAction> {
        info!(stage = ?self.stage, "join failed: {failure}");
        self.stage = JoinerStage::Failed;
        vec![JoinerAction::Failed(failure)]
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
