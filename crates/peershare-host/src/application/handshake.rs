//! Host-side join handshake state machine.
//!
//! One [`HostHandshake`] exists per joiner connection.  It never performs I/O:
//! the driver feeds it [`HostInput`]s one at a time and carries out the
//! [`HostAction`]s it returns (send a message, arm a timer, ask the operator,
//! admit, close).  This keeps every rule of the negotiation testable without
//! a runtime.
//!
//! # States
//!
//! ```text
//!            ┌─(private)─► PinRequested ──match──┐
//! Connected ─┤                 │ mismatch        ├──► NameRequested ──► ApprovalPending ──► Approved
//!            └─(public)────────┼─────────────────┘         │ 60 s             │
//!                              ▼                           └─(no name)────────┘──► Denied
//!                     PinRejected / PinTimedOut
//! ```
//!
//! Any channel close or error before a terminal state moves to `Abandoned`.
//! Stopping the session moves every unfinished handshake to `Ended`; the
//! session has already told the joiner and hung up, so nothing more is sent.
//!
//! # Timers
//!
//! Each armed timer carries a [`TimerTag`] naming the stage it was armed for
//! and a per-machine epoch.  A firing is acted on only if its tag is the one
//! currently armed; a tag from a stage that has moved on is ignored, so a
//! late timer can never act on a newer stage.

use std::time::Duration;

use peershare_core::protocol::HandshakeMessage;
use peershare_core::{PeerId, TransportError};
use tracing::{debug, info};

use crate::application::policy::{normalize_name, SessionPolicy};

/// How long the host waits for a `pin_response`.
pub const PIN_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the host waits for a `name_response` before proceeding without one.
pub const NAME_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeouts governing one handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTimeouts {
    pub pin: Duration,
    pub name: Duration,
}

impl Default for HandshakeTimeouts {
    fn default() -> Self {
        Self {
            pin: PIN_TIMEOUT,
            name: NAME_TIMEOUT,
        }
    }
}

/// Where a handshake currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStage {
    Connected,
    PinRequested,
    NameRequested,
    ApprovalPending,
    Approved,
    Denied,
    PinRejected,
    PinTimedOut,
    Abandoned,
    Ended,
}

impl HostStage {
    /// Terminal stages accept no further input.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Approved
                | Self::Denied
                | Self::PinRejected
                | Self::PinTimedOut
                | Self::Abandoned
                | Self::Ended
        )
    }
}

/// Identifies one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTag {
    pub stage: HostStage,
    epoch: u64,
}

/// The operator's answer to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}

/// Everything the operator needs to decide on a joiner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub peer_id: PeerId,
    pub claimed_name: Option<String>,
    pub pin_validated: bool,
}

impl ApprovalRequest {
    /// Label for prompts: the claimed name, or a short form of the peer id.
    pub fn display_label(&self) -> String {
        match &self.claimed_name {
            Some(name) => name.clone(),
            None => {
                let short: String = self.peer_id.chars().take(8).collect();
                format!("Participant {short}")
            }
        }
    }
}

/// Local notices for the operator that do not need an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostNotice {
    /// The joiner never answered the PIN prompt.
    PinTimedOut { peer_id: PeerId },
    /// The joiner sent the wrong PIN.
    WrongPin { peer_id: PeerId },
    /// The operator denied the joiner.
    Denied { peer_id: PeerId, label: String },
    /// The joiner went away before a decision.
    Abandoned { peer_id: PeerId },
}

/// Inputs a driver feeds into the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum HostInput {
    /// The data connection to the joiner is open.
    Opened,
    Message(HandshakeMessage),
    TimerFired(TimerTag),
    Decision(Decision),
    ChannelClosed,
    ChannelFailed(TransportError),
    /// Hosting stopped while this handshake was unfinished.
    SessionEnded,
}

/// Effects the driver must carry out, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum HostAction {
    Send(HandshakeMessage),
    /// Replace any armed timer with this one.
    ArmTimer { tag: TimerTag, after: Duration },
    CancelTimer,
    /// Record the joiner as pending and ask the operator.
    RequestApproval(ApprovalRequest),
    /// Drop the pending entry, if any.
    DropPending,
    /// Answer the call with the outbound stream and add a participant.
    Admit { name: Option<String> },
    /// Close the data connection and the call, after a short linger when
    /// `linger` is set so the last message can be delivered.
    Close { linger: bool },
    Notify(HostNotice),
}

/// Per-joiner admission state machine.
#[derive(Debug)]
pub struct HostHandshake {
    peer_id: PeerId,
    policy: SessionPolicy,
    timeouts: HandshakeTimeouts,
    stage: HostStage,
    armed: Option<TimerTag>,
    epoch: u64,
    pin_validated: bool,
    claimed_name: Option<String>,
    name_received: bool,
}

impl HostHandshake {
    pub fn new(peer_id: impl Into<PeerId>, policy: SessionPolicy, timeouts: HandshakeTimeouts) -> Self {
        Self {
            peer_id: peer_id.into(),
            policy,
            timeouts,
            stage: HostStage::Connected,
            armed: None,
            epoch: 0,
            pin_validated: false,
            claimed_name: None,
            name_received: false,
        }
    }

    pub fn stage(&self) -> HostStage {
        self.stage
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn claimed_name(&self) -> Option<&str> {
        self.claimed_name.as_deref()
    }

    /// Processes one input and returns the actions it requires.
    pub fn handle(&mut self, input: HostInput) -> Vec<HostAction> {
        if self.stage.is_terminal() {
            debug!(peer = %self.peer_id, stage = ?self.stage, ?input, "input after handshake ended; ignoring");
            return Vec::new();
        }

        match input {
            HostInput::Opened => self.on_opened(),
            HostInput::Message(msg) => self.on_message(msg),
            HostInput::TimerFired(tag) => self.on_timer(tag),
            HostInput::Decision(decision) => self.on_decision(decision),
            HostInput::ChannelClosed => self.abandon("closed"),
            HostInput::ChannelFailed(e) => {
                debug!(peer = %self.peer_id, "handshake channel error: {e}");
                self.abandon("failed")
            }
            HostInput::SessionEnded => self.end(),
        }
    }

    fn on_opened(&mut self) -> Vec<HostAction> {
        if self.stage != HostStage::Connected {
            return Vec::new();
        }
        if self.policy.is_private() {
            self.stage = HostStage::PinRequested;
            info!(peer = %self.peer_id, "requesting PIN");
            vec![
                HostAction::Send(HandshakeMessage::PinRequest),
                self.arm(self.timeouts.pin),
            ]
        } else {
            self.request_name()
        }
    }

    fn on_message(&mut self, msg: HandshakeMessage) -> Vec<HostAction> {
        match (self.stage, msg) {
            (HostStage::PinRequested, HandshakeMessage::PinResponse { pin }) => {
                if self.policy.pin_matches(&pin) {
                    info!(peer = %self.peer_id, "PIN accepted");
                    self.pin_validated = true;
                    let mut actions = vec![
                        self.cancel_timer(),
                        HandshakeMessage::PinValidated { success: true }.into(),
                    ];
                    if self.name_received {
                        actions.extend(self.request_approval());
                    } else {
                        actions.extend(self.request_name());
                    }
                    actions
                } else {
                    info!(peer = %self.peer_id, "incorrect PIN; rejecting");
                    self.stage = HostStage::PinRejected;
                    vec![
                        self.cancel_timer(),
                        HandshakeMessage::PinValidated { success: false }.into(),
                        HostAction::Notify(HostNotice::WrongPin {
                            peer_id: self.peer_id.clone(),
                        }),
                        HostAction::Close { linger: true },
                    ]
                }
            }
            (HostStage::PinRequested, HandshakeMessage::NameResponse { name }) => {
                // Kept until the PIN is validated; never acted on before.
                debug!(peer = %self.peer_id, "name received before PIN validation");
                self.claimed_name = normalize_name(name.as_deref());
                self.name_received = true;
                Vec::new()
            }
            (HostStage::NameRequested, HandshakeMessage::NameResponse { name }) => {
                self.claimed_name = normalize_name(name.as_deref());
                self.name_received = true;
                let mut actions = vec![self.cancel_timer()];
                actions.extend(self.request_approval());
                actions
            }
            (stage, msg) => {
                debug!(peer = %self.peer_id, ?stage, kind = msg.kind(), "unexpected handshake message; ignoring");
                Vec::new()
            }
        }
    }

    fn on_timer(&mut self, tag: TimerTag) -> Vec<HostAction> {
        if self.armed != Some(tag) {
            debug!(peer = %self.peer_id, ?tag, "stale timer; ignoring");
            return Vec::new();
        }
        self.armed = None;

        match self.stage {
            HostStage::PinRequested => {
                info!(peer = %self.peer_id, "PIN not provided in time");
                self.stage = HostStage::PinTimedOut;
                vec![
                    HostAction::Notify(HostNotice::PinTimedOut {
                        peer_id: self.peer_id.clone(),
                    }),
                    HostAction::Close { linger: false },
                ]
            }
            HostStage::NameRequested => {
                info!(peer = %self.peer_id, "no name received; continuing with a generated name");
                self.claimed_name = None;
                self.request_approval()
            }
            _ => Vec::new(),
        }
    }

    fn on_decision(&mut self, decision: Decision) -> Vec<HostAction> {
        if self.stage != HostStage::ApprovalPending {
            debug!(peer = %self.peer_id, stage = ?self.stage, ?decision, "decision outside approval; ignoring");
            return Vec::new();
        }

        match decision {
            Decision::Approve => {
                info!(peer = %self.peer_id, "joiner approved");
                self.stage = HostStage::Approved;
                vec![
                    HostAction::DropPending,
                    HandshakeMessage::ApprovalApproved.into(),
                    HostAction::Admit {
                        name: self.claimed_name.clone(),
                    },
                ]
            }
            Decision::Deny => {
                info!(peer = %self.peer_id, "joiner denied");
                self.stage = HostStage::Denied;
                let label = self.approval_request().display_label();
                vec![
                    HostAction::DropPending,
                    HandshakeMessage::ApprovalDenied { reason: None }.into(),
                    HostAction::Notify(HostNotice::Denied {
                        peer_id: self.peer_id.clone(),
                        label,
                    }),
                    HostAction::Close { linger: true },
                ]
            }
        }
    }

    fn abandon(&mut self, how: &str) -> Vec<HostAction> {
        info!(peer = %self.peer_id, stage = ?self.stage, "joiner connection {how} during handshake");
        let was_pending = self.stage == HostStage::ApprovalPending;
        self.stage = HostStage::Abandoned;

        let mut actions = Vec::new();
        if self.armed.is_some() {
            actions.push(self.cancel_timer());
        }
        if was_pending {
            actions.push(HostAction::DropPending);
        }
        actions.push(HostAction::Close { linger: false });
        actions.push(HostAction::Notify(HostNotice::Abandoned {
            peer_id: self.peer_id.clone(),
        }));
        actions
    }

    fn end(&mut self) -> Vec<HostAction> {
        debug!(peer = %self.peer_id, stage = ?self.stage, "session ended during handshake");
        self.stage = HostStage::Ended;
        if self.armed.is_some() {
            vec![self.cancel_timer()]
        } else {
            Vec::new()
        }
    }

    fn request_name(&mut self) -> Vec<HostAction> {
        self.stage = HostStage::NameRequested;
        vec![
            HandshakeMessage::NameRequest.into(),
            self.arm(self.timeouts.name),
        ]
    }

    fn request_approval(&mut self) -> Vec<HostAction> {
        self.stage = HostStage::ApprovalPending;
        info!(peer = %self.peer_id, name = ?self.claimed_name, "awaiting operator approval");
        vec![
            HostAction::RequestApproval(self.approval_request()),
            HandshakeMessage::ApprovalPending.into(),
        ]
    }

    fn approval_request(&self) -> ApprovalRequest {
        ApprovalRequest {
            peer_id: self.peer_id.clone(),
            claimed_name: self.claimed_name.clone(),
            pin_validated: self.pin_validated,
        }
    }

    fn arm(&mut self, after: Duration) -> HostAction {
        self.epoch += 1;
        let tag = TimerTag {
            stage: self.stage,
            epoch: self.epoch,
        };
        self.armed = Some(tag);
        HostAction::ArmTimer { tag, after }
    }

    fn cancel_timer(&mut self) -> HostAction {
        self.armed = None;
        HostAction::CancelTimer
    }
}

impl From<HandshakeMessage> for HostAction {
    fn from(msg: HandshakeMessage) -> Self {
        Self::Send(msg)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
