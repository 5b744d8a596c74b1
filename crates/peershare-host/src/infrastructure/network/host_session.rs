//! HostSession: the hosting lifecycle and operator commands.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//! start(policy) ──► claim a fresh session code as our transport identity
//!               ──► advertise it through discovery (best-effort)
//!               ──► accept joiner calls; one driver task per joiner
//!
//! stop()        ──► tell every unfinished handshake "Session ended"
//!               ──► hang up on every participant
//!               ──► withdraw from discovery and give up the discovery role
//!               ──► release the identity
//! ```
//!
//! The operator sees everything that needs attention through the
//! [`HostEvent`] receiver returned by [`HostSession::new`] and answers
//! approval requests with [`HostSession::approve`] / [`HostSession::deny`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use peershare_core::discovery::DiscoveryCoordinator;
use peershare_core::protocol::{encode, HandshakeMessage};
use peershare_core::transport::{
    DataChannel, Endpoint, Incoming, MediaCall, MediaStream, Transport, TransportError,
};
use peershare_core::{PeerId, SessionCode};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::handshake::{ApprovalRequest, Decision, HandshakeTimeouts, HostNotice};
use crate::application::participants::{Participant, ParticipantRegistry, PendingParticipant};
use crate::application::policy::SessionPolicy;
use crate::infrastructure::network::join_driver::run_join;

/// How long the host keeps a connection open after its final message.
pub const CLOSE_LINGER: Duration = Duration::from_millis(500);

/// How many fresh codes `start` tries before giving up.
pub const MAX_CODE_ATTEMPTS: u32 = 3;

/// Error type for hosting operations.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("already hosting session {0}")]
    AlreadyHosting(SessionCode),

    #[error("not hosting")]
    NotHosting,

    #[error("could not claim a free session code after {0} attempts")]
    NoFreeCode(u32),

    #[error("no pending join request from {0}")]
    NotPending(PeerId),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Events emitted to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A joiner is waiting; answer with `approve` or `deny`.
    ApprovalRequested(ApprovalRequest),
    ParticipantJoined {
        peer_id: PeerId,
        friendly_name: String,
    },
    ParticipantLeft {
        peer_id: PeerId,
        friendly_name: String,
    },
    Notice(HostNotice),
}

/// Tunables for a hosting session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostSessionConfig {
    pub timeouts: HandshakeTimeouts,
    pub close_linger: Duration,
    pub max_code_attempts: u32,
}

impl Default for HostSessionConfig {
    fn default() -> Self {
        Self {
            timeouts: HandshakeTimeouts::default(),
            close_linger: CLOSE_LINGER,
            max_code_attempts: MAX_CODE_ATTEMPTS,
        }
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

/// A joiner awaiting approval, plus the channel its decision goes down.
pub(crate) struct PendingEntry {
    pub(crate) info: PendingParticipant,
    /// Taken when the operator decides.
    pub(crate) decision: Option<oneshot::Sender<Decision>>,
}

/// Both links of a joiner whose handshake has not finished.
pub(crate) struct HandshakeLinks {
    pub(crate) channel: Arc<dyn DataChannel>,
    pub(crate) call: Arc<dyn MediaCall>,
}

/// State shared by the session and every join driver.
///
/// Only mutated inside short critical sections that never await I/O.
#[derive(Default)]
pub(crate) struct HostState {
    pub(crate) policy: Option<SessionPolicy>,
    pub(crate) outbound: Option<MediaStream>,
    pub(crate) participants: ParticipantRegistry,
    pub(crate) pending: HashMap<PeerId, PendingEntry>,
    /// Every joiner between connecting and a final outcome, pending ones
    /// included.
    pub(crate) handshaking: HashMap<PeerId, HandshakeLinks>,
}

/// What a join driver needs from its session.
#[derive(Clone)]
pub(crate) struct JoinContext {
    pub(crate) state: Arc<Mutex<HostState>>,
    pub(crate) events: mpsc::UnboundedSender<HostEvent>,
    pub(crate) config: HostSessionConfig,
}

impl JoinContext {
    pub(crate) fn emit(&self, event: HostEvent) {
        if self.events.send(event).is_err() {
            debug!("host event receiver dropped");
        }
    }
}

/// Resources that exist only while hosting.  Dropping them stops accepting
/// joiners and releases the identity.
struct RunningHost {
    code: SessionCode,
    endpoint: Arc<dyn Endpoint>,
    accept_task: JoinHandle<()>,
    /// Flipped to `true` by `stop`; join drivers end their handshake on it.
    ended: watch::Sender<bool>,
}

impl Drop for RunningHost {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.endpoint.destroy();
    }
}

// ── HostSession ───────────────────────────────────────────────────────────────

/// Hosts one session at a time over a transport.
pub struct HostSession {
    transport: Arc<dyn Transport>,
    discovery: Arc<DiscoveryCoordinator>,
    ctx: JoinContext,
    running: Mutex<Option<RunningHost>>,
}

impl HostSession {
    /// Creates an idle session.  Returns it together with the operator event
    /// receiver.
    pub fn new(
        transport: Arc<dyn Transport>,
        discovery: Arc<DiscoveryCoordinator>,
        config: HostSessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let session = Self {
            transport,
            discovery,
            ctx: JoinContext {
                state: Arc::new(Mutex::new(HostState::default())),
                events,
                config,
            },
            running: Mutex::new(None),
        };
        (session, rx)
    }

    /// Starts hosting under a freshly generated session code.
    ///
    /// `stream` may be `None` while capture is still starting; joiners that
    /// call before a stream is set are hung up on.  Discovery failures are
    /// logged and do not prevent hosting: the code still works when shared
    /// directly.
    ///
    /// # Errors
    ///
    /// [`HostError::AlreadyHosting`] if a session is running,
    /// [`HostError::NoFreeCode`] if every generated code was taken, or a
    /// transport error from binding.
    pub async fn start(
        &self,
        policy: SessionPolicy,
        stream: Option<MediaStream>,
    ) -> Result<SessionCode, HostError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Err(HostError::AlreadyHosting(current.code.clone()));
        }

        let (code, bound) = self.claim_code().await?;
        {
            let mut state = self.ctx.state.lock().await;
            state.policy = Some(policy.clone());
            state.outbound = stream;
        }

        let (ended, ended_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_joiners(
            bound.incoming,
            Arc::clone(&bound.endpoint),
            self.ctx.clone(),
            ended_rx,
        ));
        *running = Some(RunningHost {
            code: code.clone(),
            endpoint: bound.endpoint,
            accept_task,
            ended,
        });

        if let Err(e) = self
            .discovery
            .register_session(code.as_str(), policy.host_display_name(), policy.is_private())
            .await
        {
            warn!(%code, "session not listed in discovery: {e}");
        }

        info!(%code, private = policy.is_private(), "hosting started");
        Ok(code)
    }

    /// Stops hosting.  Does nothing when not hosting.
    ///
    /// Joiners still negotiating are told the session ended rather than
    /// seeing a bare hang-up, and the operator gets no notices for them.  The
    /// discovery role is given up as well, so the registry does not outlive
    /// the session.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            debug!("stop requested while not hosting");
            return;
        };

        let (handshaking, participants) = {
            let mut state = self.ctx.state.lock().await;
            // Drivers see the end before any of their links close.
            running.ended.send_replace(true);
            state.policy = None;
            state.outbound = None;
            state.pending.clear();
            let handshaking: Vec<(PeerId, HandshakeLinks)> = state.handshaking.drain().collect();
            (handshaking, state.participants.clear())
        };

        let farewell = encode(&HandshakeMessage::session_ended());
        for (peer_id, links) in handshaking {
            if let Ok(text) = &farewell {
                if let Err(e) = links.channel.send(text) {
                    debug!(peer = %peer_id, "session-ended notice not sent: {e}");
                }
            }
            links.channel.close();
            links.call.close();
        }

        for participant in participants {
            participant.call().close();
            if let Some(connection) = participant.connection() {
                connection.close();
            }
            self.ctx.emit(HostEvent::ParticipantLeft {
                peer_id: participant.peer_id,
                friendly_name: participant.friendly_name,
            });
        }

        self.discovery.unregister_session(running.code.as_str()).await;
        self.discovery.resign().await;

        info!(code = %running.code, "hosting stopped");
        drop(running);
    }

    /// Admits a pending joiner.
    ///
    /// # Errors
    ///
    /// [`HostError::NotPending`] if `peer_id` is not awaiting a decision.
    pub async fn approve(&self, peer_id: &str) -> Result<(), HostError> {
        self.decide(peer_id, Decision::Approve).await
    }

    /// Refuses a pending joiner.
    ///
    /// # Errors
    ///
    /// [`HostError::NotPending`] if `peer_id` is not awaiting a decision.
    pub async fn deny(&self, peer_id: &str) -> Result<(), HostError> {
        self.decide(peer_id, Decision::Deny).await
    }

    /// Hangs up on a participant.  Returns `false` if it was not present.
    pub async fn disconnect(&self, peer_id: &str) -> bool {
        let removed = self.ctx.state.lock().await.participants.disconnect(peer_id);
        match removed {
            Some(participant) => {
                self.ctx.emit(HostEvent::ParticipantLeft {
                    peer_id: participant.peer_id,
                    friendly_name: participant.friendly_name,
                });
                true
            }
            None => false,
        }
    }

    /// Swaps the stream future admissions are answered with.
    ///
    /// # Errors
    ///
    /// [`HostError::NotHosting`] when no session is running.
    pub async fn replace_stream(&self, stream: MediaStream) -> Result<(), HostError> {
        if self.running.lock().await.is_none() {
            return Err(HostError::NotHosting);
        }
        debug!(stream = %stream.id(), "outbound stream replaced");
        self.ctx.state.lock().await.outbound = Some(stream);
        Ok(())
    }

    pub async fn participants(&self) -> Vec<Participant> {
        self.ctx.state.lock().await.participants.all()
    }

    pub async fn pending(&self) -> Vec<PendingParticipant> {
        self.ctx
            .state
            .lock()
            .await
            .pending
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub async fn is_hosting(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn code(&self) -> Option<SessionCode> {
        self.running.lock().await.as_ref().map(|r| r.code.clone())
    }

    async fn decide(&self, peer_id: &str, decision: Decision) -> Result<(), HostError> {
        let sender = self
            .ctx
            .state
            .lock()
            .await
            .pending
            .get_mut(peer_id)
            .and_then(|entry| entry.decision.take())
            .ok_or_else(|| HostError::NotPending(peer_id.to_string()))?;
        sender
            .send(decision)
            .map_err(|_| HostError::NotPending(peer_id.to_string()))
    }

    async fn claim_code(
        &self,
    ) -> Result<(SessionCode, peershare_core::transport::BoundEndpoint), HostError> {
        let attempts = self.ctx.config.max_code_attempts;
        for attempt in 1..=attempts {
            let code = SessionCode::generate();
            match self.transport.bind(Some(code.as_str())).await {
                Ok(bound) => return Ok((code, bound)),
                Err(TransportError::IdentityTaken(_)) => {
                    warn!(%code, attempt, "session code already in use; generating another");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(HostError::NoFreeCode(attempts))
    }
}

/// Accepts joiner calls until the session stops.
///
/// Joiners call with a placeholder stream; the host answers by opening the
/// data connection back to them and running the handshake over it.
async fn accept_joiners(
    mut incoming: mpsc::UnboundedReceiver<Incoming>,
    endpoint: Arc<dyn Endpoint>,
    ctx: JoinContext,
    ended: watch::Receiver<bool>,
) {
    while let Some(opened) = incoming.recv().await {
        match opened {
            Incoming::Call(call) => {
                let peer = call.call.remote_id().to_string();
                if ctx.state.lock().await.outbound.is_none() {
                    warn!(%peer, "no outbound stream yet; hanging up");
                    call.call.close();
                    continue;
                }

                info!(%peer, "join call received");
                let endpoint = Arc::clone(&endpoint);
                let ctx = ctx.clone();
                let ended = ended.clone();
                tokio::spawn(async move {
                    match endpoint.connect(&peer).await {
                        Ok(connection) => run_join(ctx, ended, call, connection).await,
                        Err(e) => {
                            warn!(%peer, "could not open data connection to joiner: {e}");
                            call.call.close();
                        }
                    }
                });
            }
            Incoming::Connection(connection) => {
                debug!(peer = %connection.channel.remote_id(), "unsolicited data connection; closing");
                connection.channel.close();
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
