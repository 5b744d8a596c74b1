//! `JoinAttempt`: one try at joining a hosted session.

use std::sync::Arc;

use peershare_core::discovery::DiscoveryCoordinator;
use peershare_core::domain::{parse_join_target, JoinTargetError};
use peershare_core::transport::{MediaStream, Transport, TransportError};
use thiserror::Error;
use tracing::{info, warn};

use crate::application::connection_status::{ConnectionStatusTracker, StatusTrackerConfig};
use crate::application::handshake::{JoinFailure, JoinerHandshake, STAGE_CONNECTING};
use crate::infrastructure::network::driver::{Admission, Joining};
use crate::infrastructure::prompt::{JoinPrompt, PRIVATE_SESSION_PROMPT};

/// Error type for a join attempt.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("invalid session code or link: {0}")]
    InvalidTarget(#[from] JoinTargetError),

    /// The attempt ran and was refused or cut short.  `Display` is the
    /// user-facing explanation.
    #[error("{0}")]
    Failed(#[from] JoinFailure),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl JoinError {
    pub fn failure(&self) -> Option<&JoinFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// What the user asked to join, and what they already know about it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinRequest {
    /// A bare session code or a share link.
    pub target: String,
    /// PIN known ahead of time.
    pub pin: Option<String>,
    /// Display name offered to the host.
    pub name: Option<String>,
    /// Whether the session is private, if known.  `None` consults discovery.
    pub is_private: Option<bool>,
}

impl JoinRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_privacy(mut self, is_private: bool) -> Self {
        self.is_private = Some(is_private);
        self
    }
}

/// Runs join attempts over a transport.
pub struct JoinAttempt {
    transport: Arc<dyn Transport>,
    prompt: Arc<dyn JoinPrompt>,
    discovery: Option<Arc<DiscoveryCoordinator>>,
    status: StatusTrackerConfig,
}

impl JoinAttempt {
    pub fn new(transport: Arc<dyn Transport>, prompt: Arc<dyn JoinPrompt>) -> Self {
        Self {
            transport,
            prompt,
            discovery: None,
            status: StatusTrackerConfig::default(),
        }
    }

    /// Lets the attempt look up whether a session is private when the
    /// request does not say.
    pub fn with_discovery(mut self, discovery: Arc<DiscoveryCoordinator>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_status_config(mut self, status: StatusTrackerConfig) -> Self {
        self.status = status;
        self
    }

    /// Looks `code` up in the session list.  Unknown codes, a missing
    /// discovery coordinator, and discovery failures all count as public.
    pub async fn resolve_privacy(&self, code: &str) -> bool {
        let Some(discovery) = &self.discovery else {
            return false;
        };
        match discovery.list_sessions().await {
            Ok(sessions) => sessions
                .iter()
                .find(|s| s.code == code)
                .map_or(false, |s| s.is_private),
            Err(e) => {
                warn!(%code, "session lookup failed, assuming public: {e}");
                false
            }
        }
    }

    /// Runs the whole join flow.
    ///
    /// # Errors
    ///
    /// [`JoinError::InvalidTarget`] for an unusable code or link,
    /// [`JoinError::Failed`] when the host refuses, the connection drops, or
    /// the countdown runs out, and [`JoinError::Transport`] if no identity
    /// could be bound.
    pub async fn run(&self, request: JoinRequest) -> Result<Admission, JoinError> {
        let code = parse_join_target(&request.target)?;

        let is_private = match request.is_private {
            Some(known) => known,
            None => self.resolve_privacy(&code).await,
        };

        let mut pin = request.pin.filter(|p| !p.is_empty());
        if is_private && pin.is_none() {
            pin = self
                .prompt
                .request_pin(PRIVATE_SESSION_PROMPT)
                .await
                .filter(|p| !p.is_empty());
            if pin.is_none() {
                return Err(self.fail(JoinFailure::PinRequired));
            }
        }

        let bound = self.transport.bind(None).await?;
        let (tracker, status_events) = ConnectionStatusTracker::start(self.status);
        tracker.set_stage(STAGE_CONNECTING);
        info!(%code, private = is_private, joiner = %bound.endpoint.id(), "joining session");

        let outgoing = match bound.endpoint.call(&code, MediaStream::placeholder()).await {
            Ok(outgoing) => outgoing,
            Err(e) => {
                bound.endpoint.destroy();
                return Err(match e {
                    TransportError::PeerUnavailable(_) => self.fail(JoinFailure::HostUnreachable),
                    other => other.into(),
                });
            }
        };

        let joining = Joining::new(code, bound, outgoing, tracker, status_events);
        joining
            .run(JoinerHandshake::new(pin, request.name), self.prompt.as_ref())
            .await
            .map_err(|failure| self.fail(failure))
    }

    fn fail(&self, failure: JoinFailure) -> JoinError {
        self.prompt.failed(&failure);
        JoinError::Failed(failure)
    }
}
