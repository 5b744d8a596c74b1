//! One simulated hosting session.
//!
//! ```text
//! HostSession ──start──► code registered with discovery
//!      ▲                        │
//!      │ approve / deny         ▼ list_sessions (privacy lookup)
//!  operator task          N × JoinAttempt via the share link
//! ```
//!
//! Everything runs over a single [`MemoryNetwork`], so the scenario is
//! deterministic apart from the order in which joiners reach the operator.

use std::sync::Arc;

use async_trait::async_trait;
use peershare_core::discovery::DiscoveryCoordinator;
use peershare_core::domain::share_link;
use peershare_core::transport::memory::MemoryNetwork;
use peershare_core::transport::{MediaStream, Transport};
use peershare_core::{current_timestamp_ms, SessionCode};
use peershare_host::application::policy::SessionPolicy;
use peershare_host::infrastructure::network::{HostEvent, HostSession};
use peershare_host::infrastructure::storage::config::HostConfig;
use peershare_joiner::{JoinAttempt, JoinFailure, JoinPrompt, JoinRequest, StatusSnapshot};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://peershare.app/";

/// What to simulate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimOptions {
    pub joiners: usize,
    /// Makes the session private with this PIN.
    pub host_pin: Option<String>,
    /// What joiners answer when asked for a PIN.  `None` cancels the prompt.
    pub joiner_pin: Option<String>,
    /// The operator denies every n-th request.  0 approves everyone.
    pub deny_every: usize,
    /// Overrides the configured display name.
    pub host_name: Option<String>,
    pub base_url: String,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            joiners: 3,
            host_pin: None,
            joiner_pin: None,
            deny_every: 0,
            host_name: None,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinerOutcome {
    Admitted { name: String },
    Refused { name: String, reason: String },
}

#[derive(Debug)]
pub struct SimReport {
    pub code: SessionCode,
    pub share_link: String,
    /// Sessions a fresh instance saw in discovery.
    pub listed: usize,
    pub outcomes: Vec<JoinerOutcome>,
    /// Friendly names of everyone admitted, just before the host stopped.
    pub participants: Vec<String>,
}

impl SimReport {
    pub fn admitted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, JoinerOutcome::Admitted { .. }))
            .count()
    }

    pub fn refused(&self) -> usize {
        self.outcomes.len() - self.admitted()
    }
}

/// Runs one host and `options.joiners` joiners to completion, then stops
/// the host.
///
/// # Errors
///
/// Fails if the PIN is not 4-6 digits, hosting cannot start, discovery
/// cannot be reached at all, or a joiner task panics.
pub async fn run_scenario(options: SimOptions, config: &HostConfig) -> anyhow::Result<SimReport> {
    let network = MemoryNetwork::new();
    let transport: Arc<dyn Transport> = Arc::new(network.clone());

    let host_discovery = Arc::new(DiscoveryCoordinator::new(
        Arc::clone(&transport),
        config.discovery_config(),
    ));
    let (host, events) = HostSession::new(
        Arc::clone(&transport),
        host_discovery,
        config.session_config(),
    );
    let host = Arc::new(host);

    let display_name = options
        .host_name
        .as_deref()
        .or(config.host.display_name.as_deref());
    let policy = match &options.host_pin {
        Some(pin) => SessionPolicy::private(pin, display_name)?,
        None => SessionPolicy::public(display_name),
    };
    let code = host.start(policy, Some(MediaStream::new("screen"))).await?;
    let link = share_link(&options.base_url, code.as_str());
    info!(%code, %link, "hosting");

    let operator = tokio::spawn(operate(Arc::clone(&host), events, options.deny_every));

    let browser = Arc::new(DiscoveryCoordinator::new(
        Arc::clone(&transport),
        config.discovery_config(),
    ));
    let now = current_timestamp_ms();
    let sessions = browser.list_sessions().await?;
    for session in &sessions {
        info!(
            code = %session.code,
            name = ?session.display_name,
            private = session.is_private,
            age = %session.age_label(now),
            "listed session"
        );
    }

    let mut joins = Vec::with_capacity(options.joiners);
    for n in 1..=options.joiners {
        let name = format!("Viewer {n}");
        let prompt = Arc::new(LoggingPrompt {
            joiner: name.clone(),
            pin: options.joiner_pin.clone(),
        });
        let attempt = JoinAttempt::new(Arc::clone(&transport), prompt)
            .with_discovery(Arc::clone(&browser));
        // No privacy hint: the attempt asks discovery.
        let request = JoinRequest::new(link.clone()).with_name(name.clone());
        joins.push((name, tokio::spawn(async move { attempt.run(request).await })));
    }

    let mut outcomes = Vec::with_capacity(joins.len());
    let mut admissions = Vec::new();
    for (name, join) in joins {
        match join.await? {
            Ok(admission) => {
                outcomes.push(JoinerOutcome::Admitted { name });
                admissions.push(admission);
            }
            Err(e) => outcomes.push(JoinerOutcome::Refused {
                name,
                reason: e.to_string(),
            }),
        }
    }

    let participants = host
        .participants()
        .await
        .into_iter()
        .map(|p| p.friendly_name)
        .collect();

    host.stop().await;
    for mut admission in admissions {
        admission.wait_closed().await;
    }
    operator.abort();

    Ok(SimReport {
        code,
        share_link: link,
        listed: sessions.len(),
        outcomes,
        participants,
    })
}

/// Stands in for the human operator.
async fn operate(
    host: Arc<HostSession>,
    mut events: mpsc::UnboundedReceiver<HostEvent>,
    deny_every: usize,
) {
    let mut requests = 0usize;
    while let Some(event) = events.recv().await {
        match event {
            HostEvent::ApprovalRequested(request) => {
                requests += 1;
                let label = request.display_label();
                let result = if deny_every > 0 && requests % deny_every == 0 {
                    info!(joiner = %label, "operator denies");
                    host.deny(&request.peer_id).await
                } else {
                    info!(joiner = %label, pin = request.pin_validated, "operator approves");
                    host.approve(&request.peer_id).await
                };
                if let Err(e) = result {
                    warn!(joiner = %label, "decision not delivered: {e}");
                }
            }
            HostEvent::ParticipantJoined { friendly_name, .. } => {
                info!(name = %friendly_name, "participant joined");
            }
            HostEvent::ParticipantLeft { friendly_name, .. } => {
                info!(name = %friendly_name, "participant left");
            }
            HostEvent::Notice(notice) => warn!(?notice, "host notice"),
        }
    }
}

struct LoggingPrompt {
    joiner: String,
    pin: Option<String>,
}

#[async_trait]
impl JoinPrompt for LoggingPrompt {
    async fn request_pin(&self, message: &str) -> Option<String> {
        info!(joiner = %self.joiner, answered = self.pin.is_some(), "{message}");
        self.pin.clone()
    }

    fn status(&self, snapshot: &StatusSnapshot) {
        debug!(joiner = %self.joiner, "{}", snapshot.status_line());
    }

    fn warning(&self, remaining_secs: u64) {
        warn!(joiner = %self.joiner, "{remaining_secs}s left to join");
    }

    fn failed(&self, failure: &JoinFailure) {
        warn!(joiner = %self.joiner, "{failure}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
