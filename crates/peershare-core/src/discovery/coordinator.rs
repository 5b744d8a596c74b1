//! Discovery role election and request routing.
//!
//! A [`DiscoveryCoordinator`] is the one place a process asks about
//! discovery.  It decides whether this process is the discovery host and
//! routes each operation accordingly:
//!
//! | operation          | as host            | as client                                   |
//! |--------------------|--------------------|---------------------------------------------|
//! | `list_sessions`    | read local registry | `list` → `list_response`                   |
//! | `register_session` | write local registry | `register` → `register_ack`               |
//! | `unregister_session` | remove locally   | `unregister` (no reply expected)            |
//!
//! When a client finds the discovery identity unreachable it claims the
//! identity itself ("self-promotion") instead of failing.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::discovery::registry::{apply_request, SessionRegistry, SESSION_LIFETIME, SWEEP_INTERVAL};
use crate::domain::session::{current_timestamp_ms, sort_newest_first, SessionRecord};
use crate::protocol::codec::{decode, encode, ProtocolError};
use crate::protocol::messages::DiscoveryMessage;
use crate::transport::{
    BoundEndpoint, ChannelEvent, DataConnection, Endpoint, Incoming, Transport, TransportError,
};

/// The well-known identity whose holder is the discovery host.
pub const DISCOVERY_PEER_ID: &str = "DISCOVERY";

/// Source of "now" in milliseconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Tunables for discovery.  `Default` gives the production values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Identity the discovery host claims.
    pub identity: String,
    /// Period of the expiry sweep while hosting.
    pub sweep_interval: Duration,
    /// How long a registration stays listed.
    pub session_lifetime: Duration,
    /// Upper bound on one client request, connect through reply.
    pub request_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            identity: DISCOVERY_PEER_ID.to_string(),
            sweep_interval: SWEEP_INTERVAL,
            session_lifetime: SESSION_LIFETIME,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("discovery host did not reply within {0:?}")]
    Timeout(Duration),

    #[error("discovery connection closed before a reply arrived")]
    ConnectionClosed,

    #[error("discovery host refused to register session {0}")]
    Rejected(String),
}

impl DiscoveryError {
    /// `true` when nobody holds the discovery identity.
    fn is_unreachable(&self) -> bool {
        matches!(self, Self::Transport(TransportError::PeerUnavailable(_)))
    }
}

// ── Role ──────────────────────────────────────────────────────────────────────

enum DiscoveryRole {
    /// No claim attempted yet, or the host role was given up.
    Undetermined,
    /// Another peer held the identity when we tried.
    Client,
    Host(HostRole),
}

/// Everything that exists only while this process is the discovery host.
///
/// Dropping it cancels the serve and sweep tasks and releases the identity.
struct HostRole {
    endpoint: Arc<dyn Endpoint>,
    registry: Arc<Mutex<SessionRegistry>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for HostRole {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.endpoint.destroy();
    }
}

/// Reply a client request waits for.
#[derive(Debug, Clone, Copy)]
enum Expect<'a> {
    Nothing,
    RegisterAck(&'a str),
    ListResponse,
}

impl Expect<'_> {
    fn accepts(&self, reply: &DiscoveryMessage) -> bool {
        match (self, reply) {
            (Self::RegisterAck(code), DiscoveryMessage::RegisterAck { code: acked, .. }) => {
                acked == code
            }
            (Self::ListResponse, DiscoveryMessage::ListResponse { .. }) => true,
            _ => false,
        }
    }
}

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Owns this process's discovery role and routes discovery operations.
pub struct DiscoveryCoordinator {
    transport: Arc<dyn Transport>,
    config: DiscoveryConfig,
    clock: Clock,
    role: Mutex<DiscoveryRole>,
}

impl DiscoveryCoordinator {
    pub fn new(transport: Arc<dyn Transport>, config: DiscoveryConfig) -> Self {
        Self {
            transport,
            config,
            clock: Arc::new(current_timestamp_ms),
            role: Mutex::new(DiscoveryRole::Undetermined),
        }
    }

    /// Replaces the wall clock used for registration stamps and expiry.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Tries to claim the discovery identity if no claim was attempted yet.
    ///
    /// Returns `true` if this process is the discovery host.  Losing the race
    /// is not an error; the coordinator simply acts as a client afterwards.
    pub async fn ensure_host(&self) -> Result<bool, DiscoveryError> {
        let mut role = self.role.lock().await;
        if matches!(&*role, DiscoveryRole::Undetermined) {
            return self.claim(&mut role).await;
        }
        Ok(matches!(&*role, DiscoveryRole::Host(_)))
    }

    /// Returns `true` while this process holds the discovery role.
    pub async fn is_host(&self) -> bool {
        matches!(&*self.role.lock().await, DiscoveryRole::Host(_))
    }

    /// Number of registrations held locally, or `None` when not hosting.
    pub async fn hosted_session_count(&self) -> Option<usize> {
        let registry = self.hosted_registry().await?;
        let count = registry.lock().await.len();
        Some(count)
    }

    /// Returns the live session list, newest first.
    ///
    /// If the discovery host is unreachable this process claims the role and
    /// returns an empty list, since a fresh registry has nothing in it.
    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>, DiscoveryError> {
        self.ensure_host().await?;
        if let Some(registry) = self.hosted_registry().await {
            let sessions = registry.lock().await.list(self.now());
            return Ok(sessions);
        }

        match self.request(DiscoveryMessage::List, Expect::ListResponse).await {
            Ok(Some(DiscoveryMessage::ListResponse { mut sessions })) => {
                sort_newest_first(&mut sessions);
                debug!(count = sessions.len(), "received session list");
                Ok(sessions)
            }
            Ok(other) => {
                warn!(?other, "unexpected reply to list request");
                Ok(Vec::new())
            }
            Err(e) if e.is_unreachable() => {
                warn!("discovery host unreachable; taking over the discovery role");
                self.promote().await?;
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Advertises a session.
    ///
    /// Writes locally when hosting.  Otherwise sends `register` and waits for
    /// the matching `register_ack`; if the discovery host is unreachable the
    /// coordinator promotes itself and retries once.
    pub async fn register_session(
        &self,
        code: &str,
        name: Option<&str>,
        is_private: bool,
    ) -> Result<(), DiscoveryError> {
        let mut promoted = false;
        loop {
            let now = self.now();
            let name = name.map(str::to_string);

            if let Some(registry) = self.hosted_registry().await {
                registry
                    .lock()
                    .await
                    .register(SessionRecord::new(code, now, name, is_private));
                return Ok(());
            }

            let request = DiscoveryMessage::Register {
                code: code.to_string(),
                timestamp: Some(now),
                name,
                is_private,
            };
            match self.request(request, Expect::RegisterAck(code)).await {
                Ok(Some(DiscoveryMessage::RegisterAck { success: true, .. })) => {
                    info!(%code, "session registered with discovery host");
                    return Ok(());
                }
                Ok(_) => return Err(DiscoveryError::Rejected(code.to_string())),
                Err(e) if e.is_unreachable() && !promoted => {
                    warn!(%code, "discovery host unreachable during register; taking over");
                    promoted = true;
                    self.promote().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Withdraws a session.  Best-effort: failures are logged and swallowed.
    pub async fn unregister_session(&self, code: &str) {
        if let Some(registry) = self.hosted_registry().await {
            registry.lock().await.unregister(code);
            return;
        }

        let request = DiscoveryMessage::Unregister {
            code: code.to_string(),
        };
        if let Err(e) = self.request(request, Expect::Nothing).await {
            debug!(%code, "unregister not delivered: {e}");
        }
    }

    /// Gives up the discovery role, if held.
    ///
    /// Clears the registry, cancels the sweep, and releases the identity.  The
    /// next `list_sessions` call runs a fresh election.
    pub async fn resign(&self) {
        let previous = std::mem::replace(&mut *self.role.lock().await, DiscoveryRole::Undetermined);
        if let DiscoveryRole::Host(host) = previous {
            host.registry.lock().await.clear();
            drop(host);
            info!("stopped hosting discovery");
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn now(&self) -> u64 {
        (self.clock)()
    }

    async fn hosted_registry(&self) -> Option<Arc<Mutex<SessionRegistry>>> {
        match &*self.role.lock().await {
            DiscoveryRole::Host(host) => Some(Arc::clone(&host.registry)),
            _ => None,
        }
    }

    /// Claims the role after the current holder was found unreachable.
    async fn promote(&self) -> Result<bool, DiscoveryError> {
        let mut role = self.role.lock().await;
        if matches!(&*role, DiscoveryRole::Host(_)) {
            return Ok(true);
        }
        self.claim(&mut role).await
    }

    async fn claim(&self, role: &mut DiscoveryRole) -> Result<bool, DiscoveryError> {
        match self.transport.bind(Some(&self.config.identity)).await {
            Ok(bound) => {
                info!(identity = %self.config.identity, "this process is now the discovery host");
                *role = DiscoveryRole::Host(self.start_host_role(bound));
                Ok(true)
            }
            Err(TransportError::IdentityTaken(_)) => {
                debug!(identity = %self.config.identity, "discovery identity taken; acting as client");
                *role = DiscoveryRole::Client;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn start_host_role(&self, bound: BoundEndpoint) -> HostRole {
        let registry = Arc::new(Mutex::new(SessionRegistry::new(self.config.session_lifetime)));
        let serve = tokio::spawn(serve_requests(
            bound.incoming,
            Arc::clone(&registry),
            Arc::clone(&self.clock),
        ));
        let sweep = tokio::spawn(sweep_expired(
            Arc::clone(&registry),
            self.config.sweep_interval,
            Arc::clone(&self.clock),
        ));
        HostRole {
            endpoint: bound.endpoint,
            registry,
            tasks: vec![serve, sweep],
        }
    }

    /// Sends one request to the discovery host from a throwaway identity.
    async fn request(
        &self,
        request: DiscoveryMessage,
        expect: Expect<'_>,
    ) -> Result<Option<DiscoveryMessage>, DiscoveryError> {
        let bound = self.transport.bind(None).await?;
        let limit = self.config.request_timeout;
        let outcome = tokio::time::timeout(
            limit,
            round_trip(&*bound.endpoint, &self.config.identity, &request, expect),
        )
        .await
        .unwrap_or(Err(DiscoveryError::Timeout(limit)));
        bound.endpoint.destroy();
        outcome
    }
}

async fn round_trip(
    endpoint: &dyn Endpoint,
    identity: &str,
    request: &DiscoveryMessage,
    expect: Expect<'_>,
) -> Result<Option<DiscoveryMessage>, DiscoveryError> {
    let DataConnection {
        channel,
        mut events,
    } = endpoint.connect(identity).await?;
    channel.send(&encode(request)?)?;

    if matches!(expect, Expect::Nothing) {
        channel.close();
        return Ok(None);
    }

    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Data(payload) => match decode::<DiscoveryMessage>(&payload) {
                Ok(reply) if expect.accepts(&reply) => {
                    channel.close();
                    return Ok(Some(reply));
                }
                Ok(other) => debug!(?other, "ignoring unrelated discovery reply"),
                Err(e) => warn!("malformed discovery reply: {e}"),
            },
            ChannelEvent::Error(e) => return Err(e.into()),
            ChannelEvent::Closed => break,
        }
    }
    Err(DiscoveryError::ConnectionClosed)
}

// ── Host-side tasks ───────────────────────────────────────────────────────────

async fn serve_requests(
    mut incoming: mpsc::UnboundedReceiver<Incoming>,
    registry: Arc<Mutex<SessionRegistry>>,
    clock: Clock,
) {
    while let Some(opened) = incoming.recv().await {
        match opened {
            Incoming::Connection(connection) => {
                debug!(peer = %connection.channel.remote_id(), "discovery connection received");
                tokio::spawn(serve_connection(
                    connection,
                    Arc::clone(&registry),
                    Arc::clone(&clock),
                ));
            }
            Incoming::Call(incoming_call) => {
                debug!(peer = %incoming_call.call.remote_id(), "discovery host rejects media call");
                incoming_call.call.close();
            }
        }
    }
}

async fn serve_connection(
    connection: DataConnection,
    registry: Arc<Mutex<SessionRegistry>>,
    clock: Clock,
) {
    let DataConnection {
        channel,
        mut events,
    } = connection;

    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Data(payload) => {
                let request = match decode::<DiscoveryMessage>(&payload) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(peer = %channel.remote_id(), "malformed discovery request: {e}");
                        continue;
                    }
                };
                let reply = apply_request(&mut *registry.lock().await, request, clock());
                let Some(reply) = reply else { continue };
                match encode(&reply) {
                    Ok(text) => {
                        if let Err(e) = channel.send(&text) {
                            debug!(peer = %channel.remote_id(), "discovery reply not sent: {e}");
                        }
                    }
                    Err(e) => error!("failed to encode discovery reply: {e}"),
                }
            }
            ChannelEvent::Closed => break,
            ChannelEvent::Error(e) => {
                debug!(peer = %channel.remote_id(), "discovery connection error: {e}");
                break;
            }
        }
    }
}

async fn sweep_expired(registry: Arc<Mutex<SessionRegistry>>, interval: Duration, clock: Clock) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let removed = registry.lock().await.sweep(clock());
        if removed > 0 {
            info!(removed, "swept expired sessions");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryNetwork;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio_test::assert_ok;

    fn coordinator(network: &MemoryNetwork) -> DiscoveryCoordinator {
        DiscoveryCoordinator::new(Arc::new(network.clone()), DiscoveryConfig::default())
    }

    fn manual_clock(start: u64) -> (Arc<AtomicU64>, Clock) {
        let now = Arc::new(AtomicU64::new(start));
        let reader = Arc::clone(&now);
        (now, Arc::new(move || reader.load(Ordering::SeqCst)))
    }

    #[tokio::test]
    async fn test_concurrent_election_has_exactly_one_winner() {
        // Arrange
        let network = MemoryNetwork::new();
        let contenders: Vec<_> = (0..8).map(|_| Arc::new(coordinator(&network))).collect();

        // Act
        let handles: Vec<_> = contenders
            .iter()
            .map(|c| {
                let c = Arc::clone(c);
                tokio::spawn(async move { c.ensure_host().await })
            })
            .collect();
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }

        // Assert
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_ensure_host_is_idempotent() {
        let network = MemoryNetwork::new();
        let host = coordinator(&network);
        let client = coordinator(&network);

        assert!(host.ensure_host().await.unwrap());
        assert!(host.ensure_host().await.unwrap());
        assert!(!client.ensure_host().await.unwrap());
        assert!(!client.ensure_host().await.unwrap());
    }

    #[tokio::test]
    async fn test_client_lists_session_registered_on_host() {
        // Arrange
        let network = MemoryNetwork::new();
        let host = coordinator(&network);
        let client = coordinator(&network);
        assert!(host.ensure_host().await.unwrap());
        assert_ok!(host.register_session("ABC", None, false).await);

        // Act
        let sessions = client.list_sessions().await.unwrap();

        // Assert
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].code, "ABC");
        assert!(!sessions[0].is_private);
        assert!(!client.is_host().await);
    }

    #[tokio::test]
    async fn test_client_register_is_acknowledged_and_stored_on_host() {
        // Arrange
        let network = MemoryNetwork::new();
        let host = coordinator(&network);
        let client = coordinator(&network);
        host.ensure_host().await.unwrap();
        client.ensure_host().await.unwrap();

        // Act
        assert_ok!(client.register_session("XYZ", Some("Studio"), true).await);

        // Assert
        let sessions = host.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].display_name.as_deref(), Some("Studio"));
        assert!(sessions[0].is_private);
    }

    #[tokio::test]
    async fn test_list_with_departed_host_promotes_and_returns_empty() {
        // Arrange
        let network = MemoryNetwork::new();
        let old_host = coordinator(&network);
        let client = coordinator(&network);
        old_host.ensure_host().await.unwrap();
        old_host.register_session("ABC", None, false).await.unwrap();
        client.ensure_host().await.unwrap();
        old_host.resign().await;

        // Act
        let sessions = client.list_sessions().await.unwrap();

        // Assert
        assert!(sessions.is_empty());
        assert!(client.is_host().await);
        assert!(!old_host.is_host().await);
    }

    #[tokio::test]
    async fn test_register_with_no_host_promotes_and_writes_locally() {
        // Arrange
        let network = MemoryNetwork::new();
        let solo = coordinator(&network);

        // Act
        assert_ok!(solo.register_session("ABC", None, false).await);

        // Assert
        assert!(solo.is_host().await);
        assert_eq!(solo.hosted_session_count().await, Some(1));
    }

    #[tokio::test]
    async fn test_remote_unregister_removes_session() {
        // Arrange
        let network = MemoryNetwork::new();
        let host = coordinator(&network);
        let client = coordinator(&network);
        host.ensure_host().await.unwrap();
        client.ensure_host().await.unwrap();
        client.register_session("ABC", None, false).await.unwrap();

        // Act
        client.unregister_session("ABC").await;

        // Assert: unregister has no reply, so wait for the host to process it.
        for _ in 0..100 {
            if host.hosted_session_count().await == Some(0) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(host.hosted_session_count().await, Some(0));
    }

    #[tokio::test]
    async fn test_unregister_without_any_host_is_swallowed() {
        let network = MemoryNetwork::new();
        let client = coordinator(&network);

        client.unregister_session("ABC").await;

        assert!(!client.is_host().await);
        assert!(!network.is_claimed(DISCOVERY_PEER_ID));
    }

    #[tokio::test]
    async fn test_resign_releases_identity_for_reelection() {
        // Arrange
        let network = MemoryNetwork::new();
        let first = coordinator(&network);
        let second = coordinator(&network);
        first.ensure_host().await.unwrap();

        // Act
        first.resign().await;
        first.resign().await;

        // Assert
        assert!(!network.is_claimed(DISCOVERY_PEER_ID));
        assert!(second.ensure_host().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired_sessions_while_hosting() {
        // Arrange
        let t0 = 1_700_000_000_000;
        let (now, clock) = manual_clock(t0);
        let network = MemoryNetwork::new();
        let host = coordinator(&network).with_clock(clock);
        host.ensure_host().await.unwrap();
        host.register_session("ABC", None, false).await.unwrap();
        // Let the sweep task start its interval before moving the clock.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // Act
        now.store(t0 + SESSION_LIFETIME.as_millis() as u64 + 1, Ordering::SeqCst);
        tokio::time::advance(SWEEP_INTERVAL + Duration::from_millis(1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // Assert
        assert_eq!(host.hosted_session_count().await, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_discovery_host_times_out() {
        // Arrange: something holds the identity but never answers.
        let network = MemoryNetwork::new();
        let _silent = network.bind(Some(DISCOVERY_PEER_ID)).await.unwrap();
        let client = coordinator(&network);

        // Act
        let result = client.list_sessions().await;

        // Assert
        assert!(matches!(result, Err(DiscoveryError::Timeout(_))));
    }
}
