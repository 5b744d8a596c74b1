//! In-process implementation of the transport contract.
//!
//! [`MemoryNetwork`] is a shared switchboard: every [`Transport::bind`] claims
//! a slot keyed by identity, and connecting or calling looks the remote slot
//! up and hands it the far half of a freshly created link.
//!
//! Guarantees, matching what callers rely on from a real peer transport:
//!
//! - claiming an identity is atomic; the second claim gets
//!   [`TransportError::IdentityTaken`];
//! - reaching an unclaimed identity fails with
//!   [`TransportError::PeerUnavailable`];
//! - messages on one connection arrive in send order;
//! - closing either half delivers one `Closed` event to each side;
//! - destroying (or dropping) an endpoint releases its identity and closes
//!   every link attached to it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{
    BoundEndpoint, CallEvent, ChannelEvent, DataChannel, DataConnection, Endpoint, Incoming,
    IncomingCall, MediaCall, MediaStream, OutgoingCall, PeerId, Transport, TransportError,
};

// ── Network ───────────────────────────────────────────────────────────────────

/// A process-local network of named peers.  Clones share the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    peers: HashMap<PeerId, PeerSlot>,
}

struct PeerSlot {
    /// Distinguishes this claim from a later claim of the same identity.
    token: Uuid,
    incoming: mpsc::UnboundedSender<Incoming>,
    links: Vec<Arc<dyn Link>>,
}

impl NetworkState {
    fn holds(&self, id: &str, token: Uuid) -> bool {
        self.peers.get(id).map_or(false, |slot| slot.token == token)
    }

    fn attach(&mut self, id: &str, link: Arc<dyn Link>) {
        if let Some(slot) = self.peers.get_mut(id) {
            slot.links.retain(|l| l.is_live());
            slot.links.push(link);
        }
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if some endpoint currently holds `identity`.
    pub fn is_claimed(&self, identity: &str) -> bool {
        self.lock().peers.contains_key(identity)
    }

    /// Number of identities currently claimed.
    pub fn peer_count(&self) -> usize {
        self.lock().peers.len()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes the slot for `id` if it still belongs to `token`, then closes
    /// its links outside the lock.
    fn release(&self, id: &str, token: Uuid) {
        let slot = {
            let mut state = self.lock();
            if !state.holds(id, token) {
                return;
            }
            state.peers.remove(id)
        };
        if let Some(slot) = slot {
            debug!(identity = %id, links = slot.links.len(), "memory endpoint released");
            for link in slot.links {
                link.sever();
            }
        }
    }
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("peers", &self.peer_count())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn bind(&self, identity: Option<&str>) -> Result<BoundEndpoint, TransportError> {
        let id = identity
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let token = Uuid::new_v4();
        {
            let mut state = self.lock();
            if state.peers.contains_key(&id) {
                return Err(TransportError::IdentityTaken(id));
            }
            state.peers.insert(
                id.clone(),
                PeerSlot {
                    token,
                    incoming: incoming_tx,
                    links: Vec::new(),
                },
            );
        }

        debug!(identity = %id, "memory endpoint bound");
        Ok(BoundEndpoint {
            endpoint: Arc::new(MemoryEndpoint {
                id,
                token,
                network: self.clone(),
            }),
            incoming: incoming_rx,
        })
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

struct MemoryEndpoint {
    id: PeerId,
    token: Uuid,
    network: MemoryNetwork,
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    async fn connect(&self, remote: &str) -> Result<DataConnection, TransportError> {
        let mut state = self.network.lock();
        if !state.holds(&self.id, self.token) {
            return Err(TransportError::ChannelClosed);
        }
        let remote_incoming = match state.peers.get(remote) {
            Some(slot) => slot.incoming.clone(),
            None => return Err(TransportError::PeerUnavailable(remote.to_string())),
        };

        let open = Arc::new(AtomicBool::new(true));
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let local = Arc::new(MemoryChannel {
            remote_id: remote.to_string(),
            open: Arc::clone(&open),
            outbound: remote_tx.clone(),
            inbound: local_tx.clone(),
        });
        let far = Arc::new(MemoryChannel {
            remote_id: self.id.clone(),
            open,
            outbound: local_tx,
            inbound: remote_tx,
        });

        let delivered = remote_incoming.send(Incoming::Connection(DataConnection {
            channel: far.clone(),
            events: remote_rx,
        }));
        if delivered.is_err() {
            return Err(TransportError::PeerUnavailable(remote.to_string()));
        }

        state.attach(remote, far);
        state.attach(&self.id, local.clone());
        Ok(DataConnection {
            channel: local,
            events: local_rx,
        })
    }

    async fn call(
        &self,
        remote: &str,
        stream: MediaStream,
    ) -> Result<OutgoingCall, TransportError> {
        let mut state = self.network.lock();
        if !state.holds(&self.id, self.token) {
            return Err(TransportError::ChannelClosed);
        }
        let remote_incoming = match state.peers.get(remote) {
            Some(slot) => slot.incoming.clone(),
            None => return Err(TransportError::PeerUnavailable(remote.to_string())),
        };

        let shared = Arc::new(CallState::default());
        let (caller_tx, caller_rx) = mpsc::unbounded_channel();
        let (callee_tx, callee_rx) = mpsc::unbounded_channel();
        let caller = Arc::new(MemoryCall {
            remote_id: remote.to_string(),
            is_callee: false,
            offered: stream.clone(),
            shared: Arc::clone(&shared),
            outbound: callee_tx.clone(),
            inbound: caller_tx.clone(),
        });
        let callee = Arc::new(MemoryCall {
            remote_id: self.id.clone(),
            is_callee: true,
            offered: stream.clone(),
            shared,
            outbound: caller_tx,
            inbound: callee_tx,
        });

        let delivered = remote_incoming.send(Incoming::Call(IncomingCall {
            call: callee.clone(),
            events: callee_rx,
            offered: stream,
        }));
        if delivered.is_err() {
            return Err(TransportError::PeerUnavailable(remote.to_string()));
        }

        state.attach(remote, callee);
        state.attach(&self.id, caller.clone());
        Ok(OutgoingCall {
            call: caller,
            events: caller_rx,
        })
    }

    fn destroy(&self) {
        self.network.release(&self.id, self.token);
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.network.release(&self.id, self.token);
    }
}

// ── Links ─────────────────────────────────────────────────────────────────────

/// Anything an endpoint must close when it is destroyed.
trait Link: Send + Sync {
    fn sever(&self);
    fn is_live(&self) -> bool;
}

struct MemoryChannel {
    remote_id: PeerId,
    /// Shared by both halves.
    open: Arc<AtomicBool>,
    /// Events for the other half.
    outbound: mpsc::UnboundedSender<ChannelEvent>,
    /// Events for this half.
    inbound: mpsc::UnboundedSender<ChannelEvent>,
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("remote_id", &self.remote_id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl DataChannel for MemoryChannel {
    fn remote_id(&self) -> &str {
        &self.remote_id
    }

    fn send(&self, payload: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        self.outbound
            .send(ChannelEvent::Data(payload.to_string()))
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            // Either receiver may already be gone; that side no longer cares.
            let _ = self.outbound.send(ChannelEvent::Closed);
            let _ = self.inbound.send(ChannelEvent::Closed);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Link for MemoryChannel {
    fn sever(&self) {
        self.close();
    }

    fn is_live(&self) -> bool {
        self.is_open()
    }
}

struct CallState {
    open: AtomicBool,
    answered: AtomicBool,
}

impl Default for CallState {
    fn default() -> Self {
        Self {
            open: AtomicBool::new(true),
            answered: AtomicBool::new(false),
        }
    }
}

struct MemoryCall {
    remote_id: PeerId,
    is_callee: bool,
    offered: MediaStream,
    shared: Arc<CallState>,
    outbound: mpsc::UnboundedSender<CallEvent>,
    inbound: mpsc::UnboundedSender<CallEvent>,
}

impl fmt::Debug for MemoryCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCall")
            .field("remote_id", &self.remote_id)
            .field("is_callee", &self.is_callee)
            .field("open", &self.is_open())
            .finish()
    }
}

impl MediaCall for MemoryCall {
    fn remote_id(&self) -> &str {
        &self.remote_id
    }

    fn answer(&self, stream: MediaStream) -> Result<(), TransportError> {
        if !self.is_callee {
            return Err(TransportError::Other(
                "only the callee can answer a call".to_string(),
            ));
        }
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        if self.shared.answered.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Other("call already answered".to_string()));
        }
        let _ = self.outbound.send(CallEvent::Stream(stream));
        let _ = self.inbound.send(CallEvent::Stream(self.offered.clone()));
        Ok(())
    }

    fn close(&self) {
        if self.shared.open.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(CallEvent::Closed);
            let _ = self.inbound.send(CallEvent::Closed);
        }
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}

impl Link for MemoryCall {
    fn sever(&self) {
        self.close();
    }

    fn is_live(&self) -> bool {
        self.is_open()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_claim_of_identity_is_rejected() {
        // Arrange
        let network = MemoryNetwork::new();
        let _first = network.bind(Some("DISCOVERY")).await.unwrap();

        // Act
        let second = network.bind(Some("DISCOVERY")).await;

        // Assert
        assert_eq!(
            second.err(),
            Some(TransportError::IdentityTaken("DISCOVERY".to_string()))
        );
    }

    #[tokio::test]
    async fn test_anonymous_binds_get_distinct_identities() {
        let network = MemoryNetwork::new();
        let a = network.bind(None).await.unwrap();
        let b = network.bind(None).await.unwrap();
        assert_ne!(a.endpoint.id(), b.endpoint.id());
        assert_eq!(network.peer_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_to_unclaimed_identity_is_unavailable() {
        let network = MemoryNetwork::new();
        let client = network.bind(None).await.unwrap();

        let result = client.endpoint.connect("NOBODY").await;

        assert_eq!(
            result.err().map(|e| e.to_string()),
            Some(TransportError::PeerUnavailable("NOBODY".to_string()).to_string())
        );
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order_and_close_reaches_both_sides() {
        // Arrange
        let network = MemoryNetwork::new();
        let mut server = network.bind(Some("HOST")).await.unwrap();
        let client = network.bind(None).await.unwrap();
        let mut local = client.endpoint.connect("HOST").await.unwrap();
        let Some(Incoming::Connection(mut remote)) = server.incoming.recv().await else {
            panic!("expected an inbound connection");
        };

        // Act
        local.channel.send("one").unwrap();
        local.channel.send("two").unwrap();
        remote.channel.close();
        remote.channel.close();

        // Assert
        assert_eq!(remote.events.recv().await, Some(ChannelEvent::Data("one".into())));
        assert_eq!(remote.events.recv().await, Some(ChannelEvent::Data("two".into())));
        assert_eq!(remote.events.recv().await, Some(ChannelEvent::Closed));
        assert_eq!(local.events.recv().await, Some(ChannelEvent::Closed));
        assert!(local.events.try_recv().is_err(), "closed must be delivered once");
        assert_eq!(local.channel.send("late"), Err(TransportError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_destroy_releases_identity_and_closes_links() {
        // Arrange
        let network = MemoryNetwork::new();
        let server = network.bind(Some("HOST")).await.unwrap();
        let client = network.bind(None).await.unwrap();
        let mut local = client.endpoint.connect("HOST").await.unwrap();

        // Act
        server.endpoint.destroy();

        // Assert
        assert_eq!(local.events.recv().await, Some(ChannelEvent::Closed));
        assert!(!network.is_claimed("HOST"));
        assert!(network.bind(Some("HOST")).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_endpoint_does_not_release_new_claim() {
        // Arrange
        let network = MemoryNetwork::new();
        let first = network.bind(Some("HOST")).await.unwrap();
        first.endpoint.destroy();
        let _second = network.bind(Some("HOST")).await.unwrap();

        // Act
        drop(first);

        // Assert
        assert!(network.is_claimed("HOST"));
    }

    #[tokio::test]
    async fn test_answered_call_delivers_host_stream_to_caller() {
        // Arrange
        let network = MemoryNetwork::new();
        let mut host = network.bind(Some("HOST")).await.unwrap();
        let joiner = network.bind(None).await.unwrap();
        let mut outgoing = joiner
            .endpoint
            .call("HOST", MediaStream::placeholder())
            .await
            .unwrap();
        let Some(Incoming::Call(incoming)) = host.incoming.recv().await else {
            panic!("expected an inbound call");
        };
        let screen = MediaStream::new("screen");

        // Act
        incoming.call.answer(screen.clone()).unwrap();

        // Assert
        assert_eq!(outgoing.events.recv().await, Some(CallEvent::Stream(screen)));
        assert!(incoming.call.answer(MediaStream::new("again")).is_err());
        assert!(outgoing.call.answer(MediaStream::new("caller")).is_err());
    }
}
