//! Point-to-point transport contract.
//!
//! Peershare is written against a small named-identity transport: a peer
//! claims an identity string, and any other peer can open a *data connection*
//! (ordered text messages) or place a *media call* (a stream attachment) to
//! that identity.  Real deployments back this with a WebRTC-style peer
//! library; tests and the simulator use [`memory::MemoryNetwork`].
//!
//! # Event model (for beginners)
//!
//! Every connection and call comes as a pair: a shared handle
//! (`Arc<dyn DataChannel>` / `Arc<dyn MediaCall>`) used to act on it, and an
//! `mpsc` receiver of events (`Data`, `Closed`, `Error`).  The handle can be
//! cloned into registries and closed from anywhere, while exactly one task
//! owns the receiver and reacts to events in order.
//!
//! Two error kinds are distinguished because callers branch on them:
//! [`TransportError::IdentityTaken`] (someone else holds the identity we tried
//! to claim) and [`TransportError::PeerUnavailable`] (nobody holds the identity
//! we tried to reach).

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A transport identity.  Hosts use their session code; everybody else gets
/// an anonymous UUID.
pub type PeerId = String;

/// Errors surfaced by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Another peer already holds the identity we tried to claim.
    #[error("identity already claimed: {0}")]
    IdentityTaken(String),

    /// No peer holds the identity we tried to reach.
    #[error("remote identity unreachable: {0}")]
    PeerUnavailable(String),

    /// The connection, call, or endpoint has already been closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Any other transport failure.
    #[error("transport failure: {0}")]
    Other(String),
}

// ── Media streams ─────────────────────────────────────────────────────────────

/// Opaque reference to a live media stream.
///
/// Capture and rendering happen elsewhere; the transport only carries which
/// stream is attached to which call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    id: Uuid,
    label: String,
}

impl MediaStream {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
        }
    }

    /// An empty stream a joiner offers when calling, since it sends nothing.
    pub fn placeholder() -> Self {
        Self::new("placeholder")
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Events delivered on a data connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Data(String),
    Closed,
    Error(TransportError),
}

/// Events delivered on a media call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// The remote side attached its stream.
    Stream(MediaStream),
    Closed,
    Error(TransportError),
}

// ── Handles ───────────────────────────────────────────────────────────────────

/// Sending side of an open data connection.
pub trait DataChannel: Send + Sync + fmt::Debug {
    fn remote_id(&self) -> &str;

    /// Sends one text message.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ChannelClosed`] once either side has closed.
    fn send(&self, payload: &str) -> Result<(), TransportError>;

    /// Closes the connection.  Both sides receive [`ChannelEvent::Closed`]
    /// exactly once; closing again is a no-op.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// Control side of a media call.
pub trait MediaCall: Send + Sync + fmt::Debug {
    fn remote_id(&self) -> &str;

    /// Answers an incoming call, attaching `stream` for the caller.
    ///
    /// # Errors
    ///
    /// Fails if the call is closed, was already answered, or was placed by us.
    fn answer(&self, stream: MediaStream) -> Result<(), TransportError>;

    /// Hangs up.  Idempotent.
    fn close(&self);

    fn is_open(&self) -> bool;
}

/// An open data connection: the shared handle plus its event stream.
#[derive(Debug)]
pub struct DataConnection {
    pub channel: Arc<dyn DataChannel>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// A call placed to us, not yet answered.
#[derive(Debug)]
pub struct IncomingCall {
    pub call: Arc<dyn MediaCall>,
    pub events: mpsc::UnboundedReceiver<CallEvent>,
    /// The stream the caller attached when dialling.
    pub offered: MediaStream,
}

/// A call we placed.
#[derive(Debug)]
pub struct OutgoingCall {
    pub call: Arc<dyn MediaCall>,
    pub events: mpsc::UnboundedReceiver<CallEvent>,
}

/// Something a remote peer opened towards us.
#[derive(Debug)]
pub enum Incoming {
    Connection(DataConnection),
    Call(IncomingCall),
}

// ── Endpoint / Transport ──────────────────────────────────────────────────────

/// A claimed identity on the transport.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// The identity this endpoint holds.
    fn id(&self) -> &str;

    /// Opens a data connection to `remote`.  Resolves once the connection is open.
    ///
    /// # Errors
    ///
    /// [`TransportError::PeerUnavailable`] if nobody holds `remote`.
    async fn connect(&self, remote: &str) -> Result<DataConnection, TransportError>;

    /// Places a media call to `remote`, offering `stream`.
    ///
    /// # Errors
    ///
    /// [`TransportError::PeerUnavailable`] if nobody holds `remote`.
    async fn call(&self, remote: &str, stream: MediaStream)
        -> Result<OutgoingCall, TransportError>;

    /// Releases the identity and closes every connection and call on it.
    fn destroy(&self);
}

/// A freshly bound endpoint and the receiver of everything opened towards it.
pub struct BoundEndpoint {
    pub endpoint: Arc<dyn Endpoint>,
    pub incoming: mpsc::UnboundedReceiver<Incoming>,
}

impl fmt::Debug for BoundEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundEndpoint")
            .field("id", &self.endpoint.id())
            .finish()
    }
}

/// Factory for endpoints.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Claims `identity`, or an anonymous identity when `None`.
    ///
    /// # Errors
    ///
    /// [`TransportError::IdentityTaken`] if another peer holds `identity`.
    async fn bind(&self, identity: Option<&str>) -> Result<BoundEndpoint, TransportError>;
}
