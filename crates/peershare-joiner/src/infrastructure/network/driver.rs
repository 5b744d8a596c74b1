//! Drives the joiner handshake once the call to the host is placed.
//!
//! The host answers a call by opening a data connection back to the joiner,
//! so the driver watches four sources at once:
//!
//! - the endpoint's incoming queue, for the host's data connection,
//! - that data connection, for handshake messages,
//! - the call, for the host's stream (success) or a hang-up,
//! - the status countdown, for progress, warnings, and the overall timeout,
//! - an open PIN prompt, whose answer is just one more event.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use peershare_core::protocol::{decode, encode, HandshakeMessage};
use peershare_core::transport::{
    BoundEndpoint, CallEvent, ChannelEvent, DataConnection, Endpoint, Incoming, MediaCall,
    MediaStream, OutgoingCall,
};
use peershare_core::PeerId;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::application::connection_status::{ConnectionStatusTracker, StatusEvent};
use crate::application::handshake::{JoinFailure, JoinerAction, JoinerHandshake, JoinerInput};
use crate::infrastructure::prompt::{JoinPrompt, PIN_REQUESTED_PROMPT};

/// A successful join: the host's stream plus the links that keep it alive.
///
/// Dropping the admission hangs up, which the host sees as the participant
/// leaving.
pub struct Admission {
    host: PeerId,
    stream: MediaStream,
    call: Arc<dyn MediaCall>,
    call_events: mpsc::UnboundedReceiver<CallEvent>,
    channel: Option<DataConnection>,
    endpoint: Arc<dyn Endpoint>,
}

impl Admission {
    /// Session code of the host.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    /// Our own transport identity, as the host sees it.
    pub fn peer_id(&self) -> &str {
        self.endpoint.id()
    }

    pub fn is_connected(&self) -> bool {
        self.call.is_open()
    }

    /// Resolves when the host hangs up or the call fails.
    pub async fn wait_closed(&mut self) {
        loop {
            match self.call_events.recv().await {
                Some(CallEvent::Stream(_)) => {}
                Some(CallEvent::Error(e)) => {
                    warn!(host = %self.host, "call error: {e}");
                    return;
                }
                Some(CallEvent::Closed) | None => {
                    info!(host = %self.host, "host ended the call");
                    return;
                }
            }
        }
    }

    /// Leaves the session.
    pub fn leave(self) {
        info!(host = %self.host, "leaving session");
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.call.close();
        if let Some(connection) = &self.channel {
            connection.channel.close();
        }
        self.endpoint.destroy();
    }
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admission")
            .field("host", &self.host)
            .field("peer_id", &self.endpoint.id())
            .field("stream", &self.stream)
            .finish()
    }
}

// ── Negotiation ───────────────────────────────────────────────────────────────

/// A PIN prompt the user has not answered yet.
type OpenPrompt<'p> = Pin<Box<dyn Future<Output = Option<String>> + Send + 'p>>;

pub(crate) struct Joining {
    host: PeerId,
    endpoint: Arc<dyn Endpoint>,
    incoming: mpsc::UnboundedReceiver<Incoming>,
    call: Arc<dyn MediaCall>,
    call_events: mpsc::UnboundedReceiver<CallEvent>,
    channel: Option<DataConnection>,
    tracker: ConnectionStatusTracker,
    status_events: mpsc::UnboundedReceiver<StatusEvent>,
}

impl Joining {
    pub(crate) fn new(
        host: PeerId,
        bound: BoundEndpoint,
        outgoing: OutgoingCall,
        tracker: ConnectionStatusTracker,
        status_events: mpsc::UnboundedReceiver<StatusEvent>,
    ) -> Self {
        Self {
            host,
            endpoint: bound.endpoint,
            incoming: bound.incoming,
            call: outgoing.call,
            call_events: outgoing.events,
            channel: None,
            tracker,
            status_events,
        }
    }

    /// Feeds events into `machine` until it admits or fails.
    ///
    /// A PIN prompt never blocks the loop: while it is open the countdown
    /// and the host's connection keep being watched, and a failure drops
    /// the prompt unanswered.
    pub(crate) async fn run(
        mut self,
        mut machine: JoinerHandshake,
        prompt: &dyn JoinPrompt,
    ) -> Result<Admission, JoinFailure> {
        let mut open_prompt: Option<OpenPrompt<'_>> = None;
        loop {
            let input = self.next_input(prompt, &mut open_prompt).await;
            for action in machine.handle(input) {
                match action {
                    JoinerAction::Send(msg) => self.send(&msg),
                    JoinerAction::PromptPin => {
                        open_prompt = Some(prompt.request_pin(PIN_REQUESTED_PROMPT));
                    }
                    JoinerAction::Status(stage) => self.tracker.set_stage(stage),
                    JoinerAction::Admitted(stream) => return Ok(self.admit(stream)),
                    JoinerAction::Failed(failure) => {
                        if open_prompt.take().is_some() {
                            debug!(host = %self.host, "closing the unanswered PIN prompt");
                        }
                        self.teardown();
                        return Err(failure);
                    }
                }
            }
        }
    }

    async fn next_input(
        &mut self,
        prompt: &dyn JoinPrompt,
        open_prompt: &mut Option<OpenPrompt<'_>>,
    ) -> JoinerInput {
        loop {
            // Messages on the data connection are handled before a hang-up
            // that was queued after them.
            tokio::select! {
                biased;

                opened = self.incoming.recv() => match opened {
                    Some(Incoming::Connection(connection)) => self.accept_connection(connection),
                    Some(Incoming::Call(call)) => {
                        debug!(peer = %call.call.remote_id(), "joiners do not take calls; hanging up");
                        call.call.close();
                    }
                    None => return JoinerInput::ChannelClosed,
                },
                event = recv_channel(&mut self.channel) => match event {
                    Some(ChannelEvent::Data(payload)) => match decode::<HandshakeMessage>(&payload) {
                        Ok(msg) => return JoinerInput::Message(msg),
                        Err(e) => warn!(host = %self.host, "malformed handshake message: {e}"),
                    },
                    Some(ChannelEvent::Error(e)) => {
                        warn!(host = %self.host, "data connection error: {e}");
                        return JoinerInput::ChannelClosed;
                    }
                    Some(ChannelEvent::Closed) | None => return JoinerInput::ChannelClosed,
                },
                event = self.call_events.recv() => match event {
                    Some(CallEvent::Stream(stream)) => return JoinerInput::StreamArrived(stream),
                    Some(CallEvent::Error(e)) => {
                        warn!(host = %self.host, "call error: {e}");
                        return JoinerInput::CallClosed;
                    }
                    Some(CallEvent::Closed) | None => return JoinerInput::CallClosed,
                },
                pin = answer(open_prompt) => return JoinerInput::PinEntered(pin),
                Some(status) = self.status_events.recv() => match status {
                    StatusEvent::Update(snapshot) => prompt.status(&snapshot),
                    StatusEvent::Warning(remaining) => prompt.warning(remaining),
                    StatusEvent::TimedOut => return JoinerInput::TimedOut,
                },
            }
        }
    }

    fn accept_connection(&mut self, connection: DataConnection) {
        let remote = connection.channel.remote_id();
        if remote != self.host || self.channel.is_some() {
            debug!(peer = %remote, "unexpected data connection; closing");
            connection.channel.close();
            return;
        }
        debug!(host = %self.host, "host opened the data connection");
        self.channel = Some(connection);
    }

    fn send(&self, msg: &HandshakeMessage) {
        let Some(connection) = &self.channel else {
            warn!(kind = msg.kind(), "no data connection to reply on");
            return;
        };
        let text = match encode(msg) {
            Ok(text) => text,
            Err(e) => {
                error!("failed to encode {}: {e}", msg.kind());
                return;
            }
        };
        if let Err(e) = connection.channel.send(&text) {
            debug!(kind = msg.kind(), "send failed: {e}");
        }
    }

    fn admit(mut self, stream: MediaStream) -> Admission {
        self.tracker.stop();
        info!(host = %self.host, stream = %stream.id(), "joined session");
        Admission {
            host: self.host,
            stream,
            call: self.call,
            call_events: self.call_events,
            channel: self.channel,
            endpoint: self.endpoint,
        }
    }

    fn teardown(&mut self) {
        self.tracker.stop();
        if let Some(connection) = &self.channel {
            connection.channel.close();
        }
        self.call.close();
        self.endpoint.destroy();
    }
}

async fn answer(slot: &mut Option<OpenPrompt<'_>>) -> Option<String> {
    let Some(open) = slot.as_mut() else {
        return std::future::pending().await;
    };
    let pin = open.await;
    *slot = None;
    pin
}

async fn recv_channel(slot: &mut Option<DataConnection>) -> Option<ChannelEvent> {
    match slot {
        Some(connection) => connection.events.recv().await,
        None => std::future::pending().await,
    }
}
