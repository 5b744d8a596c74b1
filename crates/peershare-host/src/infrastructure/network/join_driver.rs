//! Per-joiner task: drives one [`HostHandshake`] over a live connection.
//!
//! The task owns the joiner's event receivers, the single armed timer, the
//! operator-decision channel, and a view of the session's end signal.  It waits on all of them at once with
//! `tokio::select!`, hands whichever fires to the machine, and applies the
//! resulting actions before waiting again, so the machine sees exactly one
//! input at a time.
//!
//! After admission the task stays alive to notice the participant leaving.

use std::pin::Pin;
use std::sync::Arc;

use peershare_core::protocol::{decode, encode, HandshakeMessage};
use peershare_core::transport::{
    CallEvent, ChannelEvent, DataChannel, DataConnection, IncomingCall, MediaCall,
};
use peershare_core::PeerId;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use crate::application::handshake::{
    Decision, HostAction, HostHandshake, HostInput, HostStage, TimerTag,
};
use crate::application::participants::PendingParticipant;
use crate::infrastructure::network::host_session::{
    HandshakeLinks, HostEvent, JoinContext, PendingEntry,
};

type ArmedTimer = Option<(TimerTag, Pin<Box<Sleep>>)>;

struct JoinDriver {
    ctx: JoinContext,
    peer_id: PeerId,
    channel: Arc<dyn DataChannel>,
    call: Arc<dyn MediaCall>,
    timer: ArmedTimer,
    decision: Option<oneshot::Receiver<Decision>>,
    ended: watch::Receiver<bool>,
}

/// Runs the admission handshake for one joiner, then watches the admitted
/// participant until it leaves.
pub(crate) async fn run_join(
    ctx: JoinContext,
    ended: watch::Receiver<bool>,
    incoming: IncomingCall,
    connection: DataConnection,
) {
    let IncomingCall {
        call,
        events: mut call_events,
        ..
    } = incoming;
    let DataConnection {
        channel,
        events: mut channel_events,
    } = connection;
    let peer_id = call.remote_id().to_string();

    let policy = {
        let mut state = ctx.state.lock().await;
        let policy = state.policy.clone();
        if policy.is_some() {
            state.handshaking.insert(
                peer_id.clone(),
                HandshakeLinks {
                    channel: Arc::clone(&channel),
                    call: Arc::clone(&call),
                },
            );
        }
        policy
    };
    let Some(policy) = policy else {
        debug!(peer = %peer_id, "hosting stopped before the handshake began");
        channel.close();
        call.close();
        return;
    };

    let mut machine = HostHandshake::new(peer_id.clone(), policy, ctx.config.timeouts);
    let mut driver = JoinDriver {
        ctx,
        peer_id,
        channel,
        call,
        timer: None,
        decision: None,
        ended,
    };

    let mut input = HostInput::Opened;
    loop {
        for action in machine.handle(input) {
            driver.apply(action).await;
        }
        if machine.stage().is_terminal() {
            break;
        }
        input = driver.next_input(&mut channel_events, &mut call_events).await;
    }
    driver.ctx.state.lock().await.handshaking.remove(&driver.peer_id);

    if machine.stage() == HostStage::Approved {
        driver.watch_participant(channel_events, call_events).await;
    }
}

impl JoinDriver {
    async fn next_input(
        &mut self,
        channel_events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
        call_events: &mut mpsc::UnboundedReceiver<CallEvent>,
    ) -> HostInput {
        loop {
            // A message that arrived before a close is processed first.
            tokio::select! {
                biased;

                // Either a stop or the session being dropped.
                _ = self.ended.changed() => return HostInput::SessionEnded,
                event = channel_events.recv() => match event {
                    Some(ChannelEvent::Data(payload)) => match decode::<HandshakeMessage>(&payload) {
                        Ok(msg) => return HostInput::Message(msg),
                        Err(e) => warn!(peer = %self.peer_id, "malformed handshake message: {e}"),
                    },
                    Some(ChannelEvent::Error(e)) => return HostInput::ChannelFailed(e),
                    Some(ChannelEvent::Closed) | None => return HostInput::ChannelClosed,
                },
                event = call_events.recv() => match event {
                    Some(CallEvent::Stream(_)) => {}
                    Some(CallEvent::Error(e)) => return HostInput::ChannelFailed(e),
                    Some(CallEvent::Closed) | None => return HostInput::ChannelClosed,
                },
                tag = expire(&mut self.timer) => return HostInput::TimerFired(tag),
                decision = decide(&mut self.decision) => {
                    return match decision {
                        Some(decision) => HostInput::Decision(decision),
                        // Only a stop drops the pending entry's sender.
                        None => HostInput::SessionEnded,
                    };
                }
            }
        }
    }

    async fn apply(&mut self, action: HostAction) {
        match action {
            HostAction::Send(msg) => self.send(&msg),
            HostAction::ArmTimer { tag, after } => {
                self.timer = Some((tag, Box::pin(tokio::time::sleep(after))));
            }
            HostAction::CancelTimer => self.timer = None,
            HostAction::RequestApproval(request) => {
                let (tx, rx) = oneshot::channel();
                let entry = PendingEntry {
                    info: PendingParticipant {
                        peer_id: request.peer_id.clone(),
                        claimed_name: request.claimed_name.clone(),
                        pin_validated: request.pin_validated,
                        connection: Arc::clone(&self.channel),
                    },
                    decision: Some(tx),
                };
                {
                    let mut state = self.ctx.state.lock().await;
                    if state.policy.is_none() {
                        // Stopped meanwhile: `tx` drops here and the decision
                        // wait resolves as the session ending.
                        return;
                    }
                    state.pending.insert(self.peer_id.clone(), entry);
                }
                self.decision = Some(rx);
                self.ctx.emit(HostEvent::ApprovalRequested(request));
            }
            HostAction::DropPending => {
                self.ctx.state.lock().await.pending.remove(&self.peer_id);
            }
            HostAction::Admit { name } => self.admit(name.as_deref()).await,
            HostAction::Close { linger } => {
                if linger {
                    tokio::time::sleep(self.ctx.config.close_linger).await;
                }
                self.channel.close();
                self.call.close();
            }
            HostAction::Notify(notice) => self.ctx.emit(HostEvent::Notice(notice)),
        }
    }

    fn send(&self, msg: &HandshakeMessage) {
        let text = match encode(msg) {
            Ok(text) => text,
            Err(e) => {
                error!("failed to encode {}: {e}", msg.kind());
                return;
            }
        };
        match self.channel.send(&text) {
            Ok(()) => debug!(peer = %self.peer_id, kind = msg.kind(), "sent"),
            Err(e) => debug!(peer = %self.peer_id, kind = msg.kind(), "send failed: {e}"),
        }
    }

    async fn admit(&mut self, name: Option<&str>) {
        let admitted = {
            let mut state = self.ctx.state.lock().await;
            match state.outbound.clone() {
                Some(stream) => match self.call.answer(stream) {
                    Ok(()) => Some(state.participants.add(
                        Arc::clone(&self.call),
                        &self.peer_id,
                        name,
                        Some(Arc::clone(&self.channel)),
                    )),
                    Err(e) => {
                        warn!(peer = %self.peer_id, "could not answer call: {e}");
                        None
                    }
                },
                None => {
                    warn!(peer = %self.peer_id, "no outbound stream to answer with");
                    None
                }
            }
        };

        match admitted {
            Some(participant) => {
                info!(peer = %self.peer_id, name = %participant.friendly_name, "participant joined");
                self.ctx.emit(HostEvent::ParticipantJoined {
                    peer_id: participant.peer_id,
                    friendly_name: participant.friendly_name,
                });
            }
            None => {
                self.channel.close();
                self.call.close();
            }
        }
    }

    async fn watch_participant(
        self,
        mut channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
        mut call_events: mpsc::UnboundedReceiver<CallEvent>,
    ) {
        loop {
            tokio::select! {
                event = channel_events.recv() => match event {
                    Some(ChannelEvent::Data(_)) => {
                        debug!(peer = %self.peer_id, "ignoring message from admitted participant");
                    }
                    Some(ChannelEvent::Error(e)) => {
                        debug!(peer = %self.peer_id, "participant connection error: {e}");
                        break;
                    }
                    Some(ChannelEvent::Closed) | None => break,
                },
                event = call_events.recv() => match event {
                    Some(CallEvent::Stream(_)) => {}
                    Some(CallEvent::Error(e)) => {
                        debug!(peer = %self.peer_id, "participant call error: {e}");
                        break;
                    }
                    Some(CallEvent::Closed) | None => break,
                },
            }
        }

        let removed = {
            let mut state = self.ctx.state.lock().await;
            let ours = state
                .participants
                .get(&self.peer_id)
                .map_or(false, |p| same_call(p.call(), &self.call));
            if ours {
                state.participants.remove(&self.peer_id)
            } else {
                None
            }
        };
        self.call.close();

        if let Some(participant) = removed {
            self.ctx.emit(HostEvent::ParticipantLeft {
                peer_id: participant.peer_id,
                friendly_name: participant.friendly_name,
            });
        }
    }
}

fn same_call(a: &Arc<dyn MediaCall>, b: &Arc<dyn MediaCall>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

async fn expire(timer: &mut ArmedTimer) -> TimerTag {
    let tag = match timer.as_mut() {
        Some((tag, sleep)) => {
            sleep.as_mut().await;
            *tag
        }
        None => return std::future::pending().await,
    };
    *timer = None;
    tag
}

async fn decide(slot: &mut Option<oneshot::Receiver<Decision>>) -> Option<Decision> {
    let Some(rx) = slot.as_mut() else {
        return std::future::pending().await;
    };
    let decision = rx.await.ok();
    *slot = None;
    decision
}
