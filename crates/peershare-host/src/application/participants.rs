//! Participant registry: who is currently watching the host's stream.
//!
//! The `ParticipantRegistry` is the host's in-memory table of admitted
//! joiners, keyed by transport identity.  Alongside it the host tracks
//! joiners still waiting on approval; [`PendingParticipant`] is the snapshot
//! of one of those.
//!
//! # Participant lifecycle (for beginners)
//!
//! ```text
//! call arrives ──► handshake ──► PendingParticipant ──► approve ──► Participant
//!                      │                 │                               │
//!                   PIN fail          deny / lost            close / disconnect
//! ```
//!
//! A participant is removed when its connection closes, errors, or the
//! operator disconnects it.  Removal is idempotent, so the connection-closed
//! path and an explicit disconnect can race without harm.

use std::collections::HashMap;
use std::sync::Arc;

use peershare_core::transport::{DataChannel, MediaCall};
use peershare_core::{current_timestamp_ms, PeerId};
use tracing::{info, warn};

use crate::application::policy::normalize_name;

/// A joiner that passed the PIN and name stages and awaits a decision.
#[derive(Debug, Clone)]
pub struct PendingParticipant {
    pub peer_id: PeerId,
    pub claimed_name: Option<String>,
    pub pin_validated: bool,
    pub connection: Arc<dyn DataChannel>,
}

/// An admitted joiner.
#[derive(Debug, Clone)]
pub struct Participant {
    pub peer_id: PeerId,
    /// Never blank: the joiner's name or `"Participant N"`.
    pub friendly_name: String,
    pub connected_at_ms: u64,
    call: Arc<dyn MediaCall>,
    connection: Option<Arc<dyn DataChannel>>,
    admission: u64,
}

impl Participant {
    pub fn call(&self) -> &Arc<dyn MediaCall> {
        &self.call
    }

    pub fn connection(&self) -> Option<&Arc<dyn DataChannel>> {
        self.connection.as_ref()
    }
}

/// In-memory table of admitted participants.
///
/// Stored behind the host session's mutex so the per-joiner drivers and the
/// operator commands can share it.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    participants: HashMap<PeerId, Participant>,
    /// Source of `"Participant N"` names.  Only ever grows while hosting.
    name_counter: u32,
    admissions: u64,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits `peer_id`, replacing any earlier entry for the same peer.
    ///
    /// Uses the trimmed `name` when it is not blank, otherwise the next
    /// generated `"Participant N"`.
    pub fn add(
        &mut self,
        call: Arc<dyn MediaCall>,
        peer_id: &str,
        name: Option<&str>,
        connection: Option<Arc<dyn DataChannel>>,
    ) -> Participant {
        let friendly_name = match normalize_name(name) {
            Some(name) => name,
            None => {
                self.name_counter += 1;
                format!("Participant {}", self.name_counter)
            }
        };
        self.admissions += 1;

        let participant = Participant {
            peer_id: peer_id.to_string(),
            friendly_name,
            connected_at_ms: current_timestamp_ms(),
            call,
            connection,
            admission: self.admissions,
        };

        if let Some(previous) = self.participants.insert(peer_id.to_string(), participant.clone()) {
            warn!(peer = %peer_id, "participant re-admitted; closing the previous links");
            previous.call.close();
            if let Some(connection) = previous.connection {
                connection.close();
            }
        }

        info!(peer = %peer_id, name = %participant.friendly_name, "participant added");
        participant
    }

    /// Removes `peer_id`, closing its messaging connection if still open.
    ///
    /// Returns the removed participant, or `None` if it was not present.
    pub fn remove(&mut self, peer_id: &str) -> Option<Participant> {
        let participant = self.participants.remove(peer_id)?;
        if let Some(connection) = &participant.connection {
            if connection.is_open() {
                connection.close();
            }
        }
        info!(peer = %peer_id, name = %participant.friendly_name, "participant removed");
        Some(participant)
    }

    /// Hangs up the call for `peer_id`, then removes it.
    pub fn disconnect(&mut self, peer_id: &str) -> Option<Participant> {
        match self.participants.get(peer_id) {
            Some(participant) => participant.call.close(),
            None => {
                warn!(peer = %peer_id, "disconnect requested for unknown participant");
                return None;
            }
        }
        self.remove(peer_id)
    }

    pub fn get(&self, peer_id: &str) -> Option<&Participant> {
        self.participants.get(peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.participants.contains_key(peer_id)
    }

    /// Snapshot of every participant in admission order.
    pub fn all(&self) -> Vec<Participant> {
        let mut all: Vec<_> = self.participants.values().cloned().collect();
        all.sort_by_key(|p| p.admission);
        all
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Empties the registry and resets the name counter.
    ///
    /// Returns the removed participants so the caller can close their links.
    pub fn clear(&mut self) -> Vec<Participant> {
        let drained = self.all();
        self.participants.clear();
        self.name_counter = 0;
        drained
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
