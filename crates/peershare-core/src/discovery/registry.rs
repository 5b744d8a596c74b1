//! The discovery host's table of advertised sessions.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::session::{sort_newest_first, SessionRecord};
use crate::protocol::messages::DiscoveryMessage;

/// How long a registration stays listed without being refreshed.
pub const SESSION_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// How often the discovery host purges expired registrations.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// In-memory registry of active sessions, keyed by session code.
///
/// Only the process holding the discovery role owns one.  Expired entries are
/// filtered out of every [`list`](Self::list) even before a sweep removes them.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<String, SessionRecord>,
    lifetime: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SESSION_LIFETIME)
    }
}

impl SessionRegistry {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            lifetime,
        }
    }

    /// Inserts or replaces the record for `record.code`.
    ///
    /// Returns the record it replaced, if any.
    pub fn register(&mut self, record: SessionRecord) -> Option<SessionRecord> {
        info!(code = %record.code, private = record.is_private, "session registered");
        self.sessions.insert(record.code.clone(), record)
    }

    /// Removes the record for `code`.  Returns `true` if one was present.
    pub fn unregister(&mut self, code: &str) -> bool {
        let removed = self.sessions.remove(code).is_some();
        if removed {
            info!(%code, "session unregistered");
        }
        removed
    }

    /// Returns the unexpired records at `now_ms`, newest first.
    pub fn list(&self, now_ms: u64) -> Vec<SessionRecord> {
        let mut live: Vec<SessionRecord> = self
            .sessions
            .values()
            .filter(|record| !record.is_expired(now_ms, self.lifetime))
            .cloned()
            .collect();
        sort_newest_first(&mut live);
        live
    }

    /// Removes every record expired at `now_ms`.  Returns how many were removed.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let lifetime = self.lifetime;
        let before = self.sessions.len();
        self.sessions.retain(|code, record| {
            let keep = !record.is_expired(now_ms, lifetime);
            if !keep {
                debug!(%code, "removed stale session");
            }
            keep
        });
        before - self.sessions.len()
    }

    pub fn get(&self, code: &str) -> Option<&SessionRecord> {
        self.sessions.get(code)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

/// Applies one client request to the registry and returns the reply, if the
/// request expects one.
///
/// `unregister` is fire-and-forget, so it yields `None`.  Replies arriving at
/// the host (`register_ack`, `list_response`) are ignored.
pub fn apply_request(
    registry: &mut SessionRegistry,
    request: DiscoveryMessage,
    now_ms: u64,
) -> Option<DiscoveryMessage> {
    match request {
        DiscoveryMessage::Register {
            code,
            timestamp,
            name,
            is_private,
        } => {
            let created_at_ms = timestamp.unwrap_or(now_ms);
            registry.register(SessionRecord::new(code.clone(), created_at_ms, name, is_private));
            Some(DiscoveryMessage::RegisterAck {
                code,
                success: true,
            })
        }
        DiscoveryMessage::Unregister { code } => {
            registry.unregister(&code);
            None
        }
        DiscoveryMessage::List => {
            let sessions = registry.list(now_ms);
            debug!(count = sessions.len(), "sending session list");
            Some(DiscoveryMessage::ListResponse { sessions })
        }
        other @ (DiscoveryMessage::RegisterAck { .. } | DiscoveryMessage::ListResponse { .. }) => {
            warn!(?other, "discovery host received a reply message; ignoring");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
