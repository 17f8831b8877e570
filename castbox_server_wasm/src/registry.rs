//! Session registry
//!
//! Maps session names to their membership: at most one broadcaster and a set
//! of viewers. The registry enforces its own invariants:
//!
//! - a session with neither a broadcaster nor viewers is removed as soon as
//!   the mutation that emptied it returns
//! - no peer is both the broadcaster and a viewer of the same session
//!
//! Iteration follows insertion order so session listings are stable within a
//! run.

use castbox_protocol::{PeerId, SessionId, SessionSummary};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The part a peer plays in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Broadcaster,
    Viewer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Broadcaster => f.write_str("broadcaster"),
            Role::Viewer => f.write_str("viewer"),
        }
    }
}

/// Membership of a single session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    broadcaster: Option<PeerId>,
    viewers: BTreeSet<PeerId>,
    created_at: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        Self {
            broadcaster: None,
            viewers: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    /// The current broadcaster, if any
    pub fn broadcaster(&self) -> Option<PeerId> {
        self.broadcaster
    }

    /// Viewers in a stable order
    pub fn viewers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.viewers.iter().copied()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn has_viewer(&self, peer: PeerId) -> bool {
        self.viewers.contains(&peer)
    }

    /// When this instance of the session was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Broadcaster (if any) followed by every viewer
    pub fn members(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.broadcaster.into_iter().chain(self.viewers())
    }

    fn is_empty(&self) -> bool {
        self.broadcaster.is_none() && self.viewers.is_empty()
    }
}

/// All live sessions, keyed by name
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SessionRegistry {
    sessions: IndexMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session without creating it
    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Return the session, creating an empty one if the name is unknown
    ///
    /// A freshly created session is empty; the caller is expected to add a
    /// member before returning control.
    pub fn get_or_create(&mut self, id: &SessionId) -> &mut Session {
        self.sessions.entry(id.clone()).or_insert_with(|| {
            tracing::info!(session = %id, "Session created");
            Session::new()
        })
    }

    /// Put `peer` in the broadcaster slot, replacing whoever held it
    pub fn set_broadcaster(&mut self, id: &SessionId, peer: PeerId) {
        let session = self.get_or_create(id);
        session.viewers.remove(&peer);
        session.broadcaster = Some(peer);
    }

    /// Add `peer` to the viewers
    ///
    /// Returns `false` if it was already a viewer.
    pub fn add_viewer(&mut self, id: &SessionId, peer: PeerId) -> bool {
        let session = self.get_or_create(id);
        if session.broadcaster == Some(peer) {
            session.broadcaster = None;
        }
        session.viewers.insert(peer)
    }

    /// Drop `peer` from the given role and delete the session if it became
    /// empty
    ///
    /// A broadcaster removal only applies if `peer` actually holds the slot.
    /// Returns `true` if the session was deleted.
    pub fn remove_connection(&mut self, id: &SessionId, peer: PeerId, role: Role) -> bool {
        let Some(session) = self.sessions.get_mut(id) else {
            return false;
        };

        match role {
            Role::Broadcaster => {
                if session.broadcaster == Some(peer) {
                    session.broadcaster = None;
                }
            }
            Role::Viewer => {
                session.viewers.remove(&peer);
            }
        }

        if session.is_empty() {
            self.sessions.shift_remove(id);
            tracing::info!(session = %id, "Session removed (empty)");
            true
        } else {
            false
        }
    }

    /// Delete a session regardless of its membership
    pub fn remove(&mut self, id: &SessionId) -> Option<Session> {
        self.sessions.shift_remove(id)
    }

    /// Snapshot of every session for display, in creation order
    pub fn list_summaries(&self) -> Vec<SessionSummary> {
        self.sessions
            .iter()
            .map(|(id, session)| SessionSummary {
                session_id: id.clone(),
                viewer_count: session.viewer_count(),
                has_broadcaster: session.broadcaster.is_some(),
            })
            .collect()
    }
}
