//! Signaling router
//!
//! Turns one inbound event into registry mutations plus outbound events. The
//! router is the only writer of the [`SessionRegistry`] and keeps its own
//! side-table of which session and role each peer joined with, consulted when
//! the peer disconnects.
//!
//! Handlers run to completion and never fail: bad requests are answered with
//! a `protocol-error` to the sender, and sends are fire-and-forget through
//! the [`Transport`].

use crate::error::JoinError;
use crate::registry::{Role, Session, SessionRegistry};
use castbox_protocol::{
    ClientEvent, JsonClientEvent, JsonServerEvent, PeerId, ServerEvent, SessionId, SessionRequest,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Outbound side of the relay
///
/// Delivery is best effort. Implementations drop events addressed to peers
/// they do not know, and handlers must not assume anything arrived.
pub trait Transport {
    /// Deliver an event to a single peer
    fn send(&mut self, to: PeerId, event: JsonServerEvent);

    /// Deliver an event to every connected peer
    fn broadcast_all(&mut self, event: JsonServerEvent);
}

/// The session and role a peer joined with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub session: SessionId,
    pub role: Role,
}

/// Protocol handler owning the session registry
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Router {
    registry: SessionRegistry,
    memberships: HashMap<PeerId, Membership>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of the sessions
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// The session and role `peer` holds, if it joined one
    pub fn membership(&self, peer: PeerId) -> Option<&Membership> {
        self.memberships.get(&peer)
    }

    /// Handle one event sent by `sender`
    pub fn handle_event(
        &mut self,
        sender: PeerId,
        event: JsonClientEvent,
        out: &mut impl Transport,
    ) {
        match event {
            ClientEvent::JoinBroadcast(request) => self.join_broadcast(sender, request, out),
            ClientEvent::JoinViewer(request) => self.join_viewer(sender, request, out),
            ClientEvent::Offer { to, offer } => {
                debug!(from = %sender, %to, "Relaying offer");
                out.send(to, ServerEvent::Offer { from: sender, offer });
            }
            ClientEvent::Answer { to, answer } => {
                debug!(from = %sender, %to, "Relaying answer");
                out.send(to, ServerEvent::Answer { from: sender, answer });
            }
            ClientEvent::IceCandidate { to, candidate } => {
                debug!(from = %sender, %to, "Relaying ICE candidate");
                out.send(
                    to,
                    ServerEvent::IceCandidate {
                        from: sender,
                        candidate,
                    },
                );
            }
            ClientEvent::StopSession(request) => self.stop_session(sender, request, out),
            ClientEvent::RequestSessions => out.send(sender, self.sessions_update()),
            ClientEvent::KeepAlive => {}
        }
    }

    /// Clean up after a peer that went away
    ///
    /// Peers that never joined a session leave no trace and trigger nothing.
    pub fn handle_disconnect(&mut self, peer: PeerId, out: &mut impl Transport) {
        let Some(Membership { session, role }) = self.memberships.remove(&peer) else {
            return;
        };

        match role {
            Role::Broadcaster => {
                if let Some(current) = self.registry.get(&session) {
                    if current.broadcaster() == Some(peer) {
                        for viewer in current.viewers() {
                            out.send(viewer, ServerEvent::BroadcasterDisconnected);
                        }
                    }
                }
                self.registry.remove_connection(&session, peer, Role::Broadcaster);
            }
            Role::Viewer => {
                self.registry.remove_connection(&session, peer, Role::Viewer);
                if let Some(broadcaster) = self.registry.get(&session).and_then(Session::broadcaster)
                {
                    out.send(broadcaster, ServerEvent::ViewerDisconnected(peer));
                }
            }
        }

        info!(%peer, %session, %role, "Peer left session");
        self.broadcast_session_list(out);
    }

    fn join_broadcast(&mut self, sender: PeerId, request: SessionRequest, out: &mut impl Transport) {
        let session = match self.admit(sender, request, Role::Broadcaster) {
            Ok(session) => session,
            Err(err) => return reject(sender, err, out),
        };

        self.registry.set_broadcaster(&session, sender);
        self.memberships.insert(
            sender,
            Membership {
                session: session.clone(),
                role: Role::Broadcaster,
            },
        );

        if let Some(current) = self.registry.get(&session) {
            for viewer in current.viewers() {
                out.send(viewer, ServerEvent::BroadcasterAvailable(sender));
            }
            info!(
                peer = %sender,
                %session,
                viewers = current.viewer_count(),
                "Broadcaster joined"
            );
        }

        self.broadcast_session_list(out);
    }

    fn join_viewer(&mut self, sender: PeerId, request: SessionRequest, out: &mut impl Transport) {
        let session = match self.admit(sender, request, Role::Viewer) {
            Ok(session) => session,
            Err(err) => return reject(sender, err, out),
        };

        self.registry.add_viewer(&session, sender);
        self.memberships.insert(
            sender,
            Membership {
                session: session.clone(),
                role: Role::Viewer,
            },
        );

        match self.registry.get(&session).and_then(Session::broadcaster) {
            Some(broadcaster) => {
                out.send(broadcaster, ServerEvent::ViewerJoined(sender));
                out.send(sender, ServerEvent::BroadcasterAvailable(broadcaster));
                info!(peer = %sender, %session, %broadcaster, "Viewer joined");
            }
            None => {
                out.send(sender, ServerEvent::WaitingForBroadcaster);
                info!(peer = %sender, %session, "Viewer joined, waiting for broadcaster");
            }
        }

        self.broadcast_session_list(out);
    }

    fn stop_session(&mut self, sender: PeerId, request: SessionRequest, out: &mut impl Transport) {
        let Some(raw) = request.session_id else {
            return reject(sender, JoinError::MissingSessionId, out);
        };
        // A malformed name can never have been registered
        let Ok(id) = SessionId::parse(&raw) else {
            debug!(peer = %sender, session = %raw, "Stop for malformed session ignored");
            return;
        };
        let Some(session) = self.registry.remove(&id) else {
            debug!(peer = %sender, session = %id, "Stop for unknown session ignored");
            return;
        };

        if let Some(broadcaster) = session.broadcaster() {
            out.send(
                broadcaster,
                ServerEvent::ForceStop {
                    session_id: id.clone(),
                },
            );
        }
        for viewer in session.viewers() {
            out.send(viewer, ServerEvent::BroadcasterDisconnected);
        }
        for member in session.members() {
            self.memberships.remove(&member);
        }

        info!(
            peer = %sender,
            session = %id,
            viewers = session.viewer_count(),
            "Session stopped"
        );
        self.broadcast_session_list(out);
    }

    /// Validate a join request against the current state
    fn admit(
        &self,
        sender: PeerId,
        request: SessionRequest,
        role: Role,
    ) -> Result<SessionId, JoinError> {
        let raw = request.session_id.ok_or(JoinError::MissingSessionId)?;
        let session = SessionId::parse(&raw)
            .map_err(|source| JoinError::InvalidSessionId { raw, source })?;

        if let Some(existing) = self.memberships.get(&sender) {
            if existing.session != session || existing.role != role {
                return Err(JoinError::AlreadyJoined {
                    session: existing.session.clone(),
                    role: existing.role,
                });
            }
        }

        if role == Role::Broadcaster {
            let holder = self.registry.get(&session).and_then(Session::broadcaster);
            if holder.is_some_and(|holder| holder != sender) {
                return Err(JoinError::SessionTaken(session));
            }
        }

        Ok(session)
    }

    fn sessions_update(&self) -> JsonServerEvent {
        ServerEvent::SessionsUpdate(self.registry.list_summaries())
    }

    fn broadcast_session_list(&self, out: &mut impl Transport) {
        out.broadcast_all(self.sessions_update());
    }
}

fn reject(sender: PeerId, err: JoinError, out: &mut impl Transport) {
    warn!(peer = %sender, error = %err, "Rejected request");
    out.send(
        sender,
        ServerEvent::ProtocolError {
            code: err.code(),
            message: err.to_string(),
        },
    );
}
