//! Server state management for the WASM signaling server
//!
//! This module tracks connected peers and their pending events, and hosts
//! the [`Router`]. `wasmtime serve` instantiates the component per request,
//! so state is loaded from a JSON file at the start of each operation and
//! written back at the end. Each operation is therefore one event processed
//! to completion.

use crate::config::Config;
use crate::error::SignalingError;
use crate::router::{Router, Transport};
use castbox_protocol::{JsonClientEvent, JsonServerEvent, PeerId, SessionSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// `path` with `suffix` appended to its file name
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Peer state with pending events
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PeerState {
    /// Pending events to be delivered to this peer
    events: VecDeque<String>,
    /// Last time the peer polled or sent an event
    last_seen: DateTime<Utc>,
}

impl PeerState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            events: VecDeque::new(),
            last_seen: now,
        }
    }
}

/// Event queues of every connected peer, used as the router's transport
struct PeerQueues<'a>(&'a mut HashMap<PeerId, PeerState>);

impl Transport for PeerQueues<'_> {
    fn send(&mut self, to: PeerId, event: JsonServerEvent) {
        match self.0.get_mut(&to) {
            Some(peer) => peer.events.push_back(event.to_string()),
            None => debug!(peer = %to, "Dropping event for unknown peer"),
        }
    }

    fn broadcast_all(&mut self, event: JsonServerEvent) {
        let event = event.to_string();
        for peer in self.0.values_mut() {
            peer.events.push_back(event.clone());
        }
    }
}

/// Serializable state
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
struct InnerState {
    /// Map of peer ID -> peer state
    peers: HashMap<PeerId, PeerState>,
    /// Sessions and memberships
    router: Router,
}

impl InnerState {
    /// Load state from file
    ///
    /// A missing file is empty state. A file that does not parse is moved
    /// aside to `<path>.corrupt` so the next save cannot overwrite it.
    fn load(path: &Path) -> Result<Self, SignalingError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_str(&contents) {
            Ok(state) => Ok(state),
            Err(err) => {
                let aside = sibling(path, ".corrupt");
                warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %err,
                    "Moving corrupt state file aside"
                );
                std::fs::rename(path, &aside)?;
                Ok(Self::default())
            }
        }
    }

    /// Save state to file
    ///
    /// The snapshot is written to a temporary sibling and renamed over `path`,
    /// so readers see either the old or the new state, never a partial one.
    fn save(&self, path: &Path) -> Result<(), SignalingError> {
        let json = serde_json::to_string(self)?;
        let nonce = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let tmp = sibling(path, &format!(".{nonce}.tmp"));
        if let Err(err) = std::fs::write(&tmp, json).and_then(|()| std::fs::rename(&tmp, path)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    /// Disconnect every peer that has been silent for longer than the timeout
    fn evict_stale(&mut self, now: DateTime<Utc>, config: &Config) {
        let Ok(timeout) = chrono::Duration::from_std(config.peer_timeout) else {
            return;
        };

        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, peer)| now - peer.last_seen > timeout)
            .map(|(id, _)| *id)
            .collect();

        for peer_id in stale {
            info!(peer = %peer_id, "Peer timed out");
            self.disconnect(peer_id);
        }
    }

    fn connect(&mut self, now: DateTime<Utc>) -> PeerId {
        let peer_id = PeerId::new_random();
        let mut peer = PeerState::new(now);
        peer.events.push_back(JsonServerEvent::IdAssigned(peer_id).to_string());
        peer.events.push_back(
            JsonServerEvent::SessionsUpdate(self.router.registry().list_summaries()).to_string(),
        );
        self.peers.insert(peer_id, peer);
        info!(peer = %peer_id, "Peer connected");
        peer_id
    }

    fn disconnect(&mut self, peer_id: PeerId) -> bool {
        if self.peers.remove(&peer_id).is_none() {
            return false;
        }
        self.router.handle_disconnect(peer_id, &mut PeerQueues(&mut self.peers));
        info!(peer = %peer_id, "Peer disconnected");
        true
    }
}

/// The main server state - loads/saves to file
#[derive(Default, Clone)]
pub struct ServerState {
    config: Config,
}

impl ServerState {
    /// Create a new server state handle
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `f` against freshly loaded state and save the result
    fn with_state<T>(&self, f: impl FnOnce(&mut InnerState, DateTime<Utc>) -> T) -> T {
        let path = self.config.state_file.as_path();
        let now = Utc::now();
        // An unreadable file is left alone; this request runs on empty state
        let (mut state, persist) = match InnerState::load(path) {
            Ok(state) => (state, true),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to load state");
                (InnerState::default(), false)
            }
        };
        state.evict_stale(now, &self.config);
        let result = f(&mut state, now);
        if persist {
            if let Err(err) = state.save(path) {
                warn!(path = %path.display(), error = %err, "Failed to save state");
            }
        }
        result
    }

    /// Connect a new peer or poll for events
    ///
    /// If `peer_id` is `None` or unknown, a new peer is created; its first
    /// events are `id-assigned` and the current session list.
    /// Returns (peer_id, pending_events)
    pub fn connect_or_poll(&self, peer_id: Option<PeerId>) -> (PeerId, Vec<String>) {
        self.with_state(|state, now| {
            let peer_id = match peer_id {
                Some(id) if state.peers.contains_key(&id) => id,
                _ => state.connect(now),
            };

            let events: Vec<String> = state
                .peers
                .get_mut(&peer_id)
                .map(|peer| {
                    peer.last_seen = now;
                    peer.events.drain(..).collect()
                })
                .unwrap_or_default();

            (peer_id, events)
        })
    }

    /// Handle an event sent by a connected peer
    pub fn handle_event(&self, sender: PeerId, event: JsonClientEvent) -> Result<(), SignalingError> {
        self.with_state(|state, now| {
            let Some(peer) = state.peers.get_mut(&sender) else {
                return Err(SignalingError::UnknownPeer);
            };
            peer.last_seen = now;

            state
                .router
                .handle_event(sender, event, &mut PeerQueues(&mut state.peers));
            Ok(())
        })
    }

    /// Remove a peer from the server
    ///
    /// Returns `false` if the peer was not connected.
    pub fn disconnect(&self, peer_id: PeerId) -> bool {
        self.with_state(|state, _| state.disconnect(peer_id))
    }

    /// Current session list
    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.with_state(|state, _| state.router.registry().list_summaries())
    }

    /// Whether a peer is currently connected
    pub fn is_connected(&self, peer_id: PeerId) -> bool {
        self.with_state(|state, _| state.peers.contains_key(&peer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castbox_protocol::{ClientEvent, ServerEvent, SessionRequest};

    #[test]
    fn test_missing_state_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = InnerState::load(&dir.path().join("state.json")).unwrap();
        assert!(state.peers.is_empty());
        assert!(state.router.registry().is_empty());
    }

    #[test]
    fn test_corrupt_state_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        let state = InnerState::load(&path).unwrap();
        assert!(state.peers.is_empty());
        assert!(!path.exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("state.json.corrupt")).unwrap(),
            "not json"
        );
    }

    #[test]
    fn test_save_replaces_file_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "old").unwrap();

        let mut state = InnerState::default();
        state.connect(Utc::now());
        state.save(&path).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, ["state.json"]);
        assert_eq!(InnerState::load(&path).unwrap().peers.len(), 1);
    }

    #[test]
    fn test_unreadable_state_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be cannot be read as a string
        let path = dir.path().join("state.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "keep").unwrap();

        let server = ServerState::new(Config::default().state_file(path.clone()));
        let (peer, _) = server.connect_or_poll(None);
        assert!(!server.is_connected(peer));
        assert!(path.is_dir());
        assert_eq!(std::fs::read_to_string(path.join("keep")).unwrap(), "keep");
    }

    #[test]
    fn test_state_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let now = Utc::now();

        let mut state = InnerState::default();
        let peer = state.connect(now);
        state.router.handle_event(
            peer,
            ClientEvent::JoinBroadcast(SessionRequest::new("demo-1")),
            &mut PeerQueues(&mut state.peers),
        );
        state.save(&path).unwrap();

        let loaded = InnerState::load(&path).unwrap();
        assert!(loaded.peers.contains_key(&peer));
        assert_eq!(
            loaded.router.registry().list_summaries(),
            state.router.registry().list_summaries()
        );
        assert!(loaded.router.membership(peer).is_some());
    }

    #[test]
    fn test_sends_to_unknown_peers_are_dropped() {
        let mut peers = HashMap::new();
        let known = PeerId::new_random();
        peers.insert(known, PeerState::new(Utc::now()));

        let mut queues = PeerQueues(&mut peers);
        queues.send(PeerId::new_random(), ServerEvent::WaitingForBroadcaster);
        queues.send(known, ServerEvent::WaitingForBroadcaster);

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[&known].events.len(), 1);
    }

    #[test]
    fn test_stale_peers_are_evicted() {
        let config = Config::default().peer_timeout(std::time::Duration::from_secs(10));
        let now = Utc::now();
        let mut state = InnerState::default();

        let broadcaster = state.connect(now - chrono::Duration::seconds(60));
        let viewer = state.connect(now);
        state.router.handle_event(
            broadcaster,
            ClientEvent::JoinBroadcast(SessionRequest::new("demo-1")),
            &mut PeerQueues(&mut state.peers),
        );
        state.router.handle_event(
            viewer,
            ClientEvent::JoinViewer(SessionRequest::new("demo-1")),
            &mut PeerQueues(&mut state.peers),
        );

        state.evict_stale(now, &config);

        assert!(!state.peers.contains_key(&broadcaster));
        assert!(state.peers.contains_key(&viewer));
        let summaries = state.router.registry().list_summaries();
        assert_eq!(summaries.len(), 1);
        assert!(!summaries[0].has_broadcaster);

        let disconnected = JsonServerEvent::BroadcasterDisconnected.to_string();
        assert!(state.peers[&viewer].events.contains(&disconnected));
    }
}
