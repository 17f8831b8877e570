//! WASI-compatible signaling relay for one-to-many WebRTC broadcasts
//!
//! A broadcaster and any number of viewers meet in a named session; the relay
//! tells each side who the other is and forwards their WebRTC handshake
//! messages. Media never passes through the relay.
//!
//! The crate compiles to WebAssembly and runs in WASI-compatible runtimes
//! using HTTP long-polling.
//!
//! # Protocol
//!
//! - **GET /poll?peer_id={id}** - Connect, or poll for pending events
//! - **POST /event** - Send an event (X-Peer-Id header required)
//! - **POST /leave** - Disconnect (X-Peer-Id header required)
//! - **GET /sessions** - Current session list
//! - **GET /health** - Health check
//!
//! ## Events (server → client)
//!
//! Delivered as JSON strings in the poll response:
//! - `{"event": "id-assigned", "data": "<uuid>"}` - Your peer ID
//! - `{"event": "broadcaster-available", "data": "<uuid>"}` - Broadcaster to expect an offer from
//! - `{"event": "viewer-joined", "data": "<uuid>"}` - A viewer to send an offer to
//! - `{"event": "waiting-for-broadcaster"}`
//! - `{"event": "offer", "data": {"from": "<uuid>", "offer": ...}}` (likewise `answer`, `ice-candidate`)
//! - `{"event": "broadcaster-disconnected"}` / `{"event": "viewer-disconnected", "data": "<uuid>"}`
//! - `{"event": "force-stop", "data": {"sessionId": "..."}}`
//! - `{"event": "sessions-update", "data": [{"sessionId": "...", "viewerCount": 0, "hasBroadcaster": true}]}`
//! - `{"event": "protocol-error", "data": {"code": "...", "message": "..."}}`
//!
//! ## Requests (client → server)
//!
//! POST to /event with X-Peer-Id header and JSON body:
//! - `{"event": "join-broadcast", "data": {"sessionId": "demo-1"}}`
//! - `{"event": "join-viewer", "data": {"sessionId": "demo-1"}}`
//! - `{"event": "offer", "data": {"to": "<uuid>", "offer": ...}}` (likewise `answer`, `ice-candidate`)
//! - `{"event": "stop-session", "data": {"sessionId": "demo-1"}}`
//! - `{"event": "request-sessions"}`
//! - `{"event": "keep-alive"}`
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! wasmtime serve -S common --addr 127.0.0.1:3536 castbox-signaling-wasm.wasm
//!
//! # Connect (returns peer_id and initial events)
//! curl http://127.0.0.1:3536/poll
//!
//! # Broadcast to a session
//! curl -X POST -H "X-Peer-Id: <your-id>" -H "Content-Type: application/json" \
//!   -d '{"event":"join-broadcast","data":{"sessionId":"demo-1"}}' \
//!   http://127.0.0.1:3536/event
//!
//! # Poll for new events
//! curl "http://127.0.0.1:3536/poll?peer_id=<your-id>"
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod registry;
pub mod router;
pub mod state;

pub use config::Config;
pub use error::{JoinError, SignalingError};
pub use handler::handle_request;
pub use registry::{Role, Session, SessionRegistry};
pub use router::{Membership, Router, Transport};
pub use state::ServerState;
