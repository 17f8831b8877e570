//! Error types for the WASM signaling server

use crate::registry::Role;
use castbox_protocol::{ErrorCode, SessionId, SessionIdError};
use thiserror::Error;

/// Errors that can occur while serving a peer
#[derive(Error, Debug)]
pub enum SignalingError {
    /// The peer is not connected (never was, left, or timed out)
    #[error("Unknown peer")]
    UnknownPeer,

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing the state snapshot failed
    #[error("State file error: {0}")]
    State(#[from] std::io::Error),
}

/// Errors from client requests
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// The X-Peer-Id header is absent or not a UUID
    #[error("Missing or invalid X-Peer-Id header")]
    MissingPeerId,

    /// The request body could not be read
    #[error("Failed to read body: {0}")]
    Body(String),

    /// JSON parsing error
    #[error("Invalid request: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reasons the router refuses a join or stop request
///
/// These never escape the router; they are turned into `protocol-error`
/// events for the sender.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("no session id given")]
    MissingSessionId,

    #[error("invalid session id {raw:?}: {source}")]
    InvalidSessionId {
        raw: String,
        #[source]
        source: SessionIdError,
    },

    #[error("already joined session {session} as {role}")]
    AlreadyJoined { session: SessionId, role: Role },

    #[error("session {0} already has a broadcaster")]
    SessionTaken(SessionId),
}

impl JoinError {
    /// The wire code reported to the client
    pub fn code(&self) -> ErrorCode {
        match self {
            JoinError::MissingSessionId => ErrorCode::MissingSessionId,
            JoinError::InvalidSessionId { .. } => ErrorCode::InvalidSessionId,
            JoinError::AlreadyJoined { .. } => ErrorCode::AlreadyJoined,
            JoinError::SessionTaken(_) => ErrorCode::SessionTaken,
        }
    }
}
