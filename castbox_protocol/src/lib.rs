//! Wire protocol for the castbox signaling relay
//!
//! One broadcaster and any number of viewers meet in a named session and
//! exchange WebRTC handshake messages through the relay. Handshake payloads
//! (`offer`, `answer`, `candidate`) are generic so the relay can forward them
//! untouched; with the `json` feature they are plain [`serde_json::Value`]s.
//!
//! Every message is an object of the form
//! `{"event": "<kebab-case-name>", "data": <payload>}`.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Minimum length of a session name
pub const SESSION_ID_MIN_LEN: usize = 3;
/// Maximum length of a session name
pub const SESSION_ID_MAX_LEN: usize = 50;

/// Identity the relay assigns to a connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub uuid::Uuid);

impl PeerId {
    /// A fresh random peer id
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl From<uuid::Uuid> for PeerId {
    fn from(id: uuid::Uuid) -> Self {
        PeerId(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(PeerId)
    }
}

/// Reasons a session name is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionIdError {
    #[error("session id must be at least 3 characters, got {0}")]
    TooShort(usize),

    #[error("session id must be at most 50 characters, got {0}")]
    TooLong(usize),

    #[error("session id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// A validated session name: `[A-Za-z0-9_-]{3,50}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate a raw session name
    pub fn parse(raw: &str) -> Result<Self, SessionIdError> {
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(SessionIdError::InvalidCharacter(bad));
        }
        // Only ASCII is left at this point, so bytes == characters
        match raw.len() {
            n if n < SESSION_ID_MIN_LEN => Err(SessionIdError::TooShort(n)),
            n if n > SESSION_ID_MAX_LEN => Err(SessionIdError::TooLong(n)),
            _ => Ok(Self(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload of the session-addressed requests
///
/// The name is kept raw and optional: validation happens in the relay so a
/// malformed name is answered with a `protocol-error` instead of a parse
/// failure. An absent or `null` `data` reads as a request without a name.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Option<SessionRequestBody>")]
pub struct SessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequestBody {
    #[serde(default)]
    session_id: Option<String>,
}

impl From<Option<SessionRequestBody>> for SessionRequest {
    fn from(body: Option<SessionRequestBody>) -> Self {
        Self {
            session_id: body.and_then(|body| body.session_id),
        }
    }
}

impl SessionRequest {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
        }
    }
}

/// Requests a peer sends to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent<S> {
    /// Claim the broadcaster slot of a session
    JoinBroadcast(SessionRequest),
    /// Join a session as a viewer
    JoinViewer(SessionRequest),
    Offer { to: PeerId, offer: S },
    Answer { to: PeerId, answer: S },
    IceCandidate { to: PeerId, candidate: S },
    /// Tear a session down for every member
    StopSession(SessionRequest),
    RequestSessions,
    KeepAlive,
}

/// Events the relay delivers to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent<S> {
    /// Your peer id; always the first event on a new connection
    IdAssigned(PeerId),
    BroadcasterAvailable(PeerId),
    ViewerJoined(PeerId),
    WaitingForBroadcaster,
    Offer { from: PeerId, offer: S },
    Answer { from: PeerId, answer: S },
    IceCandidate { from: PeerId, candidate: S },
    BroadcasterDisconnected,
    ViewerDisconnected(PeerId),
    /// The session you broadcast to was stopped; tear down capture
    ForceStop { session_id: SessionId },
    SessionsUpdate(Vec<SessionSummary>),
    ProtocolError { code: ErrorCode, message: String },
}

/// One row of the session list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub viewer_count: usize,
    pub has_broadcaster: bool,
}

/// Machine-readable cause carried by `protocol-error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InvalidSessionId,
    MissingSessionId,
    /// The connection already holds a role in a session
    AlreadyJoined,
    /// Another live connection is broadcasting to the session
    SessionTaken,
}

#[cfg(feature = "json")]
mod json {
    use super::{ClientEvent, ServerEvent};
    use std::fmt;
    use std::str::FromStr;

    /// Inbound event with opaque JSON handshake payloads
    pub type JsonClientEvent = ClientEvent<serde_json::Value>;
    /// Outbound event with opaque JSON handshake payloads
    pub type JsonServerEvent = ServerEvent<serde_json::Value>;

    impl fmt::Display for JsonClientEvent {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
            write!(f, "{s}")
        }
    }

    impl FromStr for JsonClientEvent {
        type Err = serde_json::Error;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            serde_json::from_str(s)
        }
    }

    impl fmt::Display for JsonServerEvent {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
            write!(f, "{s}")
        }
    }

    impl FromStr for JsonServerEvent {
        type Err = serde_json::Error;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            serde_json::from_str(s)
        }
    }
}

#[cfg(feature = "json")]
pub use json::{JsonClientEvent, JsonServerEvent};
