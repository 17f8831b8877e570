//! Server configuration
//!
//! Read from the environment on each request; `wasmtime serve` forwards
//! variables given with `--env`.

use std::path::PathBuf;
use std::time::Duration;

/// Default path of the state snapshot
pub const DEFAULT_STATE_FILE: &str = "castbox_state.json";

/// Default time a peer may stay silent before it is evicted
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for [`ServerState`](crate::ServerState)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// File the server state is handed off through between requests
    pub state_file: PathBuf,

    /// A peer that has neither polled nor sent an event for this long is
    /// disconnected
    pub peer_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            peer_timeout: DEFAULT_PEER_TIMEOUT,
        }
    }
}

impl Config {
    /// Build a configuration from `CASTBOX_*` environment variables
    ///
    /// Missing or unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let state_file = std::env::var("CASTBOX_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_FILE));

        let peer_timeout = std::env::var("CASTBOX_PEER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PEER_TIMEOUT);

        Self {
            state_file,
            peer_timeout,
        }
    }

    /// Set the state snapshot path
    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = path.into();
        self
    }

    /// Set the peer liveness timeout
    pub fn peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }
}
