//! Common types for the chat server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display name used when a client sends none, or only whitespace.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// Opaque identifier of one live client connection.
///
/// Assigned by the transport when the connection is accepted and stable for
/// its whole lifetime. Serialized as the hyphenated UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random connection id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Where a connection stands in the matchmaking lifecycle.
///
/// `Idle -> Waiting -> Paired -> Idle -> ...`; a disconnect can happen from
/// any state and removes the connection entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingState {
    /// Connected, not looking for a partner
    #[default]
    Idle,
    /// In the waiting queue
    Waiting,
    /// In a chat with the given partner
    Paired(ConnectionId),
}

impl PairingState {
    /// The partner, if paired.
    pub fn partner(&self) -> Option<ConnectionId> {
        match self {
            PairingState::Paired(partner) => Some(*partner),
            _ => None,
        }
    }
}

impl std::fmt::Display for PairingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingState::Idle => write!(f, "idle"),
            PairingState::Waiting => write!(f, "waiting"),
            PairingState::Paired(partner) => write!(f, "paired({})", partner),
        }
    }
}

/// Normalize a client-supplied display name.
///
/// Names are opaque to the server: validation belongs to the client. The only
/// rule applied here is that a missing or blank name becomes
/// [`DEFAULT_DISPLAY_NAME`]; any other name is kept exactly as sent.
pub fn display_name_or_default(name: Option<&str>) -> String {
    match name {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => DEFAULT_DISPLAY_NAME.to_string(),
    }
}
