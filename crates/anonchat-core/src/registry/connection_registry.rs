//! Connection Registry implementation.
//!
//! Tracks live chat connections by id for name lookup and event delivery.

use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::protocol::ServerEvent;
use crate::types::{ConnectionId, PairingState, DEFAULT_DISPLAY_NAME};

/// Per-connection state stored in the registry.
#[derive(Debug)]
pub struct ConnectionEntry {
    /// Channel to deliver server events to this connection's transport.
    /// Taken when the connection is evicted, which closes the channel once
    /// the transport drains it.
    pub sender: Option<mpsc::Sender<ServerEvent>>,
    /// Display name, set by the first findPartner request
    pub name: Option<String>,
    /// Current matchmaking state
    pub state: PairingState,
    /// When the transport connected
    pub connected_at: DateTime<Utc>,
}

impl ConnectionEntry {
    /// Create an idle, unnamed entry.
    pub fn new(sender: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            sender: Some(sender),
            name: None,
            state: PairingState::Idle,
            connected_at: Utc::now(),
        }
    }

    /// Display name, or the default if none was set.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_DISPLAY_NAME)
    }

    /// How long the connection has been registered.
    pub fn connected_for(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }
}

/// Result of attempting to deliver an event to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Event was queued for delivery
    Sent,
    /// The recipient is not registered
    NotConnected,
    /// The recipient's outbound channel is full; the event was dropped
    ChannelFull,
    /// The recipient's outbound channel was full for an event it must not
    /// miss; the event was dropped and the connection evicted
    Evicted,
    /// The recipient's transport has gone away; the event was dropped
    ChannelClosed,
}

impl SendResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendResult::Sent)
    }
}

/// Registry of live chat connections.
///
/// Uses DashMap so lookups from many connection tasks do not contend. Every
/// method returns owned data; no map guard ever escapes, so callers may hold
/// their own locks while calling in.
///
/// ## Usage
///
/// ```ignore
/// let registry = ConnectionRegistry::new();
///
/// // When a transport connects:
/// let (tx, rx) = mpsc::channel(64);
/// registry.register(id, tx);
///
/// // When relaying:
/// let result = registry.send_to(&partner, ServerEvent::PartnerTyping);
///
/// // When the transport closes, after matchmaking cleanup:
/// registry.remove(&id);
/// ```
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        debug!("Creating connection registry");
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection in the `Idle` state with no name.
    ///
    /// An existing entry with the same id is replaced.
    #[instrument(skip(self, sender), fields(connection = %id))]
    pub fn register(&self, id: ConnectionId, sender: mpsc::Sender<ServerEvent>) {
        let existing = self.connections.insert(id, ConnectionEntry::new(sender));
        if existing.is_some() {
            warn!("Replaced existing connection registration");
        } else {
            debug!("Registered new connection");
        }
    }

    /// Set the display name. No-op if the connection is gone.
    ///
    /// Returns true if the connection was found.
    pub fn set_name(&self, id: &ConnectionId, name: impl Into<String>) -> bool {
        match self.connections.get_mut(id) {
            Some(mut entry) => {
                entry.name = Some(name.into());
                true
            }
            None => {
                debug!(connection = %id, "Ignoring name for unknown connection");
                false
            }
        }
    }

    /// Look up the display name. Unknown ids and unnamed connections both
    /// yield `"Anonymous"`.
    pub fn lookup_name(&self, id: &ConnectionId) -> String {
        self.connections
            .get(id)
            .map(|entry| entry.display_name().to_string())
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string())
    }

    /// Current pairing state, or None if the connection is gone.
    pub fn state(&self, id: &ConnectionId) -> Option<PairingState> {
        self.connections.get(id).map(|entry| entry.state)
    }

    /// Overwrite the pairing state. Returns false if the connection is gone.
    pub fn set_state(&self, id: &ConnectionId, state: PairingState) -> bool {
        match self.connections.get_mut(id) {
            Some(mut entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    /// Remove a connection, returning its entry if it was registered.
    #[instrument(skip(self), fields(connection = %id))]
    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionEntry> {
        let removed = self.connections.remove(id);
        if removed.is_some() {
            debug!("Removed connection");
        } else {
            debug!("Connection was not registered");
        }
        removed.map(|(_, entry)| entry)
    }

    /// Check if a connection is live.
    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Check if a connection is registered and its transport still reads
    /// from the outbound channel.
    pub fn is_live(&self, id: &ConnectionId) -> bool {
        self.connections
            .get(id)
            .map(|entry| {
                entry
                    .value()
                    .sender
                    .as_ref()
                    .is_some_and(|sender| !sender.is_closed())
            })
            .unwrap_or(false)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// List all live connection ids.
    pub fn list_connections(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|r| *r.key()).collect()
    }

    /// Deliver an event to a connection without blocking.
    ///
    /// Failures are reported, never raised: a full or closed channel drops
    /// the event. Entries are never removed here; removal belongs to the
    /// disconnect path so it happens exactly once.
    ///
    /// If the channel is full and the event changes the recipient's pairing
    /// state (see [`ServerEvent::is_state_change`]), the recipient is evicted:
    /// the registry drops its sender, so the transport's writer sees the
    /// channel close after draining what is buffered and the connection is
    /// torn down through the normal disconnect path.
    #[instrument(skip(self, event), fields(to = %id, event = event.name()))]
    pub fn send_to(&self, id: &ConnectionId, event: ServerEvent) -> SendResult {
        let Some(mut entry) = self.connections.get_mut(id) else {
            debug!("Recipient not connected");
            return SendResult::NotConnected;
        };
        let Some(sender) = entry.sender.as_ref() else {
            debug!("Recipient already evicted");
            return SendResult::ChannelClosed;
        };

        let state_change = event.is_state_change();
        match sender.try_send(event) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) if state_change => {
                warn!("Outbound channel full for a state change, evicting connection");
                entry.sender = None;
                SendResult::Evicted
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound channel full, dropping event");
                SendResult::ChannelFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound channel closed, connection may have dropped");
                SendResult::ChannelClosed
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_register_connection() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(16);

        registry.register(id, tx);

        assert!(registry.is_connected(&id));
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.state(&id), Some(PairingState::Idle));
        assert_eq!(registry.lookup_name(&id), "Anonymous");
    }

    #[test]
    fn test_register_replaces_existing() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx1, _rx1) = mpsc::channel(16);
        let (tx2, _rx2) = mpsc::channel(16);

        registry.register(id, tx1);
        registry.set_name(&id, "Alice");
        registry.register(id, tx2);

        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.lookup_name(&id), "Anonymous");
    }

    #[test]
    fn test_set_and_lookup_name() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(16);

        registry.register(id, tx);
        assert!(registry.set_name(&id, "SwiftPanda42"));
        assert_eq!(registry.lookup_name(&id), "SwiftPanda42");
    }

    #[test]
    fn test_set_name_unknown_is_noop() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();

        assert!(!registry.set_name(&id, "Ghost"));
        assert!(!registry.is_connected(&id));
        assert_eq!(registry.lookup_name(&id), "Anonymous");
    }

    #[test]
    fn test_set_state() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let partner = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(16);

        registry.register(id, tx);
        assert!(registry.set_state(&id, PairingState::Paired(partner)));
        assert_eq!(registry.state(&id), Some(PairingState::Paired(partner)));

        assert!(!registry.set_state(&partner, PairingState::Waiting));
        assert_eq!(registry.state(&partner), None);
    }

    #[test]
    fn test_remove_connection() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(16);

        registry.register(id, tx);
        registry.set_name(&id, "Alice");

        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.display_name(), "Alice");
        assert!(!registry.is_connected(&id));
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn test_send_to_connected() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, mut rx) = mpsc::channel(16);

        registry.register(id, tx);

        let result = registry.send_to(&id, ServerEvent::PartnerTyping);
        assert_eq!(result, SendResult::Sent);
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::PartnerTyping);
    }

    #[test]
    fn test_send_to_unknown() {
        let registry = ConnectionRegistry::new();
        let result = registry.send_to(&ConnectionId::new(), ServerEvent::Waiting);
        assert_eq!(result, SendResult::NotConnected);
    }

    #[test]
    fn test_send_to_closed_channel_keeps_entry() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(16);

        registry.register(id, tx);
        drop(rx);

        let result = registry.send_to(&id, ServerEvent::PartnerDisconnected);
        assert_eq!(result, SendResult::ChannelClosed);
        assert!(registry.is_connected(&id));
    }

    #[test]
    fn test_is_live_tracks_receiver() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(16);

        assert!(!registry.is_live(&id));
        registry.register(id, tx);
        assert!(registry.is_live(&id));

        drop(rx);
        assert!(!registry.is_live(&id));
        assert!(registry.is_connected(&id));
    }

    #[test]
    fn test_send_to_full_channel() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(1);

        registry.register(id, tx);

        assert!(registry.send_to(&id, ServerEvent::PartnerTyping).is_sent());
        let result = registry.send_to(&id, ServerEvent::PartnerStoppedTyping);
        assert_eq!(result, SendResult::ChannelFull);
        assert!(registry.is_live(&id));
    }

    #[test]
    fn test_full_channel_evicts_on_state_change() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, mut rx) = mpsc::channel(1);

        registry.register(id, tx);
        assert!(registry.send_to(&id, ServerEvent::PartnerTyping).is_sent());

        let result = registry.send_to(&id, ServerEvent::PartnerDisconnected);
        assert_eq!(result, SendResult::Evicted);
        assert!(!registry.is_live(&id));
        assert!(registry.is_connected(&id));

        // The transport drains what was buffered, then sees the channel close.
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::PartnerTyping);
        assert_eq!(
            rx.try_recv().unwrap_err(),
            mpsc::error::TryRecvError::Disconnected
        );
        assert_eq!(
            registry.send_to(&id, ServerEvent::Waiting),
            SendResult::ChannelClosed
        );
    }

    #[test]
    fn test_removed_entry_reports_connection_age() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(1);

        registry.register(id, tx);
        let entry = registry.remove(&id).unwrap();
        assert!(entry.connected_for() >= chrono::Duration::zero());
    }

    #[test]
    fn test_list_connections() {
        let registry = ConnectionRegistry::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let (tx1, _rx1) = mpsc::channel(16);
        let (tx2, _rx2) = mpsc::channel(16);

        registry.register(a, tx1);
        registry.register(b, tx2);

        let connections = registry.list_connections();
        assert_eq!(connections.len(), 2);
        assert!(connections.contains(&a));
        assert!(connections.contains(&b));
    }
}
