//! Matchmaking engine implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::metrics;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::ConnectionRegistry;
use crate::types::{display_name_or_default, ConnectionId, PairingState};

/// Snapshot of matchmaking counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Live connections
    pub connections: usize,
    /// Connections in the waiting queue
    pub waiting: usize,
    /// Active chat pairs
    pub active_pairs: usize,
}

/// State guarded by the engine lock.
#[derive(Debug, Default)]
struct MatchState {
    /// FIFO of connections looking for a partner
    waiting: VecDeque<ConnectionId>,
    /// Symmetric pairing relation: A -> B iff B -> A
    pairs: HashMap<ConnectionId, ConnectionId>,
    /// Last relay timestamp handed out, in epoch milliseconds
    last_timestamp: i64,
}

impl MatchState {
    /// Relay timestamp that never goes backwards, even if the wall clock does.
    fn next_timestamp(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis().max(self.last_timestamp);
        self.last_timestamp = now;
        now
    }

    fn dequeue(&mut self, id: &ConnectionId) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|waiting| waiting != id);
        self.waiting.len() != before
    }
}

/// Pairs waiting visitors and relays events between partners.
///
/// The waiting queue, the pairing relation and the pairing state in the
/// registry are only changed while holding `state`, so every operation's
/// read-modify-emit sequence is atomic with respect to every other. Events
/// are emitted under the lock through the registry's non-blocking
/// [`send_to`](ConnectionRegistry::send_to), which keeps each connection's
/// event order identical to the order of state changes.
pub struct MatchmakingEngine {
    registry: ConnectionRegistry,
    state: Mutex<MatchState>,
}

impl MatchmakingEngine {
    /// Create an engine with an empty registry and queue.
    pub fn new() -> Self {
        info!("Creating matchmaking engine");
        Self {
            registry: ConnectionRegistry::new(),
            state: Mutex::new(MatchState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MatchState> {
        // Each critical section is a short run of map/queue updates with no
        // panicking calls, so a poisoned lock still guards consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a newly accepted transport connection as `Idle`.
    #[instrument(skip(self, sender), fields(connection = %id))]
    pub fn connect(&self, id: ConnectionId, sender: mpsc::Sender<ServerEvent>) {
        let state = self.lock();
        self.registry.register(id, sender);
        info!("New user connected");
        metrics::record_connection();
        self.record_gauges(&state);
    }

    /// Apply a decoded client event.
    pub fn dispatch(&self, id: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::FindPartner(request) => {
                let user_name = request.and_then(|request| request.user_name);
                self.find_partner(id, user_name.as_deref())
            }
            ClientEvent::SendMessage { message } => self.send_message(id, message),
            ClientEvent::Typing => self.typing(id),
            ClientEvent::StopTyping => self.stop_typing(id),
            ClientEvent::EndChat => self.end_chat(id),
        }
    }

    /// Pair `id` with the longest-waiting connection, or queue it.
    ///
    /// A connection already waiting is told `waiting` again without a second
    /// queue entry. A connection already paired keeps its partner and the
    /// request is ignored.
    #[instrument(skip(self, name), fields(connection = %id))]
    pub fn find_partner(&self, id: ConnectionId, name: Option<&str>) {
        let name = display_name_or_default(name);
        let mut state = self.lock();

        if !self.registry.set_name(&id, name.clone()) {
            debug!("findPartner from unknown connection ignored");
            return;
        }

        match self.current_state(&state, &id) {
            PairingState::Paired(partner) => {
                debug!(partner = %partner, "Already paired, ignoring findPartner");
                return;
            }
            PairingState::Waiting => {
                debug!("Already waiting, repeating waiting notice");
                self.registry.send_to(&id, ServerEvent::Waiting);
                return;
            }
            PairingState::Idle => {}
        }

        while let Some(candidate) = state.waiting.pop_front() {
            if candidate == id {
                warn!("Found self in waiting queue, discarding entry");
                continue;
            }
            if self.registry.state(&candidate) != Some(PairingState::Waiting) {
                warn!(candidate = %candidate, "Discarding stale waiting queue entry");
                continue;
            }
            if !self.registry.is_live(&candidate) {
                debug!(candidate = %candidate, "Waiting connection's transport is gone, skipping");
                self.registry.set_state(&candidate, PairingState::Idle);
                continue;
            }

            self.pair(&mut state, id, &name, candidate);
            return;
        }

        state.waiting.push_back(id);
        self.registry.set_state(&id, PairingState::Waiting);
        self.registry.send_to(&id, ServerEvent::Waiting);
        info!(name = %name, "User is waiting for a partner");
        self.record_gauges(&state);
    }

    fn pair(&self, state: &mut MatchState, id: ConnectionId, name: &str, partner: ConnectionId) {
        let partner_name = self.registry.lookup_name(&partner);

        state.pairs.insert(id, partner);
        state.pairs.insert(partner, id);
        self.registry.set_state(&id, PairingState::Paired(partner));
        self.registry.set_state(&partner, PairingState::Paired(id));

        self.registry.send_to(
            &id,
            ServerEvent::PartnerFound {
                partner_id: partner,
                partner_name: partner_name.clone(),
            },
        );
        self.registry.send_to(
            &partner,
            ServerEvent::PartnerFound {
                partner_id: id,
                partner_name: name.to_string(),
            },
        );

        info!(
            name = %name,
            partner = %partner,
            partner_name = %partner_name,
            "Paired users"
        );
        metrics::record_pairing();
        self.record_gauges(state);
    }

    /// Relay chat text to the partner. Dropped if not paired.
    #[instrument(skip(self, message), fields(connection = %id, len = message.len()))]
    pub fn send_message(&self, id: ConnectionId, message: String) {
        let mut state = self.lock();
        let Some(partner) = self.checked_partner(&mut state, id) else {
            debug!("Not paired, dropping message");
            return;
        };

        let timestamp = state.next_timestamp();
        if self
            .registry
            .send_to(&partner, ServerEvent::ReceiveMessage { message, timestamp })
            .is_sent()
        {
            metrics::record_message_relayed();
        }
    }

    /// Tell the partner this connection started typing.
    pub fn typing(&self, id: ConnectionId) {
        self.relay(id, ServerEvent::PartnerTyping);
    }

    /// Tell the partner this connection stopped typing.
    pub fn stop_typing(&self, id: ConnectionId) {
        self.relay(id, ServerEvent::PartnerStoppedTyping);
    }

    fn relay(&self, id: ConnectionId, event: ServerEvent) {
        let mut state = self.lock();
        match self.checked_partner(&mut state, id) {
            Some(partner) => {
                self.registry.send_to(&partner, event);
            }
            None => debug!(connection = %id, event = event.name(), "Not paired, dropping relay"),
        }
    }

    /// Leave the current chat or the waiting queue; the transport stays open.
    ///
    /// The partner, if any, gets `partnerDisconnected` and becomes `Idle`
    /// without being re-queued. The caller gets no notice of its own.
    #[instrument(skip(self), fields(connection = %id))]
    pub fn end_chat(&self, id: ConnectionId) {
        let mut state = self.lock();
        self.leave(&mut state, id, "end_chat");
        self.record_gauges(&state);
    }

    /// Transport-level loss of a connection.
    ///
    /// Runs the same cleanup as [`end_chat`](Self::end_chat), then removes the
    /// connection from the registry. Call exactly once per connection.
    #[instrument(skip(self), fields(connection = %id))]
    pub fn disconnect(&self, id: ConnectionId) {
        let mut state = self.lock();
        info!("User disconnected");
        self.leave(&mut state, id, "disconnect");
        if let Some(entry) = self.registry.remove(&id) {
            debug!(
                name = %entry.display_name(),
                connected_secs = entry.connected_for().num_seconds(),
                "Connection removed"
            );
        }
        self.record_gauges(&state);
    }

    /// Shared cleanup for end-chat and disconnect.
    ///
    /// Checks the pairing relation before the queue: if another connection's
    /// findPartner popped `id` just before this ran, `id` is now paired and
    /// its partner must be told.
    fn leave(&self, state: &mut MatchState, id: ConnectionId, reason: &'static str) {
        let name = self.registry.lookup_name(&id);

        if let Some(partner) = state.pairs.remove(&id) {
            if state.pairs.get(&partner) == Some(&id) {
                state.pairs.remove(&partner);
                self.registry.set_state(&partner, PairingState::Idle);
                self.registry.send_to(&partner, ServerEvent::PartnerDisconnected);
            } else {
                warn!(partner = %partner, "Pairing was not reciprocal, clearing one side");
            }
            info!(
                name = %name,
                partner = %partner,
                partner_name = %self.registry.lookup_name(&partner),
                reason,
                "Chat ended"
            );
            metrics::record_chat_ended(reason);
        }

        if state.dequeue(&id) {
            info!(name = %name, "Removed user from waiting list");
        }

        self.registry.set_state(&id, PairingState::Idle);
    }

    /// The partner of `id`, after verifying the relation is intact.
    ///
    /// If `id` points at a partner that is gone or does not point back, both
    /// sides are reset to `Idle` and `id` is told its partner disconnected.
    fn checked_partner(&self, state: &mut MatchState, id: ConnectionId) -> Option<ConnectionId> {
        let partner = *state.pairs.get(&id)?;

        let reciprocal = state.pairs.get(&partner) == Some(&id)
            && self.registry.state(&partner) == Some(PairingState::Paired(id));
        if reciprocal {
            return Some(partner);
        }

        warn!(connection = %id, partner = %partner, "Broken pairing detected, resetting both sides");
        state.pairs.remove(&id);
        if state.pairs.get(&partner) == Some(&id) {
            state.pairs.remove(&partner);
            self.registry.set_state(&partner, PairingState::Idle);
        }
        self.registry.set_state(&id, PairingState::Idle);
        self.registry.send_to(&id, ServerEvent::PartnerDisconnected);
        self.record_gauges(state);
        None
    }

    /// Pairing state as seen by the engine.
    fn current_state(&self, state: &MatchState, id: &ConnectionId) -> PairingState {
        if let Some(partner) = state.pairs.get(id) {
            return PairingState::Paired(*partner);
        }
        self.registry.state(id).unwrap_or_default()
    }

    fn record_gauges(&self, state: &MatchState) {
        metrics::record_gauges(
            self.registry.connection_count(),
            state.waiting.len(),
            state.pairs.len() / 2,
        );
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Pairing state of a connection, or None if it is not connected.
    pub fn state_of(&self, id: &ConnectionId) -> Option<PairingState> {
        let _state = self.lock();
        self.registry.state(id)
    }

    /// Current partner of a connection.
    pub fn partner_of(&self, id: &ConnectionId) -> Option<ConnectionId> {
        self.lock().pairs.get(id).copied()
    }

    /// Display name of a connection (`"Anonymous"` if unset or unknown).
    pub fn name_of(&self, id: &ConnectionId) -> String {
        self.registry.lookup_name(id)
    }

    /// Whether a connection is registered.
    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.registry.is_connected(id)
    }

    /// Waiting queue contents, head first.
    pub fn waiting_ids(&self) -> Vec<ConnectionId> {
        self.lock().waiting.iter().copied().collect()
    }

    /// Matchmaking counters.
    pub fn stats(&self) -> EngineStats {
        let state = self.lock();
        EngineStats {
            connections: self.registry.connection_count(),
            waiting: state.waiting.len(),
            active_pairs: state.pairs.len() / 2,
        }
    }

    /// Check every matchmaking invariant, returning the first violation.
    ///
    /// - the pairing relation is its own inverse and never maps an id to itself
    /// - a paired id's registry state is `Paired(partner)`
    /// - an id is queued exactly once iff its registry state is `Waiting`
    pub fn check_invariants(&self) -> Result<(), String> {
        let state = self.lock();

        for (id, partner) in &state.pairs {
            if id == partner {
                return Err(format!("{} is paired with itself", id));
            }
            if state.pairs.get(partner) != Some(id) {
                return Err(format!("{} -> {} is not reciprocal", id, partner));
            }
            if self.registry.state(id) != Some(PairingState::Paired(*partner)) {
                return Err(format!("{} is in the relation but not marked paired", id));
            }
        }

        for (position, id) in state.waiting.iter().enumerate() {
            if state.waiting.iter().skip(position + 1).any(|other| other == id) {
                return Err(format!("{} is queued twice", id));
            }
            if self.registry.state(id) != Some(PairingState::Waiting) {
                return Err(format!("{} is queued but not waiting", id));
            }
        }

        for id in self.registry.list_connections() {
            match self.registry.state(&id) {
                Some(PairingState::Waiting) if !state.waiting.contains(&id) => {
                    return Err(format!("{} is waiting but not queued", id));
                }
                Some(PairingState::Paired(partner)) if state.pairs.get(&id) != Some(&partner) => {
                    return Err(format!("{} is marked paired but not in the relation", id));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

impl Default for MatchmakingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MatchmakingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchmakingEngine")
            .field("stats", &self.stats())
            .finish()
    }
}
