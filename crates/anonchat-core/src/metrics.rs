//! Matchmaking metrics for observability.
//!
//! Uses the global OpenTelemetry meter provider. When the host application
//! installs no provider, every instrument is a no-op.

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("anonchat-core"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for accepted connections.
pub fn connections() -> Counter<u64> {
    meter()
        .u64_counter("anonchat.connections")
        .with_description("Total connections accepted")
        .with_unit("connection")
        .build()
}

/// Counter for pairings established.
pub fn pairings() -> Counter<u64> {
    meter()
        .u64_counter("anonchat.pairings")
        .with_description("Total pairings established")
        .with_unit("pair")
        .build()
}

/// Counter for relayed chat messages.
pub fn messages_relayed() -> Counter<u64> {
    meter()
        .u64_counter("anonchat.messages.relayed")
        .with_description("Total chat messages relayed to a partner")
        .with_unit("message")
        .build()
}

/// Counter for chats that ended.
pub fn chats_ended() -> Counter<u64> {
    meter()
        .u64_counter("anonchat.chats.ended")
        .with_description("Total chats ended by end-chat or disconnect")
        .with_unit("chat")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for live connections.
pub fn connections_active() -> Gauge<i64> {
    meter()
        .i64_gauge("anonchat.connections.active")
        .with_description("Current number of live connections")
        .with_unit("connection")
        .build()
}

/// Gauge for the waiting queue length.
pub fn queue_waiting() -> Gauge<i64> {
    meter()
        .i64_gauge("anonchat.queue.waiting")
        .with_description("Current number of connections waiting for a partner")
        .with_unit("connection")
        .build()
}

/// Gauge for active pairs.
pub fn pairs_active() -> Gauge<i64> {
    meter()
        .i64_gauge("anonchat.pairs.active")
        .with_description("Current number of active chat pairs")
        .with_unit("pair")
        .build()
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record a new connection.
pub fn record_connection() {
    connections().add(1, &[]);
}

/// Record a pairing.
pub fn record_pairing() {
    pairings().add(1, &[]);
}

/// Record a relayed message.
pub fn record_message_relayed() {
    messages_relayed().add(1, &[]);
}

/// Record a chat ending. `reason` is `"end_chat"` or `"disconnect"`.
pub fn record_chat_ended(reason: &'static str) {
    chats_ended().add(1, &[KeyValue::new("reason", reason)]);
}

/// Update the matchmaking gauges.
pub fn record_gauges(connections: usize, waiting: usize, pairs: usize) {
    connections_active().record(connections as i64, &[]);
    queue_waiting().record(waiting as i64, &[]);
    pairs_active().record(pairs as i64, &[]);
}
