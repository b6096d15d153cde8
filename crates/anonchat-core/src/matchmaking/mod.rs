//! Matchmaking and relay.
//!
//! One [`MatchmakingEngine`] per process owns the waiting queue and the
//! pairing relation. Every client intent is applied as one atomic step under
//! a single lock:
//!
//! ```text
//! findPartner  Idle    -> Paired(head of queue) | Waiting
//! endChat      Paired  -> Idle (partner notified, also Idle)
//!              Waiting -> Idle (dequeued)
//! disconnect   any     -> removed (same cleanup as endChat first)
//! ```
//!
//! Relay intents (`sendMessage`, `typing`, `stopTyping`) only act while
//! `Paired` and only ever reach the partner.

mod engine;

pub use engine::{EngineStats, MatchmakingEngine};
