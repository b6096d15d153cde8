//! Connection Registry for matchmaking bookkeeping.
//!
//! Tracks every live connection by its [`ConnectionId`](crate::ConnectionId):
//! its display name, its pairing state, and the channel used to deliver
//! server events to its transport.
//!
//! ## Architecture
//!
//! ```text
//! transport task (conn A) --register--> ConnectionRegistry <--send_to-- MatchmakingEngine
//!        ^                                     |
//!        |                              DashMap<ConnectionId,
//!   mpsc::Receiver<ServerEvent>           ConnectionEntry>
//! ```
//!
//! The registry holds no matchmaking logic. The engine serializes every
//! pairing-state change under its own lock and consults the registry for
//! names and liveness.

mod connection_registry;

pub use connection_registry::{ConnectionEntry, ConnectionRegistry, SendResult};
