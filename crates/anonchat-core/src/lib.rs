//! # anonchat-core
//!
//! Matchmaking and relay engine for anonymous one-on-one chat.
//!
//! Visitors connect, ask for a partner, and are paired first-come first-served
//! with whoever has been waiting longest. Once paired, chat text and typing
//! indicators are relayed to the partner only, and either side leaving tells
//! the other.
//!
//! ## Architecture
//!
//! - **Connection Registry**: per-connection bookkeeping (display name,
//!   pairing state, outbound channel)
//! - **Matchmaking Engine**: the waiting queue and the pairing relation,
//!   mutated under one lock; every client intent is a single atomic operation
//! - **Protocol**: the closed set of JSON events exchanged with clients
//!
//! The engine knows nothing about sockets. A transport registers a connection
//! with an `mpsc::Sender<ServerEvent>`, forwards decoded [`ClientEvent`]s to
//! [`MatchmakingEngine::dispatch`], and calls [`MatchmakingEngine::disconnect`]
//! exactly once when the transport goes away.

pub mod matchmaking;
pub mod metrics;
pub mod protocol;
pub mod registry;

mod error;
mod types;

pub use error::ChatError;
pub use matchmaking::{EngineStats, MatchmakingEngine};
pub use protocol::{ClientEvent, FindPartnerRequest, ServerEvent};
pub use registry::{ConnectionRegistry, SendResult};
pub use types::*;
