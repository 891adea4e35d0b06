//! Scrim Room - competitive matchmaking engine
//!
//! Players join per-mode lobby slots; a full slot becomes a pending match
//! that everyone must confirm. Confirmed team matches pick captains, choose
//! sides and draft, every match bans maps down to one, and an administrator
//! decides the winner before ratings are settled. Clan pairs enter through an
//! invite handshake into clan slots or the clan queue.

pub mod amqp;
pub mod config;
pub mod engine;
pub mod error;
pub mod lobby;
pub mod matches;
pub mod metrics;
pub mod roster;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::MessagingGateway;
pub use engine::{EngineStats, InviteResolution, MatchEngine, MatchLookup, RecoveryReport};
pub use lobby::{LobbyRegistry, ModeProvider, StaticModeProvider};
pub use roster::{MatchStore, RosterStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
