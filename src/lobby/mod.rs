//! Lobby management for the matchmaking engine
//!
//! This module handles per-mode slot membership, slot promotion, clan pair
//! invites and the clan queue.

pub mod clan_queue;
pub mod provider;
pub mod registry;
pub mod slot;

// Re-export commonly used types
pub use clan_queue::{ClanQueue, ClanQueueEntry, ClanQueueOutcome};
pub use provider::{ModeConfiguration, ModeProvider, StaticModeProvider};
pub use registry::{
    ClanInvite, JoinOutcome, LobbyRegistry, Membership, Promotion, RegistryStats, RequeueOutcome,
};
pub use slot::{LobbySlot, SlotMember, SlotSnapshot};
