//! Roster and match persistence
//!
//! The engine never owns accounts or durable match rows. It talks to them
//! through the [`RosterStore`] and [`MatchStore`] traits; the in-memory
//! implementations back tests and local runs.

pub mod memory;
pub mod records;
pub mod store;

pub use memory::{InMemoryMatchStore, InMemoryRosterStore};
pub use records::{MapStatus, MapVeto, MatchRecord, MatchStore, NoShowPenalty, ParticipantRecord};
pub use store::{RatingUpdate, RosterStore};

/// Rating ceilings for levels 1 through 9; anything above is level 10
const LEVEL_THRESHOLDS: [i64; 9] = [500, 750, 900, 1050, 1200, 1350, 1530, 1750, 2000];

/// Experience needed per clan level
pub const CLAN_EXPERIENCE_PER_LEVEL: i64 = 500;

/// Experience a clan earns for a won match
pub const CLAN_WIN_EXPERIENCE: i64 = 50;

/// Experience a clan earns for a lost match
pub const CLAN_LOSS_EXPERIENCE: i64 = 10;

/// Player level as a pure function of rating
pub fn level_for_rating(rating: i64) -> u8 {
    LEVEL_THRESHOLDS
        .iter()
        .position(|ceiling| rating <= *ceiling)
        .map(|index| index as u8 + 1)
        .unwrap_or(10)
}

/// Clan level reached with the given experience
pub fn clan_level_for_experience(experience: i64) -> u32 {
    (experience.max(0) / CLAN_EXPERIENCE_PER_LEVEL) as u32 + 1
}
