//! Roster store interface
//!
//! Accounts, clans, ratings, warnings and bans live outside the engine.
//! Every call is assumed strongly consistent on its own; the engine never
//! relies on cross-call transactions.

use crate::error::Result;
use crate::types::{BanState, Clan, ClanId, Player, PlayerId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of a rating write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingUpdate {
    pub player_id: PlayerId,
    pub old_rating: i64,
    pub new_rating: i64,
    pub level: u8,
}

impl RatingUpdate {
    pub fn delta(&self) -> i64 {
        self.new_rating - self.old_rating
    }
}

/// Account and clan storage used by the engine
#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Fetch a player account, failing with `PlayerNotFound` if unknown
    async fn get_player(&self, player_id: &str) -> Result<Player>;

    /// Current rating of a player
    async fn get_rating(&self, player_id: &str) -> Result<i64>;

    /// Apply a match result: rating delta, match counter and win/loss counter
    async fn apply_rating_delta(
        &self,
        player_id: &str,
        delta: i64,
        is_win: bool,
    ) -> Result<RatingUpdate>;

    /// Manual rating edit; counters stay untouched
    async fn adjust_rating(&self, player_id: &str, delta: i64) -> Result<RatingUpdate>;

    /// Clan the player belongs to, if any
    async fn get_clan(&self, player_id: &str) -> Result<Option<Clan>>;

    /// Members of a clan
    async fn get_clan_members(&self, clan_id: ClanId) -> Result<Vec<PlayerId>>;

    /// Apply a clan match result symmetric to the player settlement
    async fn apply_clan_result(&self, clan_id: ClanId, is_win: bool, delta: i64) -> Result<Clan>;

    /// Set or lift a ban
    async fn set_ban(&self, player_id: &str, ban: BanState) -> Result<()>;

    /// Increment the no-show counter, returning the new count
    async fn increment_warning(&self, player_id: &str) -> Result<u32>;

    /// Reset the no-show counter
    async fn reset_warnings(&self, player_id: &str) -> Result<()>;

    /// Whether the player currently holds VIP status
    async fn is_vip(&self, player_id: &str) -> Result<bool>;
}
