//! Rating settlement
//!
//! Each non-annulled participant moves by the stake, winners up and losers
//! down. A VIP winner gets a bonus of 10 to 15 percent of the stake, at least
//! one point. Losses never carry a bonus.

use crate::roster::{ParticipantRecord, RatingUpdate};
use crate::types::{Clan, MatchId, PlayerId, Side};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::RangeInclusive;

/// Default VIP bonus range in percent of the stake
pub const DEFAULT_VIP_BONUS_PERCENT: RangeInclusive<i64> = 10..=15;

/// Planned rating change of one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementEntry {
    pub player_id: PlayerId,
    pub side: Side,
    pub is_win: bool,
    pub delta: i64,
    pub bonus: i64,
}

/// VIP bonus for a given stake and percentage
pub fn vip_bonus(stake: i64, percent: i64) -> i64 {
    (stake * percent / 100).max(1)
}

/// Plan the rating deltas for every participant still owed a settlement
pub fn plan_settlement<R: Rng + ?Sized>(
    participants: &[ParticipantRecord],
    winner: Side,
    stake: i64,
    vips: &HashSet<PlayerId>,
    bonus_percent: RangeInclusive<i64>,
    rng: &mut R,
) -> Vec<SettlementEntry> {
    participants
        .iter()
        .filter(|p| !p.annulled && !p.settled)
        .filter_map(|p| {
            let side = p.side?;
            let is_win = side == winner;
            let bonus = if is_win && vips.contains(&p.player_id) {
                vip_bonus(stake, rng.gen_range(bonus_percent.clone()))
            } else {
                0
            };
            let delta = if is_win { stake + bonus } else { -stake };
            Some(SettlementEntry {
                player_id: p.player_id.clone(),
                side,
                is_win,
                delta,
                bonus,
            })
        })
        .collect()
}

/// Outcome of `decide_winner`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub match_id: MatchId,
    pub winner: Side,
    pub stake: i64,
    pub updates: Vec<RatingUpdate>,
    pub clans: Vec<Clan>,
    /// True when the match was settled by an earlier call
    pub already_settled: bool,
}
