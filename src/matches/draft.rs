//! Captain selection, side assignment and the player draft
//!
//! Everything here is pure over an injected random source so the policies
//! can be tested deterministically.

use crate::error::{MatchmakingError, Result};
use crate::types::{MatchId, PlayerId, Side};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Chance that a captain seat prefers the VIP set
pub const DEFAULT_VIP_CAPTAIN_PROBABILITY: f64 = 0.6;

fn draw<R: Rng + ?Sized>(pool: &mut Vec<PlayerId>, rng: &mut R) -> Option<PlayerId> {
    if pool.is_empty() {
        return None;
    }
    let index = rng.gen_range(0..pool.len());
    Some(pool.swap_remove(index))
}

/// Pick two captains.
///
/// Each seat in turn prefers the VIP set with `vip_probability` and the other
/// set otherwise; an exhausted preferred set falls back to the other one.
/// Fails when fewer than two candidates are supplied.
pub fn pick_captains<R: Rng + ?Sized>(
    vip: &[PlayerId],
    others: &[PlayerId],
    rng: &mut R,
    vip_probability: f64,
) -> Result<(PlayerId, PlayerId)> {
    let mut vip = vip.to_vec();
    let mut others = others.to_vec();
    let probability = vip_probability.clamp(0.0, 1.0);

    let mut seats = Vec::with_capacity(2);
    for _ in 0..2 {
        let prefer_vip = rng.gen_bool(probability);
        let (preferred, fallback) = if prefer_vip {
            (&mut vip, &mut others)
        } else {
            (&mut others, &mut vip)
        };
        let captain = match draw(preferred, rng) {
            Some(captain) => captain,
            None => draw(fallback, rng).ok_or_else(|| MatchmakingError::InternalError {
                message: "Captain selection needs at least two players".to_string(),
            })?,
        };
        seats.push(captain);
    }

    let second = seats.pop();
    let first = seats.pop();
    match (first, second) {
        (Some(first), Some(second)) => Ok((first, second)),
        _ => Err(MatchmakingError::InternalError {
            message: "Captain selection produced fewer than two captains".to_string(),
        }
        .into()),
    }
}

/// How the two captains end up on their sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideAssignment {
    /// Captain 1 on A, captain 2 on B, no choice step
    Fixed,
    /// The given captain chooses a side
    Choice { chooser: PlayerId },
}

/// Decide who chooses sides from the captains' VIP status
pub fn assign_sides<R: Rng + ?Sized>(
    captains: &(PlayerId, PlayerId),
    first_is_vip: bool,
    second_is_vip: bool,
    rng: &mut R,
) -> SideAssignment {
    match (first_is_vip, second_is_vip) {
        (true, false) => SideAssignment::Choice {
            chooser: captains.0.clone(),
        },
        (false, true) => SideAssignment::Choice {
            chooser: captains.1.clone(),
        },
        // Both VIP: a coin flip decides who chooses
        (true, true) => {
            let chooser = if rng.gen_bool(0.5) {
                captains.0.clone()
            } else {
                captains.1.clone()
            };
            SideAssignment::Choice { chooser }
        }
        (false, false) => SideAssignment::Fixed,
    }
}

/// A single draft pick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftPick {
    pub side: Side,
    pub captain: PlayerId,
    pub player_id: PlayerId,
    pub automatic: bool,
}

/// Alternating draft of the undrafted pool, side B first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftState {
    match_id: MatchId,
    captain_a: PlayerId,
    captain_b: PlayerId,
    pool: Vec<PlayerId>,
    on_turn: Side,
    picks: Vec<DraftPick>,
}

impl DraftState {
    pub fn new(
        match_id: MatchId,
        captain_a: PlayerId,
        captain_b: PlayerId,
        pool: Vec<PlayerId>,
    ) -> Self {
        Self::resume(match_id, captain_a, captain_b, pool, Side::B)
    }

    /// Rebuild a draft already in progress
    pub fn resume(
        match_id: MatchId,
        captain_a: PlayerId,
        captain_b: PlayerId,
        pool: Vec<PlayerId>,
        on_turn: Side,
    ) -> Self {
        Self {
            match_id,
            captain_a,
            captain_b,
            pool,
            on_turn,
            picks: Vec::new(),
        }
    }

    pub fn on_turn(&self) -> Side {
        self.on_turn
    }

    pub fn captain(&self, side: Side) -> &PlayerId {
        match side {
            Side::A => &self.captain_a,
            Side::B => &self.captain_b,
        }
    }

    /// Captain whose turn it is
    pub fn turn_holder(&self) -> &PlayerId {
        self.captain(self.on_turn)
    }

    /// Undrafted players in pool order
    pub fn available(&self) -> &[PlayerId] {
        &self.pool
    }

    pub fn picks(&self) -> &[DraftPick] {
        &self.picks
    }

    pub fn is_complete(&self) -> bool {
        self.pool.is_empty()
    }

    /// Explicit pick by the captain on turn
    pub fn pick(&mut self, captain: &str, player_id: &str) -> Result<DraftPick> {
        if self.is_complete() {
            return Err(MatchmakingError::PhaseAdvanced {
                match_id: self.match_id,
            }
            .into());
        }
        if self.turn_holder() != captain {
            return Err(MatchmakingError::NotYourTurn {
                match_id: self.match_id,
            }
            .into());
        }
        let position = self
            .pool
            .iter()
            .position(|p| p == player_id)
            .ok_or_else(|| MatchmakingError::PlayerUnavailable {
                player_id: player_id.to_string(),
                match_id: self.match_id,
            })?;

        let player_id = self.pool.remove(position);
        Ok(self.record(player_id, false))
    }

    /// Timeout pick: a uniformly random undrafted player joins the side on turn
    pub fn auto_pick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<DraftPick> {
        if self.is_complete() {
            return Err(MatchmakingError::PhaseAdvanced {
                match_id: self.match_id,
            }
            .into());
        }
        let index = rng.gen_range(0..self.pool.len());
        let player_id = self.pool.remove(index);
        Ok(self.record(player_id, true))
    }

    fn record(&mut self, player_id: PlayerId, automatic: bool) -> DraftPick {
        let pick = DraftPick {
            side: self.on_turn,
            captain: self.turn_holder().clone(),
            player_id,
            automatic,
        };
        self.picks.push(pick.clone());
        self.on_turn = self.on_turn.opposite();
        pick
    }
}
