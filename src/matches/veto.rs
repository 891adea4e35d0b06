//! Map veto
//!
//! Side A bans first, then the sides alternate until a single map remains.
//! That map is the match map.

use crate::error::{MatchmakingError, Result};
use crate::roster::{MapStatus, MapVeto};
use crate::types::{MatchId, PlayerId, Side};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A single ban, explicit or automatic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanOutcome {
    pub map: String,
    pub by: PlayerId,
    pub side: Side,
    pub automatic: bool,
    /// Set once the ban left exactly one map
    pub decided: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VetoState {
    match_id: MatchId,
    maps: Vec<MapVeto>,
    banner_a: PlayerId,
    banner_b: PlayerId,
    on_turn: Side,
}

impl VetoState {
    /// Fresh veto over an ordered pool
    pub fn new(match_id: MatchId, pool: &[String], banner_a: PlayerId, banner_b: PlayerId) -> Self {
        let maps = pool
            .iter()
            .map(|map| MapVeto {
                map: map.clone(),
                status: MapStatus::Available,
            })
            .collect();
        Self::resume(match_id, maps, banner_a, banner_b, Side::A)
    }

    /// Rebuild a veto already in progress
    pub fn resume(
        match_id: MatchId,
        maps: Vec<MapVeto>,
        banner_a: PlayerId,
        banner_b: PlayerId,
        on_turn: Side,
    ) -> Self {
        Self {
            match_id,
            maps,
            banner_a,
            banner_b,
            on_turn,
        }
    }

    pub fn maps(&self) -> &[MapVeto] {
        &self.maps
    }

    pub fn on_turn(&self) -> Side {
        self.on_turn
    }

    /// Player banning for the side on turn
    pub fn turn_holder(&self) -> &PlayerId {
        match self.on_turn {
            Side::A => &self.banner_a,
            Side::B => &self.banner_b,
        }
    }

    /// Maps not banned yet, in pool order
    pub fn remaining(&self) -> Vec<String> {
        self.maps
            .iter()
            .filter(|entry| entry.status != MapStatus::Banned)
            .map(|entry| entry.map.clone())
            .collect()
    }

    pub fn bans(&self) -> usize {
        self.maps
            .iter()
            .filter(|entry| entry.status == MapStatus::Banned)
            .count()
    }

    /// The match map once the veto is over
    pub fn decided(&self) -> Option<&str> {
        self.maps
            .iter()
            .find(|entry| entry.status == MapStatus::Picked)
            .map(|entry| entry.map.as_str())
    }

    /// Explicit ban by the player on turn
    pub fn ban(&mut self, player_id: &str, map: &str) -> Result<BanOutcome> {
        if self.decided().is_some() {
            return Err(MatchmakingError::PhaseAdvanced {
                match_id: self.match_id,
            }
            .into());
        }
        if self.turn_holder() != player_id {
            return Err(MatchmakingError::NotYourTurn {
                match_id: self.match_id,
            }
            .into());
        }
        let index = self
            .maps
            .iter()
            .position(|entry| entry.map == map && entry.status == MapStatus::Available)
            .ok_or_else(|| MatchmakingError::MapUnavailable {
                match_id: self.match_id,
                map: map.to_string(),
            })?;
        Ok(self.apply(index, false))
    }

    /// Timeout ban of a uniformly random remaining map
    pub fn auto_ban<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<BanOutcome> {
        if self.decided().is_some() {
            return Err(MatchmakingError::PhaseAdvanced {
                match_id: self.match_id,
            }
            .into());
        }
        let available: Vec<usize> = self
            .maps
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.status == MapStatus::Available)
            .map(|(index, _)| index)
            .collect();
        let index = available[rng.gen_range(0..available.len())];
        Ok(self.apply(index, true))
    }

    fn apply(&mut self, index: usize, automatic: bool) -> BanOutcome {
        self.maps[index].status = MapStatus::Banned;
        let by = self.turn_holder().clone();
        let side = self.on_turn;
        self.on_turn = self.on_turn.opposite();

        let mut remaining = self
            .maps
            .iter_mut()
            .filter(|entry| entry.status == MapStatus::Available);
        let decided = match (remaining.next(), remaining.next()) {
            (Some(last), None) => {
                last.status = MapStatus::Picked;
                Some(last.map.clone())
            }
            _ => None,
        };

        BanOutcome {
            map: self.maps[index].map.clone(),
            by,
            side,
            automatic,
            decided,
        }
    }
}
