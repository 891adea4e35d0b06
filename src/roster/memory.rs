//! In-memory roster and match stores
//!
//! Used by tests and by the binary when it runs without an external store.
//! Both support failure injection so persistence errors can be exercised.

use crate::error::{MatchmakingError, Result};
use crate::lobby::SlotSnapshot;
use crate::roster::records::{MatchRecord, MatchStore};
use crate::roster::store::{RatingUpdate, RosterStore};
use crate::roster::{
    clan_level_for_experience, level_for_rating, CLAN_LOSS_EXPERIENCE, CLAN_WIN_EXPERIENCE,
};
use crate::types::{BanState, Clan, ClanId, GameMode, MatchId, Player, PlayerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

/// Recorded `apply_rating_delta` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingCall {
    pub player_id: PlayerId,
    pub delta: i64,
    pub is_win: bool,
}

/// In-memory roster store
#[derive(Debug, Default)]
pub struct InMemoryRosterStore {
    players: RwLock<HashMap<PlayerId, Player>>,
    clans: RwLock<HashMap<ClanId, Clan>>,
    failing_players: RwLock<HashSet<PlayerId>>,
    rating_calls: Mutex<Vec<RatingCall>>,
    /// Create unknown players on first lookup
    auto_register: bool,
}

fn lock_error(what: &str) -> MatchmakingError {
    MatchmakingError::InternalError {
        message: format!("Failed to acquire {} lock", what),
    }
}

impl InMemoryRosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that accepts any player id, for local runs without accounts
    pub fn with_auto_register() -> Self {
        Self {
            auto_register: true,
            ..Self::default()
        }
    }

    /// Register or replace a player
    pub fn add_player(&self, player: Player) -> Result<()> {
        let mut players = self.players.write().map_err(|_| lock_error("players write"))?;
        players.insert(player.id.clone(), player);
        Ok(())
    }

    /// Register a clan and link its existing members to it
    pub fn add_clan(&self, clan: Clan) -> Result<()> {
        let mut players = self.players.write().map_err(|_| lock_error("players write"))?;
        for member in &clan.members {
            if let Some(player) = players.get_mut(member) {
                player.clan_id = Some(clan.id);
            }
        }
        drop(players);

        let mut clans = self.clans.write().map_err(|_| lock_error("clans write"))?;
        clans.insert(clan.id, clan);
        Ok(())
    }

    /// Grant VIP status until the given instant
    pub fn set_vip(&self, player_id: &str, until: Option<DateTime<Utc>>) -> Result<()> {
        self.update_player(player_id, |player| player.vip_until = until)
            .map(|_| ())
    }

    /// Snapshot of a player
    pub fn player(&self, player_id: &str) -> Option<Player> {
        self.players.read().ok()?.get(player_id).cloned()
    }

    /// Snapshot of a clan
    pub fn clan(&self, clan_id: ClanId) -> Option<Clan> {
        self.clans.read().ok()?.get(&clan_id).cloned()
    }

    /// Make every write for this player fail with a persistence error
    pub fn fail_writes_for(&self, player_id: &str) -> Result<()> {
        let mut failing = self
            .failing_players
            .write()
            .map_err(|_| lock_error("failure set write"))?;
        failing.insert(player_id.to_string());
        Ok(())
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) -> Result<()> {
        let mut failing = self
            .failing_players
            .write()
            .map_err(|_| lock_error("failure set write"))?;
        failing.clear();
        Ok(())
    }

    /// Every successful `apply_rating_delta` call so far
    pub fn rating_calls(&self) -> Vec<RatingCall> {
        self.rating_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn check_failure(&self, player_id: &str) -> Result<()> {
        let failing = self
            .failing_players
            .read()
            .map_err(|_| lock_error("failure set read"))?;
        if failing.contains(player_id) {
            return Err(MatchmakingError::PersistenceFailed {
                reason: format!("write rejected for player {}", player_id),
            }
            .into());
        }
        Ok(())
    }

    fn update_player<F>(&self, player_id: &str, update: F) -> Result<Player>
    where
        F: FnOnce(&mut Player),
    {
        let mut players = self.players.write().map_err(|_| lock_error("players write"))?;
        let player = players
            .get_mut(player_id)
            .ok_or_else(|| MatchmakingError::PlayerNotFound {
                player_id: player_id.to_string(),
            })?;
        update(player);
        Ok(player.clone())
    }
}

#[async_trait]
impl RosterStore for InMemoryRosterStore {
    async fn get_player(&self, player_id: &str) -> Result<Player> {
        if self.auto_register {
            let mut players = self.players.write().map_err(|_| lock_error("players write"))?;
            return Ok(players
                .entry(player_id.to_string())
                .or_insert_with(|| Player::new(player_id, player_id))
                .clone());
        }

        let players = self.players.read().map_err(|_| lock_error("players read"))?;
        players.get(player_id).cloned().ok_or_else(|| {
            MatchmakingError::PlayerNotFound {
                player_id: player_id.to_string(),
            }
            .into()
        })
    }

    async fn get_rating(&self, player_id: &str) -> Result<i64> {
        Ok(self.get_player(player_id).await?.rating)
    }

    async fn apply_rating_delta(
        &self,
        player_id: &str,
        delta: i64,
        is_win: bool,
    ) -> Result<RatingUpdate> {
        self.check_failure(player_id)?;

        let mut old_rating = 0;
        let player = self.update_player(player_id, |player| {
            old_rating = player.rating;
            player.rating += delta;
            player.level = level_for_rating(player.rating);
            player.matches += 1;
            if is_win {
                player.wins += 1;
            } else {
                player.losses += 1;
            }
        })?;

        if let Ok(mut calls) = self.rating_calls.lock() {
            calls.push(RatingCall {
                player_id: player_id.to_string(),
                delta,
                is_win,
            });
        }

        Ok(RatingUpdate {
            player_id: player.id,
            old_rating,
            new_rating: player.rating,
            level: player.level,
        })
    }

    async fn adjust_rating(&self, player_id: &str, delta: i64) -> Result<RatingUpdate> {
        self.check_failure(player_id)?;

        let mut old_rating = 0;
        let player = self.update_player(player_id, |player| {
            old_rating = player.rating;
            player.rating += delta;
            player.level = level_for_rating(player.rating);
        })?;

        Ok(RatingUpdate {
            player_id: player.id,
            old_rating,
            new_rating: player.rating,
            level: player.level,
        })
    }

    async fn get_clan(&self, player_id: &str) -> Result<Option<Clan>> {
        let clan_id = match self.get_player(player_id).await?.clan_id {
            Some(clan_id) => clan_id,
            None => return Ok(None),
        };
        let clans = self.clans.read().map_err(|_| lock_error("clans read"))?;
        Ok(clans.get(&clan_id).cloned())
    }

    async fn get_clan_members(&self, clan_id: ClanId) -> Result<Vec<PlayerId>> {
        let clans = self.clans.read().map_err(|_| lock_error("clans read"))?;
        clans
            .get(&clan_id)
            .map(|clan| clan.members.clone())
            .ok_or_else(|| MatchmakingError::ClanNotFound { clan_id }.into())
    }

    async fn apply_clan_result(&self, clan_id: ClanId, is_win: bool, delta: i64) -> Result<Clan> {
        let mut clans = self.clans.write().map_err(|_| lock_error("clans write"))?;
        let clan = clans
            .get_mut(&clan_id)
            .ok_or(MatchmakingError::ClanNotFound { clan_id })?;

        clan.rating += delta;
        clan.matches += 1;
        if is_win {
            clan.wins += 1;
            clan.experience += CLAN_WIN_EXPERIENCE;
        } else {
            clan.losses += 1;
            clan.experience += CLAN_LOSS_EXPERIENCE;
        }
        clan.level = clan.level.max(clan_level_for_experience(clan.experience));

        Ok(clan.clone())
    }

    async fn set_ban(&self, player_id: &str, ban: BanState) -> Result<()> {
        self.check_failure(player_id)?;
        self.update_player(player_id, |player| player.ban = ban)?;
        Ok(())
    }

    async fn increment_warning(&self, player_id: &str) -> Result<u32> {
        self.check_failure(player_id)?;
        let player = self.update_player(player_id, |player| player.warnings += 1)?;
        Ok(player.warnings)
    }

    async fn reset_warnings(&self, player_id: &str) -> Result<()> {
        self.check_failure(player_id)?;
        self.update_player(player_id, |player| player.warnings = 0)?;
        Ok(())
    }

    async fn is_vip(&self, player_id: &str) -> Result<bool> {
        Ok(self.get_player(player_id).await?.is_vip_at(Utc::now()))
    }
}

/// In-memory match store
#[derive(Debug)]
pub struct InMemoryMatchStore {
    records: RwLock<HashMap<MatchId, MatchRecord>>,
    next_id: AtomicU64,
    fail_saves: AtomicBool,
    /// Saves still allowed before they start failing; `usize::MAX` is unlimited
    save_budget: AtomicUsize,
    saves: AtomicUsize,
    slots: RwLock<HashMap<(GameMode, usize), SlotSnapshot>>,
    fail_slot_saves: AtomicBool,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fail_saves: AtomicBool::new(false),
            save_budget: AtomicUsize::new(usize::MAX),
            saves: AtomicUsize::new(0),
            slots: RwLock::new(HashMap::new()),
            fail_slot_saves: AtomicBool::new(false),
        }
    }

    /// Toggle failure of every subsequent slot save
    pub fn set_fail_slot_saves(&self, fail: bool) {
        self.fail_slot_saves.store(fail, Ordering::SeqCst);
    }

    /// Stored seats of a slot
    pub fn slot(&self, mode: GameMode, slot: usize) -> Option<SlotSnapshot> {
        self.slots.read().ok()?.get(&(mode, slot)).cloned()
    }

    /// Toggle failure of every subsequent save
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
        if !fail {
            self.save_budget.store(usize::MAX, Ordering::SeqCst);
        }
    }

    /// Let `allowed` more saves through, then fail every save after them
    pub fn fail_saves_after(&self, allowed: usize) {
        self.save_budget.store(allowed, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Snapshot of a stored record
    pub fn record(&self, match_id: MatchId) -> Option<MatchRecord> {
        self.records.read().ok()?.get(&match_id).cloned()
    }
}

impl Default for InMemoryMatchStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn next_match_id(&self) -> Result<MatchId> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn save_match(&self, record: &MatchRecord) -> Result<()> {
        let exhausted = self
            .save_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                usize::MAX => Some(left),
                0 => None,
                n => Some(n - 1),
            })
            .is_err();
        if exhausted || self.fail_saves.load(Ordering::SeqCst) {
            return Err(MatchmakingError::PersistenceFailed {
                reason: format!("save of match {} rejected", record.match_id),
            }
            .into());
        }

        let mut records = self.records.write().map_err(|_| lock_error("records write"))?;
        records.insert(record.match_id, record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_match(&self, match_id: MatchId) -> Result<Option<MatchRecord>> {
        let records = self.records.read().map_err(|_| lock_error("records read"))?;
        Ok(records.get(&match_id).cloned())
    }

    async fn open_matches(&self) -> Result<Vec<MatchRecord>> {
        let records = self.records.read().map_err(|_| lock_error("records read"))?;
        let mut open: Vec<MatchRecord> = records
            .values()
            .filter(|record| !record.status.is_closed())
            .cloned()
            .collect();
        open.sort_by_key(|record| record.match_id);
        Ok(open)
    }

    async fn save_slot(&self, snapshot: &SlotSnapshot) -> Result<()> {
        if self.fail_slot_saves.load(Ordering::SeqCst) {
            return Err(MatchmakingError::PersistenceFailed {
                reason: format!(
                    "save of slot {} of mode {} rejected",
                    snapshot.slot, snapshot.mode
                ),
            }
            .into());
        }

        let mut slots = self.slots.write().map_err(|_| lock_error("slots write"))?;
        let key = (snapshot.mode, snapshot.slot);
        match slots.get(&key) {
            Some(stored) if stored.revision > snapshot.revision => {}
            _ => {
                slots.insert(key, snapshot.clone());
            }
        }
        Ok(())
    }

    async fn occupied_slots(&self) -> Result<Vec<SlotSnapshot>> {
        let slots = self.slots.read().map_err(|_| lock_error("slots read"))?;
        let mut occupied: Vec<SlotSnapshot> = slots
            .values()
            .filter(|snapshot| !snapshot.members.is_empty())
            .cloned()
            .collect();
        occupied.sort_by_key(|snapshot| (snapshot.mode.to_string(), snapshot.slot));
        Ok(occupied)
    }
}
