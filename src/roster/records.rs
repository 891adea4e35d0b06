//! Persisted match records
//!
//! A [`MatchRecord`] carries every field needed to rebuild a pending or
//! active session after a restart, including the timestamp of the last
//! accepted action so the remaining timer budget can be recomputed.

use crate::error::Result;
use crate::lobby::SlotSnapshot;
use crate::types::{ClanId, GameMode, MatchId, MatchStatus, PhaseKind, PlayerId, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-participant flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub player_id: PlayerId,
    pub clan_id: Option<ClanId>,
    pub accepted: bool,
    pub side: Option<Side>,
    /// Excluded from settlement by an administrator
    pub annulled: bool,
    /// Dropped out before the match went active
    pub left: bool,
    /// Rating delta already applied
    pub settled: bool,
    /// Penalty recorded for missing the confirmation
    #[serde(default)]
    pub penalty: Option<NoShowPenalty>,
}

impl ParticipantRecord {
    pub fn new(player_id: impl Into<PlayerId>) -> Self {
        Self {
            player_id: player_id.into(),
            clan_id: None,
            accepted: false,
            side: None,
            annulled: false,
            left: false,
            settled: false,
            penalty: None,
        }
    }
}

/// Penalty progress of a candidate who never confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoShowPenalty {
    /// Warning counter after the increment; at the threshold a ban follows
    Warned { warnings: u32 },
    Banned { until: DateTime<Utc> },
}

/// Veto status of a single map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapStatus {
    Available,
    Banned,
    Picked,
}

/// One entry of the ordered veto map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapVeto {
    pub map: String,
    pub status: MapStatus,
}

/// Durable shape of a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub mode: GameMode,
    pub status: MatchStatus,
    pub phase: PhaseKind,
    /// Ordered participants; order is join order
    pub participants: Vec<ParticipantRecord>,
    /// Captain of side A first, then captain of side B once sides are known
    pub captains: Vec<PlayerId>,
    pub veto: Vec<MapVeto>,
    pub turn_holder: Option<PlayerId>,
    pub turn: u32,
    pub picked_map: Option<String>,
    pub stake: Option<i64>,
    /// Clan on side A, clan on side B
    pub clans: Option<(ClanId, ClanId)>,
    pub winner: Option<Side>,
    /// Clans whose result is already applied
    #[serde(default)]
    pub settled_clans: Vec<ClanId>,
    pub created_at: DateTime<Utc>,
    pub last_action_at: DateTime<Utc>,
}

impl MatchRecord {
    /// Fresh pending record for a promoted slot
    pub fn pending(match_id: MatchId, mode: GameMode, participants: Vec<ParticipantRecord>) -> Self {
        let now = Utc::now();
        Self {
            match_id,
            mode,
            status: MatchStatus::Pending,
            phase: PhaseKind::Confirmation,
            participants,
            captains: Vec::new(),
            veto: Vec::new(),
            turn_holder: None,
            turn: 0,
            picked_map: None,
            stake: None,
            clans: None,
            winner: None,
            settled_clans: Vec::new(),
            created_at: now,
            last_action_at: now,
        }
    }

    pub fn participant(&self, player_id: &str) -> Option<&ParticipantRecord> {
        self.participants.iter().find(|p| p.player_id == player_id)
    }

    /// Maps still in the veto pool, in pool order
    pub fn remaining_maps(&self) -> Vec<String> {
        self.veto
            .iter()
            .filter(|entry| entry.status == MapStatus::Available)
            .map(|entry| entry.map.clone())
            .collect()
    }
}

/// Durable match storage used for restart recovery
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Allocate a new match id
    async fn next_match_id(&self) -> Result<MatchId>;

    /// Insert or replace a record
    async fn save_match(&self, record: &MatchRecord) -> Result<()>;

    /// Load a record by id
    async fn load_match(&self, match_id: MatchId) -> Result<Option<MatchRecord>>;

    /// Every record that is neither finished nor cancelled
    async fn open_matches(&self) -> Result<Vec<MatchRecord>>;

    /// Store the seats of a lobby slot, keeping whichever snapshot has the
    /// higher revision
    async fn save_slot(&self, snapshot: &SlotSnapshot) -> Result<()>;

    /// Every stored slot that still has seated players
    async fn occupied_slots(&self) -> Result<Vec<SlotSnapshot>>;
}
