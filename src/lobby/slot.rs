//! Lobby slot
//!
//! A slot is a capacity-bounded waiting room for one match in formation.
//! Slots live for the whole process; promotion empties them.

use crate::types::{ClanId, GameMode, PlayerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Player waiting in a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMember {
    pub player_id: PlayerId,
    pub clan_id: Option<ClanId>,
    /// Readiness carried over from a timed-out confirmation
    pub ready: bool,
    pub joined_at: DateTime<Utc>,
}

impl SlotMember {
    pub fn new(player_id: impl Into<PlayerId>) -> Self {
        Self {
            player_id: player_id.into(),
            clan_id: None,
            ready: false,
            joined_at: Utc::now(),
        }
    }

    pub fn with_clan(mut self, clan_id: ClanId) -> Self {
        self.clan_id = Some(clan_id);
        self
    }

    pub fn ready(mut self) -> Self {
        self.ready = true;
        self
    }
}

/// Durable copy of a slot's seats.
///
/// `revision` grows with every change to the slot, so a store can drop a
/// snapshot that arrives after a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub mode: GameMode,
    pub slot: usize,
    pub revision: u64,
    pub members: Vec<SlotMember>,
}

/// One (mode, index) slot
#[derive(Debug, Clone)]
pub struct LobbySlot {
    pub mode: GameMode,
    pub index: usize,
    pub capacity: usize,
    members: Vec<SlotMember>,
    revision: u64,
}

impl LobbySlot {
    pub fn new(mode: GameMode, index: usize, capacity: usize) -> Self {
        Self {
            mode,
            index,
            capacity,
            members: Vec::with_capacity(capacity),
            revision: 0,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            mode: self.mode,
            slot: self.index,
            revision: self.revision,
            members: self.members.clone(),
        }
    }

    /// Continue numbering after a revision restored from storage
    pub(crate) fn resume_revision(&mut self, revision: u64) {
        self.revision = self.revision.max(revision);
    }

    pub fn members(&self) -> &[SlotMember] {
        &self.members
    }

    pub fn occupancy(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }

    /// Seats still open
    pub fn free_seats(&self) -> usize {
        self.capacity.saturating_sub(self.members.len())
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.members.iter().any(|m| m.player_id == player_id)
    }

    /// Whether a pair of this clan already sits in the slot
    pub fn has_clan(&self, clan_id: ClanId) -> bool {
        self.members.iter().any(|m| m.clan_id == Some(clan_id))
    }

    /// Add members; the caller has checked the free seats
    pub(crate) fn push(&mut self, member: SlotMember) {
        debug_assert!(!self.is_full());
        self.members.push(member);
        self.revision += 1;
    }

    /// Remove one member, returning it
    pub(crate) fn remove(&mut self, player_id: &str) -> Option<SlotMember> {
        let position = self.members.iter().position(|m| m.player_id == player_id)?;
        self.revision += 1;
        Some(self.members.remove(position))
    }

    /// Remove every member of a clan, returning them
    pub(crate) fn remove_clan(&mut self, clan_id: ClanId) -> Vec<SlotMember> {
        let (removed, kept) = self
            .members
            .drain(..)
            .partition(|m| m.clan_id == Some(clan_id));
        self.members = kept;
        self.revision += 1;
        removed
    }

    /// Empty the slot, returning its members in join order
    pub(crate) fn drain(&mut self) -> Vec<SlotMember> {
        self.revision += 1;
        std::mem::take(&mut self.members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_capacity_and_drain() {
        let mut slot = LobbySlot::new(GameMode::Duel, 1, 2);
        assert!(slot.is_empty());
        slot.push(SlotMember::new("p1"));
        assert_eq!(slot.free_seats(), 1);
        slot.push(SlotMember::new("p2"));
        assert!(slot.is_full());

        let members = slot.drain();
        assert_eq!(members[0].player_id, "p1");
        assert!(slot.is_empty());
        assert_eq!(slot.revision(), 3);
    }

    #[test]
    fn test_snapshot_tracks_revision() {
        let mut slot = LobbySlot::new(GameMode::Duo, 2, 4);
        slot.push(SlotMember::new("p1"));
        let first = slot.snapshot();
        assert_eq!((first.slot, first.revision, first.members.len()), (2, 1, 1));

        slot.resume_revision(10);
        slot.remove("p1");
        let second = slot.snapshot();
        assert_eq!(second.revision, 11);
        assert!(second.members.is_empty());

        slot.resume_revision(4);
        assert_eq!(slot.revision(), 11);
    }

    #[test]
    fn test_remove_clan_pair() {
        let mut slot = LobbySlot::new(GameMode::ClanDuo, 3, 4);
        slot.push(SlotMember::new("a1").with_clan(1));
        slot.push(SlotMember::new("a2").with_clan(1));
        slot.push(SlotMember::new("b1").with_clan(2));

        assert!(slot.has_clan(2));
        let removed = slot.remove_clan(1);
        assert_eq!(removed.len(), 2);
        assert_eq!(slot.occupancy(), 1);
        assert!(!slot.has_clan(1));
        assert!(slot.contains("b1"));
    }
}
