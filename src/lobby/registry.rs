//! Lobby registry
//!
//! Tracks membership of every (mode, slot) pair and promotes a slot the
//! instant it fills. All membership state sits behind one mutex so that a
//! player can never be seated twice and a full slot is drained exactly once,
//! however joins interleave.

use crate::error::{MatchmakingError, Result};
use crate::lobby::clan_queue::{ClanQueue, ClanQueueEntry, ClanQueueOutcome};
use crate::lobby::provider::{ModeConfiguration, ModeProvider};
use crate::lobby::slot::{LobbySlot, SlotMember, SlotSnapshot};
use crate::types::{ClanId, GameMode, InviteTarget, PlayerId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Where a player currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Slot { mode: GameMode, slot: usize },
    ClanQueue { clan_id: ClanId },
    /// Held by a pending or active match
    Engaged,
}

/// A full slot, drained and handed to confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub mode: GameMode,
    pub slot: usize,
    pub members: Vec<SlotMember>,
}

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Entered {
        mode: GameMode,
        slot: usize,
        occupancy: usize,
        capacity: usize,
    },
    Promoted(Promotion),
}

/// Result of returning confirmed players to the lobby
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequeueOutcome {
    Requeued { slot: usize },
    NoFreeSlot,
}

/// Default lifetime of an unanswered clan invite
pub const DEFAULT_INVITE_TTL_SECONDS: i64 = 60;

/// Invitation from one clanmate to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClanInvite {
    pub inviter: PlayerId,
    pub invitee: PlayerId,
    pub clan_id: ClanId,
    pub target: InviteTarget,
    pub created_at: DateTime<Utc>,
}

impl ClanInvite {
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at >= ttl
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub players_waiting: usize,
    pub occupied_slots: usize,
    pub clans_queued: usize,
    pub players_engaged: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    slots: HashMap<GameMode, Vec<LobbySlot>>,
    membership: HashMap<PlayerId, Membership>,
    invites: HashMap<(PlayerId, PlayerId), ClanInvite>,
    clan_queue: ClanQueue,
}

impl RegistryState {
    fn ensure_free(&self, player_id: &str) -> Result<()> {
        match self.membership.get(player_id) {
            None => Ok(()),
            Some(Membership::Slot { .. }) => Err(MatchmakingError::AlreadyInLobby {
                player_id: player_id.to_string(),
            }
            .into()),
            Some(_) => Err(MatchmakingError::AlreadyInMatch {
                player_id: player_id.to_string(),
            }
            .into()),
        }
    }

    fn slot_mut(&mut self, mode: GameMode, slot: usize) -> Result<&mut LobbySlot> {
        self.slots
            .get_mut(&mode)
            .and_then(|slots| slots.get_mut(slot.wrapping_sub(1)))
            .ok_or_else(|| MatchmakingError::InvalidSlot { mode, slot }.into())
    }

    fn slot(&self, mode: GameMode, slot: usize) -> Result<&LobbySlot> {
        self.slots
            .get(&mode)
            .and_then(|slots| slots.get(slot.wrapping_sub(1)))
            .ok_or_else(|| MatchmakingError::InvalidSlot { mode, slot }.into())
    }

    /// Drain the slot if full and move its members to the engaged state
    fn promote_if_full(&mut self, mode: GameMode, slot: usize) -> Result<JoinOutcome> {
        let lobby = self.slot_mut(mode, slot)?;
        if !lobby.is_full() {
            return Ok(JoinOutcome::Entered {
                mode,
                slot,
                occupancy: lobby.occupancy(),
                capacity: lobby.capacity,
            });
        }

        let members = lobby.drain();
        for member in &members {
            self.membership
                .insert(member.player_id.clone(), Membership::Engaged);
        }
        info!(
            "Slot {} of mode {} filled, promoting {} players",
            slot,
            mode,
            members.len()
        );
        Ok(JoinOutcome::Promoted(Promotion {
            mode,
            slot,
            members,
        }))
    }
}

/// Concurrency-safe lobby registry
#[derive(Debug)]
pub struct LobbyRegistry {
    state: Mutex<RegistryState>,
    modes: HashMap<GameMode, ModeConfiguration>,
    invite_ttl: Duration,
}

impl LobbyRegistry {
    /// Build every slot of every mode the provider offers
    pub fn new(provider: &dyn ModeProvider) -> Result<Self> {
        let mut modes = HashMap::new();
        let mut state = RegistryState::default();

        for mode in provider.available_modes() {
            let config = provider.get_mode_config(mode)?;
            provider.validate_config(&config)?;
            let slots = (1..=config.slot_count)
                .map(|index| LobbySlot::new(mode, index, config.capacity))
                .collect();
            state.slots.insert(mode, slots);
            modes.insert(mode, config);
        }

        Ok(Self {
            state: Mutex::new(state),
            modes,
            invite_ttl: Duration::seconds(DEFAULT_INVITE_TTL_SECONDS),
        })
    }

    pub fn with_invite_ttl(mut self, ttl: Duration) -> Self {
        self.invite_ttl = ttl;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState>> {
        self.state.lock().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire lobby registry lock".to_string(),
            }
            .into()
        })
    }

    /// Configuration of a mode
    pub fn mode_config(&self, mode: GameMode) -> Result<&ModeConfiguration> {
        self.modes.get(&mode).ok_or_else(|| {
            MatchmakingError::ConfigurationError {
                message: format!("Mode {} is not offered", mode),
            }
            .into()
        })
    }

    /// Seat a single player
    pub fn join(&self, player_id: &str, mode: GameMode, slot: usize) -> Result<JoinOutcome> {
        if mode.is_clan() {
            return Err(MatchmakingError::PairRequired { mode }.into());
        }

        let mut state = self.lock()?;
        state.slot(mode, slot)?;
        state.ensure_free(player_id)?;

        let lobby = state.slot_mut(mode, slot)?;
        if lobby.is_full() {
            return Err(MatchmakingError::SlotFull { mode, slot }.into());
        }
        lobby.push(SlotMember::new(player_id));
        state
            .membership
            .insert(player_id.to_string(), Membership::Slot { mode, slot });
        debug!("Player {} joined slot {} of mode {}", player_id, slot, mode);

        state.promote_if_full(mode, slot)
    }

    /// Seat two clanmates together
    pub fn join_pair(
        &self,
        mode: GameMode,
        slot: usize,
        first: SlotMember,
        second: SlotMember,
    ) -> Result<JoinOutcome> {
        if !mode.is_clan() {
            return Err(MatchmakingError::PairNotAllowed { mode }.into());
        }
        let clan_id = match (first.clan_id, second.clan_id) {
            (Some(a), Some(b)) if a == b && first.player_id != second.player_id => a,
            _ => {
                return Err(MatchmakingError::NotClanmates {
                    first: first.player_id,
                    second: second.player_id,
                }
                .into())
            }
        };

        let mut state = self.lock()?;
        state.slot(mode, slot)?;
        state.ensure_free(&first.player_id)?;
        state.ensure_free(&second.player_id)?;

        let lobby = state.slot_mut(mode, slot)?;
        if lobby.has_clan(clan_id) {
            return Err(MatchmakingError::ClanAlreadyInSlot {
                clan_id,
                mode,
                slot,
            }
            .into());
        }
        if lobby.free_seats() < 2 {
            return Err(MatchmakingError::SlotFull { mode, slot }.into());
        }

        let seated = [first.player_id.clone(), second.player_id.clone()];
        lobby.push(first);
        lobby.push(second);
        for player_id in seated {
            state
                .membership
                .insert(player_id, Membership::Slot { mode, slot });
        }
        debug!("Clan {} pair joined slot {} of mode {}", clan_id, slot, mode);

        state.promote_if_full(mode, slot)
    }

    /// Remove a player; in clan modes the clanmate leaves too
    pub fn leave(&self, player_id: &str, mode: GameMode, slot: usize) -> Result<Vec<PlayerId>> {
        let mut state = self.lock()?;
        let lobby = state.slot_mut(mode, slot)?;

        let removed = match lobby.remove(player_id) {
            Some(member) => {
                let mut removed = vec![member.player_id];
                if let (true, Some(clan_id)) = (mode.is_clan(), member.clan_id) {
                    removed.extend(lobby.remove_clan(clan_id).into_iter().map(|m| m.player_id));
                }
                removed
            }
            None => {
                return Err(MatchmakingError::NotInSlot {
                    player_id: player_id.to_string(),
                    mode,
                    slot,
                }
                .into())
            }
        };

        for id in &removed {
            state.membership.remove(id);
        }
        debug!("Players {:?} left slot {} of mode {}", removed, slot, mode);
        Ok(removed)
    }

    /// Return engaged players to the first empty slot of the mode with
    /// their readiness preserved
    pub fn requeue(&self, mode: GameMode, members: Vec<SlotMember>) -> Result<RequeueOutcome> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let slots = state
            .slots
            .get_mut(&mode)
            .ok_or_else(|| MatchmakingError::ConfigurationError {
                message: format!("Mode {} is not offered", mode),
            })?;

        let Some(lobby) = slots
            .iter_mut()
            .find(|lobby| lobby.is_empty() && lobby.capacity > members.len())
        else {
            for member in &members {
                state.membership.remove(&member.player_id);
            }
            return Ok(RequeueOutcome::NoFreeSlot);
        };

        let slot = lobby.index;
        for member in &members {
            lobby.push(member.clone().ready());
        }
        for member in members {
            state
                .membership
                .insert(member.player_id, Membership::Slot { mode, slot });
        }
        info!("Requeued confirmed players into slot {} of mode {}", slot, mode);
        Ok(RequeueOutcome::Requeued { slot })
    }

    /// Drop the engaged marker of players whose match ended
    pub fn release(&self, players: &[PlayerId]) -> Result<()> {
        let mut state = self.lock()?;
        for player_id in players {
            if state.membership.get(player_id) == Some(&Membership::Engaged) {
                state.membership.remove(player_id);
            }
        }
        Ok(())
    }

    /// Mark players as held by a match, used when rebuilding sessions
    pub fn engage(&self, players: &[PlayerId]) -> Result<()> {
        let mut state = self.lock()?;
        for player_id in players {
            state
                .membership
                .insert(player_id.clone(), Membership::Engaged);
        }
        Ok(())
    }

    /// Store an invite, replacing earlier invites of the same inviter.
    ///
    /// Invites that ran out by the new invite's creation time are swept and
    /// returned so their inviters can be told.
    pub fn add_invite(&self, invite: ClanInvite) -> Result<Vec<ClanInvite>> {
        let mut state = self.lock()?;
        state.ensure_free(&invite.inviter)?;
        state.ensure_free(&invite.invitee)?;

        let ttl = self.invite_ttl;
        let now = invite.created_at;
        let mut expired = Vec::new();
        state.invites.retain(|_, pending| {
            if pending.is_expired(ttl, now) {
                expired.push(pending.clone());
                false
            } else {
                true
            }
        });
        state
            .invites
            .retain(|(inviter, _), _| *inviter != invite.inviter);
        state
            .invites
            .insert((invite.inviter.clone(), invite.invitee.clone()), invite);
        if !expired.is_empty() {
            debug!("Swept {} expired clan invites", expired.len());
        }
        Ok(expired)
    }

    /// Remove and return a pending invite; an invite past its lifetime is
    /// removed and reported as expired
    pub fn take_invite(
        &self,
        inviter: &str,
        invitee: &str,
        now: DateTime<Utc>,
    ) -> Result<ClanInvite> {
        let mut state = self.lock()?;
        let invite = state
            .invites
            .remove(&(inviter.to_string(), invitee.to_string()))
            .ok_or_else(|| MatchmakingError::InviteNotFound {
                inviter: inviter.to_string(),
                invitee: invitee.to_string(),
            })?;
        if invite.is_expired(self.invite_ttl, now) {
            return Err(MatchmakingError::InviteExpired {
                inviter: inviter.to_string(),
                invitee: invitee.to_string(),
            }
            .into());
        }
        Ok(invite)
    }

    /// Number of invites still held
    pub fn pending_invites(&self) -> Result<usize> {
        Ok(self.lock()?.invites.len())
    }

    /// Queue a clan pair for a clan match
    pub fn enqueue_clan(&self, entry: ClanQueueEntry) -> Result<ClanQueueOutcome> {
        let mut state = self.lock()?;
        for player_id in &entry.players {
            state.ensure_free(player_id)?;
        }

        let queued = entry.clone();
        let outcome = state.clan_queue.enqueue(entry)?;
        match &outcome {
            ClanQueueOutcome::Waiting { .. } => {
                for player_id in queued.players {
                    state.membership.insert(
                        player_id,
                        Membership::ClanQueue {
                            clan_id: queued.clan_id,
                        },
                    );
                }
            }
            ClanQueueOutcome::Paired { opponent, entry } => {
                for player_id in opponent.players.iter().chain(entry.players.iter()) {
                    state
                        .membership
                        .insert(player_id.clone(), Membership::Engaged);
                }
                info!(
                    "Clan {} paired with clan {} from the queue",
                    entry.clan_id, opponent.clan_id
                );
            }
        }
        Ok(outcome)
    }

    /// Withdraw a clan's queue entry
    pub fn withdraw_clan(&self, clan_id: ClanId) -> Result<ClanQueueEntry> {
        let mut state = self.lock()?;
        let entry = state.clan_queue.withdraw(clan_id)?;
        for player_id in &entry.players {
            state.membership.remove(player_id);
        }
        Ok(entry)
    }

    /// Current membership of a player
    pub fn membership(&self, player_id: &str) -> Result<Option<Membership>> {
        Ok(self.lock()?.membership.get(player_id).copied())
    }

    /// Durable copy of a slot's seats
    pub fn snapshot(&self, mode: GameMode, slot: usize) -> Result<SlotSnapshot> {
        Ok(self.lock()?.slot(mode, slot)?.snapshot())
    }

    /// Reseat players from a stored snapshot.
    ///
    /// Players already placed elsewhere are skipped; in clan modes a pair is
    /// only reseated together. A restored slot never fills up. Returns the
    /// players that took their seat again.
    pub fn restore_slot(&self, snapshot: &SlotSnapshot) -> Result<Vec<PlayerId>> {
        let (mode, slot) = (snapshot.mode, snapshot.slot);
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let lobby = state
            .slots
            .get_mut(&mode)
            .and_then(|slots| slots.get_mut(slot.wrapping_sub(1)))
            .ok_or(MatchmakingError::InvalidSlot { mode, slot })?;
        lobby.resume_revision(snapshot.revision);

        let mut groups: Vec<Vec<&SlotMember>> = Vec::new();
        for member in &snapshot.members {
            let group = match (mode.is_clan(), member.clan_id) {
                (true, Some(clan_id)) => groups
                    .iter_mut()
                    .find(|group| group[0].clan_id == Some(clan_id)),
                _ => None,
            };
            match group {
                Some(group) => group.push(member),
                None => groups.push(vec![member]),
            }
        }

        let mut seated = Vec::new();
        for group in groups {
            let placed = group.iter().any(|member| {
                state.membership.contains_key(&member.player_id) || lobby.contains(&member.player_id)
            });
            if placed || (mode.is_clan() && group.len() != 2) || lobby.free_seats() <= group.len() {
                continue;
            }
            for member in group {
                lobby.push(member.clone());
                state
                    .membership
                    .insert(member.player_id.clone(), Membership::Slot { mode, slot });
                seated.push(member.player_id.clone());
            }
        }
        if !seated.is_empty() {
            info!(
                "Restored {} seats in slot {} of mode {}",
                seated.len(),
                slot,
                mode
            );
        }
        Ok(seated)
    }

    /// Members of a slot in join order
    pub fn slot_members(&self, mode: GameMode, slot: usize) -> Result<Vec<SlotMember>> {
        Ok(self.lock()?.slot(mode, slot)?.members().to_vec())
    }

    /// Occupancy of every slot of a mode, indexed from slot 1
    pub fn occupancy(&self, mode: GameMode) -> Result<Vec<usize>> {
        let state = self.lock()?;
        Ok(state
            .slots
            .get(&mode)
            .map(|slots| slots.iter().map(LobbySlot::occupancy).collect())
            .unwrap_or_default())
    }

    pub fn stats(&self) -> Result<RegistryStats> {
        let state = self.lock()?;
        let mut stats = RegistryStats {
            clans_queued: state.clan_queue.len(),
            ..RegistryStats::default()
        };
        for slots in state.slots.values() {
            for lobby in slots {
                stats.players_waiting += lobby.occupancy();
                if !lobby.is_empty() {
                    stats.occupied_slots += 1;
                }
            }
        }
        stats.players_engaged = state
            .membership
            .values()
            .filter(|m| **m == Membership::Engaged)
            .count();
        Ok(stats)
    }
}
