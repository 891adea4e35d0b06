//! Match sessions
//!
//! A [`Session`] is the exclusively-owned state of one match, pending or
//! active. The engine keeps every session behind its own async lock and
//! mutates it only through the methods below, on a copy that is committed
//! once the durable write succeeded.

use crate::error::{MatchmakingError, Result};
use crate::lobby::SlotMember;
use crate::matches::draft::{DraftPick, DraftState, SideAssignment};
use crate::matches::timer::TimerKey;
use crate::matches::veto::{BanOutcome, VetoState};
use crate::roster::{MapStatus, MapVeto, MatchRecord, ParticipantRecord};
use crate::types::{ClanId, GameMode, MatchAction, MatchId, MatchStatus, PhaseKind, PlayerId, Side};
use chrono::{DateTime, Utc};
use rand::Rng;

/// A promoted slot waiting for every candidate to accept
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMatch {
    pub match_id: MatchId,
    pub mode: GameMode,
    pub candidates: Vec<ParticipantRecord>,
    pub created_at: DateTime<Utc>,
    /// The confirmation budget ran out; penalties may still be in flight
    pub expired: bool,
}

impl PendingMatch {
    /// Candidates keep the readiness they carried into the slot
    pub fn new(match_id: MatchId, mode: GameMode, members: &[SlotMember]) -> Self {
        let candidates = members
            .iter()
            .map(|member| {
                let mut candidate = ParticipantRecord::new(member.player_id.clone());
                candidate.clan_id = member.clan_id;
                candidate.accepted = member.ready;
                candidate
            })
            .collect();
        Self {
            match_id,
            mode,
            candidates,
            created_at: Utc::now(),
            expired: false,
        }
    }

    pub fn from_record(record: &MatchRecord) -> Self {
        Self {
            match_id: record.match_id,
            mode: record.mode,
            candidates: record.participants.clone(),
            created_at: record.created_at,
            expired: record.participants.iter().any(|p| p.penalty.is_some()),
        }
    }

    pub fn to_record(&self) -> MatchRecord {
        let mut record =
            MatchRecord::pending(self.match_id, self.mode, self.candidates.clone());
        record.created_at = self.created_at;
        record.last_action_at = self.created_at;
        record
    }

    pub fn timer_key(&self) -> TimerKey {
        TimerKey::confirmation(self.match_id)
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.candidates.iter().map(|c| c.player_id.clone()).collect()
    }

    pub fn is_candidate(&self, player_id: &str) -> bool {
        self.candidates.iter().any(|c| c.player_id == player_id)
    }

    pub fn has_accepted(&self, player_id: &str) -> bool {
        self.candidates
            .iter()
            .any(|c| c.player_id == player_id && c.accepted)
    }

    /// Mark a candidate ready; false if unknown or already ready
    pub fn mark_accepted(&mut self, player_id: &str) -> bool {
        match self
            .candidates
            .iter_mut()
            .find(|c| c.player_id == player_id && !c.accepted)
        {
            Some(candidate) => {
                candidate.accepted = true;
                true
            }
            None => false,
        }
    }

    pub fn accepted_count(&self) -> usize {
        self.candidates.iter().filter(|c| c.accepted).count()
    }

    pub fn all_accepted(&self) -> bool {
        self.candidates.iter().all(|c| c.accepted)
    }

    pub fn responders(&self) -> Vec<&ParticipantRecord> {
        self.candidates.iter().filter(|c| c.accepted).collect()
    }

    pub fn non_responders(&self) -> Vec<&ParticipantRecord> {
        self.candidates.iter().filter(|c| !c.accepted).collect()
    }
}

/// What a turn action changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    SideChosen {
        chooser: PlayerId,
        side: Side,
        automatic: bool,
    },
    Picked(DraftPick),
    Banned(BanOutcome),
}

impl TurnEvent {
    pub fn actor(&self) -> &PlayerId {
        match self {
            TurnEvent::SideChosen { chooser, .. } => chooser,
            TurnEvent::Picked(pick) => &pick.captain,
            TurnEvent::Banned(ban) => &ban.by,
        }
    }

    pub fn is_automatic(&self) -> bool {
        match self {
            TurnEvent::SideChosen { automatic, .. } => *automatic,
            TurnEvent::Picked(pick) => pick.automatic,
            TurnEvent::Banned(ban) => ban.automatic,
        }
    }

    /// The event expressed as the action that produced it
    pub fn as_action(&self) -> MatchAction {
        match self {
            TurnEvent::SideChosen { side, .. } => MatchAction::ChooseSide { side: *side },
            TurnEvent::Picked(pick) => MatchAction::Pick {
                player_id: pick.player_id.clone(),
            },
            TurnEvent::Banned(ban) => MatchAction::Ban {
                map: ban.map.clone(),
            },
        }
    }
}

fn phase_rank(phase: PhaseKind) -> u8 {
    match phase {
        PhaseKind::Confirmation => 0,
        PhaseKind::SideChoice => 1,
        PhaseKind::Pick => 2,
        PhaseKind::Ban => 3,
        PhaseKind::Finished => 4,
    }
}

fn action_phase(action: &MatchAction) -> PhaseKind {
    match action {
        MatchAction::Accept => PhaseKind::Confirmation,
        MatchAction::ChooseSide { .. } => PhaseKind::SideChoice,
        MatchAction::Pick { .. } => PhaseKind::Pick,
        MatchAction::Ban { .. } => PhaseKind::Ban,
    }
}

/// Authoritative state of an active match
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSession {
    pub match_id: MatchId,
    pub mode: GameMode,
    pub status: MatchStatus,
    pub participants: Vec<ParticipantRecord>,
    /// Captains in selection order
    pub captains: Vec<PlayerId>,
    pub phase: PhaseKind,
    pub side_chooser: Option<PlayerId>,
    pub draft: Option<DraftState>,
    pub map_pool: Vec<String>,
    pub veto: Option<VetoState>,
    /// Incremented on every accepted action; part of the timer fingerprint
    pub turn: u32,
    pub stake: i64,
    pub clans: Option<(ClanId, ClanId)>,
    /// Clans whose result is already applied
    pub settled_clans: Vec<ClanId>,
    pub winner: Option<Side>,
    pub created_at: DateTime<Utc>,
    pub last_action_at: DateTime<Utc>,
}

impl MatchSession {
    fn base(
        match_id: MatchId,
        mode: GameMode,
        participants: Vec<ParticipantRecord>,
        map_pool: Vec<String>,
        stake: i64,
    ) -> Self {
        let now = Utc::now();
        let participants = participants
            .into_iter()
            .map(|mut p| {
                p.accepted = true;
                p
            })
            .collect();
        Self {
            match_id,
            mode,
            status: MatchStatus::Active,
            participants,
            captains: Vec::new(),
            phase: PhaseKind::Ban,
            side_chooser: None,
            draft: None,
            map_pool,
            veto: None,
            turn: 0,
            stake,
            clans: None,
            settled_clans: Vec::new(),
            winner: None,
            created_at: now,
            last_action_at: now,
        }
    }

    /// 1x1: first participant on A, second on B, straight to the veto
    pub fn duel(
        match_id: MatchId,
        participants: Vec<ParticipantRecord>,
        map_pool: Vec<String>,
        stake: i64,
    ) -> Result<Self> {
        if participants.len() != 2 {
            return Err(MatchmakingError::InternalError {
                message: format!("Duel {} needs exactly two players", match_id),
            }
            .into());
        }
        let mut session = Self::base(match_id, GameMode::Duel, participants, map_pool, stake);
        session.participants[0].side = Some(Side::A);
        session.participants[1].side = Some(Side::B);
        session.begin_veto()?;
        Ok(session)
    }

    /// Team mode with selected captains
    pub fn drafted(
        match_id: MatchId,
        mode: GameMode,
        participants: Vec<ParticipantRecord>,
        captains: (PlayerId, PlayerId),
        assignment: SideAssignment,
        map_pool: Vec<String>,
        stake: i64,
    ) -> Result<Self> {
        let mut session = Self::base(match_id, mode, participants, map_pool, stake);
        session.captains = vec![captains.0.clone(), captains.1.clone()];

        match assignment {
            SideAssignment::Fixed => {
                session.set_side(&captains.0, Side::A)?;
                session.set_side(&captains.1, Side::B)?;
                session.begin_draft()?;
            }
            SideAssignment::Choice { chooser } => {
                session.phase = PhaseKind::SideChoice;
                session.side_chooser = Some(chooser);
            }
        }
        Ok(session)
    }

    /// Clan match: the first clan in participant order plays side A and the
    /// first listed player of each pair is its captain
    pub fn clan(
        match_id: MatchId,
        participants: Vec<ParticipantRecord>,
        map_pool: Vec<String>,
        stake: i64,
    ) -> Result<Self> {
        let mut clan_order: Vec<ClanId> = Vec::new();
        for participant in &participants {
            match participant.clan_id {
                Some(clan_id) if !clan_order.contains(&clan_id) => clan_order.push(clan_id),
                Some(_) => {}
                None => {
                    return Err(MatchmakingError::NotInClan {
                        player_id: participant.player_id.clone(),
                    }
                    .into())
                }
            }
        }
        let (clan_a, clan_b) = match clan_order.as_slice() {
            [a, b] => (*a, *b),
            _ => {
                return Err(MatchmakingError::InternalError {
                    message: format!("Clan match {} needs exactly two clans", match_id),
                }
                .into())
            }
        };

        let mut session = Self::base(match_id, GameMode::ClanDuo, participants, map_pool, stake);
        for participant in &mut session.participants {
            participant.side = Some(if participant.clan_id == Some(clan_a) {
                Side::A
            } else {
                Side::B
            });
        }
        for side in [Side::A, Side::B] {
            let captain = session
                .participants
                .iter()
                .find(|p| p.side == Some(side))
                .map(|p| p.player_id.clone());
            if let Some(captain) = captain {
                session.captains.push(captain);
            }
        }
        session.clans = Some((clan_a, clan_b));
        session.begin_veto()?;
        Ok(session)
    }

    /// Rebuild an active session from its durable record
    pub fn from_record(record: &MatchRecord) -> Result<Self> {
        let stake = record.stake.ok_or_else(|| MatchmakingError::InternalError {
            message: format!("Active match {} has no stake", record.match_id),
        })?;

        let mut session = Self {
            match_id: record.match_id,
            mode: record.mode,
            status: record.status,
            participants: record.participants.clone(),
            captains: record.captains.clone(),
            phase: record.phase,
            side_chooser: None,
            draft: None,
            map_pool: record.veto.iter().map(|entry| entry.map.clone()).collect(),
            veto: None,
            turn: record.turn,
            stake,
            clans: record.clans,
            settled_clans: record.settled_clans.clone(),
            winner: record.winner,
            created_at: record.created_at,
            last_action_at: record.last_action_at,
        };

        let holder_side = record
            .turn_holder
            .as_deref()
            .and_then(|holder| session.side_of(holder));

        match record.phase {
            PhaseKind::SideChoice => {
                session.side_chooser = record.turn_holder.clone();
            }
            PhaseKind::Pick => {
                let pool = session
                    .participants
                    .iter()
                    .filter(|p| p.side.is_none() && !p.left)
                    .map(|p| p.player_id.clone())
                    .collect();
                session.draft = Some(DraftState::resume(
                    session.match_id,
                    session.required_leader(Side::A)?,
                    session.required_leader(Side::B)?,
                    pool,
                    holder_side.unwrap_or(Side::B),
                ));
            }
            PhaseKind::Ban | PhaseKind::Finished => {
                session.veto = Some(VetoState::resume(
                    session.match_id,
                    record.veto.clone(),
                    session.required_leader(Side::A)?,
                    session.required_leader(Side::B)?,
                    holder_side.unwrap_or(Side::A),
                ));
            }
            PhaseKind::Confirmation => {
                return Err(MatchmakingError::InternalError {
                    message: format!("Match {} is still confirming", record.match_id),
                }
                .into())
            }
        }
        Ok(session)
    }

    pub fn to_record(&self) -> MatchRecord {
        let veto = match &self.veto {
            Some(veto) => veto.maps().to_vec(),
            None => self
                .map_pool
                .iter()
                .map(|map| MapVeto {
                    map: map.clone(),
                    status: MapStatus::Available,
                })
                .collect(),
        };
        MatchRecord {
            match_id: self.match_id,
            mode: self.mode,
            status: self.status,
            phase: self.phase,
            participants: self.participants.clone(),
            captains: self.captains.clone(),
            veto,
            turn_holder: self.turn_holder().cloned(),
            turn: self.turn,
            picked_map: self.picked_map().map(str::to_string),
            stake: Some(self.stake),
            clans: self.clans,
            winner: self.winner,
            settled_clans: self.settled_clans.clone(),
            created_at: self.created_at,
            last_action_at: self.last_action_at,
        }
    }

    pub fn participant(&self, player_id: &str) -> Option<&ParticipantRecord> {
        self.participants.iter().find(|p| p.player_id == player_id)
    }

    pub fn participant_mut(&mut self, player_id: &str) -> Option<&mut ParticipantRecord> {
        self.participants
            .iter_mut()
            .find(|p| p.player_id == player_id)
    }

    pub fn is_participant(&self, player_id: &str) -> bool {
        self.participant(player_id).is_some()
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.participants
            .iter()
            .map(|p| p.player_id.clone())
            .collect()
    }

    pub fn side_of(&self, player_id: &str) -> Option<Side> {
        self.participant(player_id).and_then(|p| p.side)
    }

    /// Players on a side, in participant order
    pub fn roster(&self, side: Side) -> Vec<PlayerId> {
        self.participants
            .iter()
            .filter(|p| p.side == Some(side))
            .map(|p| p.player_id.clone())
            .collect()
    }

    /// Captain playing a side, or the side's first player when there are no captains
    pub fn leader(&self, side: Side) -> Option<&PlayerId> {
        self.captains
            .iter()
            .find(|captain| self.side_of(captain) == Some(side))
            .or_else(|| {
                self.participants
                    .iter()
                    .find(|p| p.side == Some(side))
                    .map(|p| &p.player_id)
            })
    }

    fn required_leader(&self, side: Side) -> Result<PlayerId> {
        self.leader(side).cloned().ok_or_else(|| {
            MatchmakingError::InternalError {
                message: format!("Match {} has nobody on side {}", self.match_id, side),
            }
            .into()
        })
    }

    /// Player expected to act next
    pub fn turn_holder(&self) -> Option<&PlayerId> {
        match self.phase {
            PhaseKind::SideChoice => self.side_chooser.as_ref(),
            PhaseKind::Pick => self.draft.as_ref().map(DraftState::turn_holder),
            PhaseKind::Ban => self.veto.as_ref().map(VetoState::turn_holder),
            PhaseKind::Confirmation | PhaseKind::Finished => None,
        }
    }

    /// Fingerprint of the running turn, if a timer applies
    pub fn timer_key(&self) -> Option<TimerKey> {
        if self.status.is_closed() {
            return None;
        }
        match self.phase {
            PhaseKind::SideChoice | PhaseKind::Pick | PhaseKind::Ban => {
                Some(TimerKey::new(self.match_id, self.phase, self.turn))
            }
            PhaseKind::Confirmation | PhaseKind::Finished => None,
        }
    }

    pub fn picked_map(&self) -> Option<&str> {
        self.veto.as_ref().and_then(VetoState::decided)
    }

    /// Setup is done and the match waits for its result
    pub fn is_ready_for_result(&self) -> bool {
        self.phase == PhaseKind::Finished && !self.status.is_closed()
    }

    /// Apply a player's turn action
    pub fn apply(&mut self, player_id: &str, action: &MatchAction) -> Result<TurnEvent> {
        self.ensure_open()?;
        if !self.is_participant(player_id) {
            return Err(MatchmakingError::NotAParticipant {
                player_id: player_id.to_string(),
                match_id: self.match_id,
            }
            .into());
        }

        let event = match (self.phase, action) {
            (PhaseKind::SideChoice, MatchAction::ChooseSide { side }) => {
                if self.side_chooser.as_deref() != Some(player_id) {
                    return Err(MatchmakingError::NotYourTurn {
                        match_id: self.match_id,
                    }
                    .into());
                }
                self.choose_side(*side, false)?
            }
            (PhaseKind::Pick, MatchAction::Pick { player_id: target }) => {
                let pick = self.draft_mut()?.pick(player_id, target)?;
                self.after_pick(pick)?
            }
            (PhaseKind::Ban, MatchAction::Ban { map }) => {
                let ban = self.veto_mut()?.ban(player_id, map)?;
                self.after_ban(ban)
            }
            (phase, action) => {
                return Err(if phase_rank(action_phase(action)) < phase_rank(phase) {
                    MatchmakingError::PhaseAdvanced {
                        match_id: self.match_id,
                    }
                } else {
                    MatchmakingError::InvalidAction {
                        match_id: self.match_id,
                        action: action.to_string(),
                    }
                }
                .into())
            }
        };

        self.advance_turn();
        Ok(event)
    }

    /// Apply the automatic action of an expired turn
    pub fn apply_timeout<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<TurnEvent> {
        self.ensure_open()?;
        let event = match self.phase {
            PhaseKind::SideChoice => {
                let side = if rng.gen_bool(0.5) { Side::A } else { Side::B };
                self.choose_side(side, true)?
            }
            PhaseKind::Pick => {
                let pick = self.draft_mut()?.auto_pick(rng)?;
                self.after_pick(pick)?
            }
            PhaseKind::Ban => {
                let ban = self.veto_mut()?.auto_ban(rng)?;
                self.after_ban(ban)
            }
            PhaseKind::Confirmation | PhaseKind::Finished => {
                return Err(MatchmakingError::StaleTimer {
                    match_id: self.match_id,
                }
                .into())
            }
        };

        self.advance_turn();
        Ok(event)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.status.is_closed() {
            return Err(MatchmakingError::MatchClosed {
                match_id: self.match_id,
                status: self.status.to_string(),
            }
            .into());
        }
        if self.phase == PhaseKind::Finished {
            return Err(MatchmakingError::PhaseAdvanced {
                match_id: self.match_id,
            }
            .into());
        }
        Ok(())
    }

    fn advance_turn(&mut self) {
        self.turn += 1;
        self.last_action_at = Utc::now();
    }

    fn set_side(&mut self, player_id: &str, side: Side) -> Result<()> {
        let match_id = self.match_id;
        let participant =
            self.participant_mut(player_id)
                .ok_or_else(|| MatchmakingError::NotAParticipant {
                    player_id: player_id.to_string(),
                    match_id,
                })?;
        participant.side = Some(side);
        Ok(())
    }

    fn draft_mut(&mut self) -> Result<&mut DraftState> {
        let match_id = self.match_id;
        self.draft.as_mut().ok_or_else(|| {
            MatchmakingError::InternalError {
                message: format!("Match {} is drafting without a draft", match_id),
            }
            .into()
        })
    }

    fn veto_mut(&mut self) -> Result<&mut VetoState> {
        let match_id = self.match_id;
        self.veto.as_mut().ok_or_else(|| {
            MatchmakingError::InternalError {
                message: format!("Match {} is banning without a veto", match_id),
            }
            .into()
        })
    }

    fn choose_side(&mut self, side: Side, automatic: bool) -> Result<TurnEvent> {
        let chooser = self
            .side_chooser
            .take()
            .ok_or(MatchmakingError::PhaseAdvanced {
                match_id: self.match_id,
            })?;
        let other = self
            .captains
            .iter()
            .find(|captain| **captain != chooser)
            .cloned()
            .ok_or_else(|| MatchmakingError::InternalError {
                message: format!("Match {} has a single captain", self.match_id),
            })?;

        self.set_side(&chooser, side)?;
        self.set_side(&other, side.opposite())?;
        self.begin_draft()?;
        Ok(TurnEvent::SideChosen {
            chooser,
            side,
            automatic,
        })
    }

    fn after_pick(&mut self, pick: DraftPick) -> Result<TurnEvent> {
        self.set_side(&pick.player_id, pick.side)?;
        if self.draft.as_ref().is_some_and(DraftState::is_complete) {
            self.begin_veto()?;
        }
        Ok(TurnEvent::Picked(pick))
    }

    fn after_ban(&mut self, ban: BanOutcome) -> TurnEvent {
        if ban.decided.is_some() {
            self.phase = PhaseKind::Finished;
        }
        TurnEvent::Banned(ban)
    }

    fn begin_draft(&mut self) -> Result<()> {
        let pool: Vec<PlayerId> = self
            .participants
            .iter()
            .filter(|p| p.side.is_none())
            .map(|p| p.player_id.clone())
            .collect();
        if pool.is_empty() {
            return self.begin_veto();
        }
        self.draft = Some(DraftState::new(
            self.match_id,
            self.required_leader(Side::A)?,
            self.required_leader(Side::B)?,
            pool,
        ));
        self.phase = PhaseKind::Pick;
        Ok(())
    }

    fn begin_veto(&mut self) -> Result<()> {
        self.veto = Some(VetoState::new(
            self.match_id,
            &self.map_pool,
            self.required_leader(Side::A)?,
            self.required_leader(Side::B)?,
        ));
        self.phase = PhaseKind::Ban;
        Ok(())
    }
}

/// State of one match behind its session lock
#[derive(Debug, Clone, PartialEq)]
pub enum Session {
    Pending(PendingMatch),
    Active(MatchSession),
    /// Finished or cancelled; left behind for tasks still waiting on the lock
    Closed(MatchRecord),
}

impl Session {
    pub fn match_id(&self) -> MatchId {
        match self {
            Session::Pending(pending) => pending.match_id,
            Session::Active(active) => active.match_id,
            Session::Closed(record) => record.match_id,
        }
    }

    pub fn mode(&self) -> GameMode {
        match self {
            Session::Pending(pending) => pending.mode,
            Session::Active(active) => active.mode,
            Session::Closed(record) => record.mode,
        }
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        match self {
            Session::Pending(pending) => pending.player_ids(),
            Session::Active(active) => active.player_ids(),
            Session::Closed(record) => record
                .participants
                .iter()
                .map(|p| p.player_id.clone())
                .collect(),
        }
    }

    /// Fingerprint the live timer must carry
    pub fn timer_key(&self) -> Option<TimerKey> {
        match self {
            Session::Pending(pending) => Some(pending.timer_key()),
            Session::Active(active) => active.timer_key(),
            Session::Closed(_) => None,
        }
    }

    pub fn to_record(&self) -> MatchRecord {
        match self {
            Session::Pending(pending) => pending.to_record(),
            Session::Active(active) => active.to_record(),
            Session::Closed(record) => record.clone(),
        }
    }

    pub fn as_active(&self) -> Option<&MatchSession> {
        match self {
            Session::Active(active) => Some(active),
            Session::Pending(_) | Session::Closed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::provider::{DUEL_MAP_POOL, TEAM_MAP_POOL};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn participants(ids: &[&str]) -> Vec<ParticipantRecord> {
        ids.iter().map(|id| ParticipantRecord::new(*id)).collect()
    }

    fn pool(maps: &[&str]) -> Vec<String> {
        maps.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn test_pending_accepts() {
        let members = vec![SlotMember::new("p1"), SlotMember::new("p2").ready()];
        let mut pending = PendingMatch::new(3, GameMode::Duel, &members);
        assert!(pending.has_accepted("p2"));
        assert!(!pending.all_accepted());

        assert!(pending.mark_accepted("p1"));
        assert!(!pending.mark_accepted("p1"));
        assert!(!pending.mark_accepted("stranger"));
        assert!(pending.all_accepted());
        assert_eq!(pending.accepted_count(), 2);
    }

    #[test]
    fn test_duel_goes_straight_to_veto() {
        let session =
            MatchSession::duel(1, participants(&["p1", "p2"]), pool(&DUEL_MAP_POOL), 10).unwrap();
        assert_eq!(session.phase, PhaseKind::Ban);
        assert_eq!(session.turn_holder().map(String::as_str), Some("p1"));
        assert_eq!(session.roster(Side::B), vec!["p2".to_string()]);
        assert_eq!(
            session.timer_key(),
            Some(TimerKey::new(1, PhaseKind::Ban, 0))
        );
    }

    #[test]
    fn test_out_of_turn_action_leaves_state_untouched() {
        let mut session =
            MatchSession::duel(1, participants(&["p1", "p2"]), pool(&DUEL_MAP_POOL), 10).unwrap();
        let before = session.clone();

        let err = session
            .apply(
                "p2",
                &MatchAction::Ban {
                    map: "Temple".to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::NotYourTurn { .. })
        ));
        assert_eq!(session, before);

        let late_accept = session.apply("p1", &MatchAction::Accept).unwrap_err();
        assert!(matches!(
            late_accept.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::PhaseAdvanced { .. })
        ));
    }

    #[test]
    fn test_side_choice_then_draft_then_veto() {
        let mut session = MatchSession::drafted(
            2,
            GameMode::Duo,
            participants(&["c1", "c2", "x", "y"]),
            ("c1".to_string(), "c2".to_string()),
            SideAssignment::Choice {
                chooser: "c2".to_string(),
            },
            pool(&TEAM_MAP_POOL),
            25,
        )
        .unwrap();
        assert_eq!(session.phase, PhaseKind::SideChoice);
        assert!(session
            .apply("c1", &MatchAction::ChooseSide { side: Side::A })
            .is_err());

        session
            .apply("c2", &MatchAction::ChooseSide { side: Side::A })
            .unwrap();
        assert_eq!(session.side_of("c2"), Some(Side::A));
        assert_eq!(session.side_of("c1"), Some(Side::B));
        assert_eq!(session.phase, PhaseKind::Pick);
        // side B captain picks first
        assert_eq!(session.turn_holder().map(String::as_str), Some("c1"));

        session
            .apply(
                "c1",
                &MatchAction::Pick {
                    player_id: "y".to_string(),
                },
            )
            .unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let event = session.apply_timeout(&mut rng).unwrap();
        assert!(event.is_automatic());
        assert_eq!(session.side_of("x"), Some(Side::A));

        assert_eq!(session.phase, PhaseKind::Ban);
        assert_eq!(session.turn_holder().map(String::as_str), Some("c2"));
        assert_eq!(session.turn, 3);
    }

    #[test]
    fn test_clan_session_fixed_teams() {
        let mut records = participants(&["a1", "a2", "b1", "b2"]);
        records[0].clan_id = Some(10);
        records[1].clan_id = Some(10);
        records[2].clan_id = Some(20);
        records[3].clan_id = Some(20);

        let session = MatchSession::clan(5, records, pool(&TEAM_MAP_POOL), 30).unwrap();
        assert_eq!(session.clans, Some((10, 20)));
        assert_eq!(session.captains, vec!["a1".to_string(), "b1".to_string()]);
        assert_eq!(session.phase, PhaseKind::Ban);
        assert_eq!(session.turn_holder().map(String::as_str), Some("a1"));
    }

    #[test]
    fn test_record_round_trip_mid_draft() {
        let mut session = MatchSession::drafted(
            8,
            GameMode::Squad,
            participants(&["c1", "c2", "p1", "p2", "p3", "p4", "p5", "p6", "p7", "p8"]),
            ("c1".to_string(), "c2".to_string()),
            SideAssignment::Fixed,
            pool(&TEAM_MAP_POOL),
            30,
        )
        .unwrap();
        session
            .apply(
                "c2",
                &MatchAction::Pick {
                    player_id: "p5".to_string(),
                },
            )
            .unwrap();

        let rebuilt = MatchSession::from_record(&session.to_record()).unwrap();
        assert_eq!(rebuilt.phase, PhaseKind::Pick);
        assert_eq!(rebuilt.turn_holder().map(String::as_str), Some("c1"));
        assert_eq!(rebuilt.draft.as_ref().map(|d| d.available().len()), Some(7));
        assert_eq!(rebuilt.timer_key(), session.timer_key());
    }
}
