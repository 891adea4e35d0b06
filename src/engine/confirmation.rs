//! Confirmation phase
//!
//! A promoted slot becomes a pending match that every candidate must accept
//! within the confirmation budget. Once all have accepted the match is
//! activated; on expiry no-shows are warned or banned and the responders go
//! back to the lobby with their readiness kept.

use super::{draw_stake, phase_prompts, MatchEngine, TimerOutcome};
use crate::error::{MatchmakingError, Result};
use crate::lobby::{Promotion, RequeueOutcome, SlotMember};
use crate::matches::{
    assign_sides, pick_captains, MatchSession, PendingMatch, Session, TimerKey,
};
use crate::roster::{NoShowPenalty, ParticipantRecord};
use crate::types::{
    BanState, ClanId, GameMode, MatchAction, MatchId, MatchStatus, PlayerId, Prompt,
    PromptContent,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

impl MatchEngine {
    /// Turn a filled slot into a pending match and prompt every candidate
    pub(super) async fn start_confirmation(&self, promotion: Promotion) -> Result<MatchId> {
        let players: Vec<PlayerId> = promotion
            .members
            .iter()
            .map(|member| member.player_id.clone())
            .collect();

        let pending = match self.persist_new_pending(&promotion).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(
                    "Could not open a match for slot {} of mode {}: {}",
                    promotion.slot, promotion.mode, e
                );
                self.inner.registry.release(&players)?;
                let prompts = players
                    .iter()
                    .map(|id| {
                        Prompt::new(
                            id.clone(),
                            PromptContent::MatchCancelled {
                                reason: "match storage unavailable".to_string(),
                            },
                        )
                    })
                    .collect();
                self.deliver(prompts).await;
                return Err(e);
            }
        };

        let match_id = pending.match_id;
        let timeout = self.inner.settings.confirm_timeout();
        let roster = pending.player_ids();
        let accepted = pending.accepted_count();
        let total = pending.candidates.len();
        let prompts: Vec<Prompt> = pending
            .candidates
            .iter()
            .map(|candidate| {
                if candidate.accepted {
                    Prompt::new(
                        candidate.player_id.clone(),
                        PromptContent::ConfirmationProgress { accepted, total },
                    )
                    .for_match(match_id)
                } else {
                    Prompt::new(
                        candidate.player_id.clone(),
                        PromptContent::ConfirmMatch {
                            mode: promotion.mode,
                            roster: roster.clone(),
                            timeout_secs: timeout.as_secs(),
                        },
                    )
                    .for_match(match_id)
                    .with_actions(vec![MatchAction::Accept])
                }
            })
            .collect();

        let key = pending.timer_key();
        self.insert_session(Session::Pending(pending))?;
        self.schedule_timer(key, timeout);

        self.inner
            .counters
            .promotions
            .fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_promotion(promotion.mode);
        }
        info!(
            "Match {} pending confirmation from {} players ({})",
            match_id, total, promotion.mode
        );

        self.deliver(prompts).await;
        Ok(match_id)
    }

    async fn persist_new_pending(&self, promotion: &Promotion) -> Result<PendingMatch> {
        let match_id = self.inner.matches.next_match_id().await?;
        let pending = PendingMatch::new(match_id, promotion.mode, &promotion.members);
        self.inner.matches.save_match(&pending.to_record()).await?;
        Ok(pending)
    }

    /// Mark a candidate ready; the last acceptance activates the match
    pub async fn accept(&self, player_id: &str, match_id: MatchId) -> Result<()> {
        let handle = self.live_handle(match_id).await?;
        let mut guard = handle.lock().await;

        let pending = match &*guard {
            Session::Pending(pending) => pending,
            Session::Active(active) => {
                return Err(if active.is_participant(player_id) {
                    MatchmakingError::PhaseAdvanced { match_id }
                } else {
                    MatchmakingError::NotAParticipant {
                        player_id: player_id.to_string(),
                        match_id,
                    }
                }
                .into())
            }
            Session::Closed(record) => {
                return Err(MatchmakingError::MatchClosed {
                    match_id,
                    status: record.status.to_string(),
                }
                .into())
            }
        };

        if pending.expired {
            return Err(MatchmakingError::PhaseAdvanced { match_id }.into());
        }
        if !pending.is_candidate(player_id) {
            return Err(MatchmakingError::NotAParticipant {
                player_id: player_id.to_string(),
                match_id,
            }
            .into());
        }
        if pending.has_accepted(player_id) {
            return Ok(());
        }

        let mut next = pending.clone();
        next.mark_accepted(player_id);

        if !next.all_accepted() {
            self.inner.matches.save_match(&next.to_record()).await?;
            let accepted = next.accepted_count();
            let total = next.candidates.len();
            let recipients = next.player_ids();
            *guard = Session::Pending(next);
            drop(guard);

            let prompts = recipients
                .into_iter()
                .map(|id| {
                    Prompt::new(id, PromptContent::ConfirmationProgress { accepted, total })
                        .for_match(match_id)
                })
                .collect();
            self.deliver(prompts).await;
            return Ok(());
        }

        let active = self.activate(&next).await?;
        self.inner.matches.save_match(&active.to_record()).await?;
        let key = active.timer_key();
        let turn_timeout = self.inner.settings.turn_timeout();
        let admins = self.admin_recipients(&active.player_ids());
        let prompts = phase_prompts(&active, turn_timeout, &admins);
        info!(
            "Match {} confirmed, entering {} with stake {}",
            match_id, active.phase, active.stake
        );
        *guard = Session::Active(active);
        drop(guard);

        match key {
            Some(key) => self.schedule_timer(key, turn_timeout),
            None => {
                self.inner.timers.cancel(match_id);
            }
        }
        self.deliver(prompts).await;
        Ok(())
    }

    /// Build the active session: captains, sides, stake and map pool
    async fn activate(&self, pending: &PendingMatch) -> Result<MatchSession> {
        let (stake, map_pool) = draw_stake(self, pending.mode)?;
        let match_id = pending.match_id;
        let participants = pending.candidates.clone();

        let mut session = match pending.mode {
            GameMode::Duel => MatchSession::duel(match_id, participants, map_pool, stake)?,
            GameMode::ClanDuo => MatchSession::clan(match_id, participants, map_pool, stake)?,
            GameMode::Duo | GameMode::Squad => {
                let mut vips = Vec::new();
                let mut others = Vec::new();
                for participant in &participants {
                    if self.inner.roster.is_vip(&participant.player_id).await? {
                        vips.push(participant.player_id.clone());
                    } else {
                        others.push(participant.player_id.clone());
                    }
                }

                let probability = self.inner.settings.vip_captain_probability;
                let (captains, assignment) = self.with_rng(|rng| {
                    pick_captains(&vips, &others, rng, probability).map(|captains| {
                        let first_vip = vips.contains(&captains.0);
                        let second_vip = vips.contains(&captains.1);
                        let assignment = assign_sides(&captains, first_vip, second_vip, rng);
                        (captains, assignment)
                    })
                })??;
                info!(
                    "Match {} captains {} and {} ({:?})",
                    match_id, captains.0, captains.1, assignment
                );
                MatchSession::drafted(
                    match_id,
                    pending.mode,
                    participants,
                    captains,
                    assignment,
                    map_pool,
                    stake,
                )?
            }
        };
        session.created_at = pending.created_at;
        Ok(session)
    }

    /// Expire a pending match: warn or ban no-shows and requeue responders.
    ///
    /// Penalties are applied before the match is closed. Each one is kept on
    /// the candidate as soon as the roster write lands, so a store failure
    /// leaves the match pending and the retried timer resumes where it
    /// stopped without warning anyone twice.
    pub(super) async fn on_confirmation_timeout(&self, key: TimerKey) -> Result<TimerOutcome> {
        let Ok(handle) = self.handle(key.match_id) else {
            return Ok(TimerOutcome::Stale);
        };
        let mut guard = handle.lock().await;
        let mut pending = match &mut *guard {
            Session::Pending(pending) if pending.timer_key() == key => {
                pending.expired = true;
                pending.clone()
            }
            _ => return Ok(TimerOutcome::Stale),
        };

        let penalized = self.penalize_no_shows(&mut pending).await;
        *guard = Session::Pending(pending.clone());
        if let Err(e) = penalized {
            if let Err(save_error) = self.inner.matches.save_match(&pending.to_record()).await {
                warn!(
                    "Could not store penalty progress of match {}: {}",
                    key.match_id, save_error
                );
            }
            return Err(e);
        }

        let mut record = pending.to_record();
        record.status = MatchStatus::Cancelled;
        for participant in &mut record.participants {
            participant.left = !participant.accepted;
        }
        self.inner.matches.save_match(&record).await?;
        *guard = Session::Closed(record);
        self.remove_session(key.match_id);
        drop(guard);

        let no_shows: Vec<&ParticipantRecord> = pending.non_responders();
        let no_show_ids: Vec<PlayerId> = no_shows.iter().map(|c| c.player_id.clone()).collect();
        let responders: Vec<ParticipantRecord> =
            pending.responders().into_iter().cloned().collect();
        info!(
            "Match {} confirmation expired: {} no-shows, {} responders",
            key.match_id,
            no_shows.len(),
            responders.len()
        );

        let threshold = self.inner.settings.warning_threshold;
        let mut bans = 0;
        let mut prompts: Vec<Prompt> = Vec::new();
        for candidate in &no_shows {
            let content = match candidate.penalty {
                Some(NoShowPenalty::Warned { warnings }) => PromptContent::Warning {
                    warnings,
                    threshold,
                },
                Some(NoShowPenalty::Banned { until }) => {
                    bans += 1;
                    PromptContent::Banned { until }
                }
                None => continue,
            };
            prompts.push(Prompt::new(candidate.player_id.clone(), content));
        }
        let warnings = no_shows.len() as u64;

        self.inner.registry.release(&no_show_ids)?;
        self.requeue_responders(pending.mode, responders, &mut prompts)
            .await?;

        self.inner
            .counters
            .confirmation_timeouts
            .fetch_add(1, Ordering::Relaxed);
        self.count_cancellation("confirmation_timeout");
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_confirmation_timeout(warnings, bans);
        }

        self.deliver(prompts).await;
        Ok(TimerOutcome::Fired)
    }

    /// Warn every no-show; reaching the threshold turns the warning into a ban
    async fn penalize_no_shows(&self, pending: &mut PendingMatch) -> Result<()> {
        let threshold = self.inner.settings.warning_threshold;

        for candidate in pending.candidates.iter_mut().filter(|c| !c.accepted) {
            let warnings = match candidate.penalty {
                Some(NoShowPenalty::Banned { .. }) => continue,
                Some(NoShowPenalty::Warned { warnings }) if warnings < threshold => continue,
                Some(NoShowPenalty::Warned { warnings }) => warnings,
                None => {
                    let warnings = self
                        .inner
                        .roster
                        .increment_warning(&candidate.player_id)
                        .await?;
                    candidate.penalty = Some(NoShowPenalty::Warned { warnings });
                    if warnings < threshold {
                        continue;
                    }
                    warnings
                }
            };

            let until = Utc::now() + self.inner.settings.ban_duration();
            self.inner
                .roster
                .set_ban(&candidate.player_id, BanState::Until(until))
                .await?;
            self.inner
                .roster
                .reset_warnings(&candidate.player_id)
                .await?;
            candidate.penalty = Some(NoShowPenalty::Banned { until });
            info!(
                "Player {} banned until {} after {} warnings",
                candidate.player_id, until, warnings
            );
        }
        Ok(())
    }

    /// Send responders back to the first empty slot of the mode.
    ///
    /// In clan mode only complete pairs go back; a lone responder is released.
    async fn requeue_responders(
        &self,
        mode: GameMode,
        responders: Vec<ParticipantRecord>,
        prompts: &mut Vec<Prompt>,
    ) -> Result<()> {
        if responders.is_empty() {
            return Ok(());
        }

        let groups: Vec<Vec<ParticipantRecord>> = if mode.is_clan() {
            let mut by_clan: HashMap<Option<ClanId>, Vec<ParticipantRecord>> = HashMap::new();
            for responder in responders {
                by_clan.entry(responder.clan_id).or_default().push(responder);
            }
            let mut groups = Vec::new();
            for (_, members) in by_clan {
                if members.len() == 2 {
                    groups.push(members);
                } else {
                    let lone: Vec<PlayerId> =
                        members.iter().map(|m| m.player_id.clone()).collect();
                    self.inner.registry.release(&lone)?;
                    prompts.extend(lone.into_iter().map(|id| {
                        Prompt::new(
                            id,
                            PromptContent::MatchCancelled {
                                reason: "clanmate did not confirm".to_string(),
                            },
                        )
                    }));
                }
            }
            groups
        } else {
            vec![responders]
        };

        for group in groups {
            let ids: Vec<PlayerId> = group.iter().map(|m| m.player_id.clone()).collect();
            let members = group
                .into_iter()
                .map(|responder| {
                    let member = SlotMember::new(responder.player_id);
                    match responder.clan_id {
                        Some(clan_id) => member.with_clan(clan_id),
                        None => member,
                    }
                })
                .collect();

            let content = match self.inner.registry.requeue(mode, members)? {
                RequeueOutcome::Requeued { slot } => {
                    self.persist_slot_or_warn(mode, slot).await;
                    PromptContent::Requeued { mode, slot }
                }
                RequeueOutcome::NoFreeSlot => {
                    warn!("No empty {} slot for requeued players {:?}", mode, ids);
                    PromptContent::NoFreeSlot { mode }
                }
            };
            prompts.extend(ids.into_iter().map(|id| Prompt::new(id, content.clone())));
        }
        Ok(())
    }
}
