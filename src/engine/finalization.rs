//! Results, settlement and administrative overrides

use super::{MatchEngine, SessionHandle};
use crate::error::{MatchmakingError, Result};
use crate::matches::{plan_settlement, MatchSession, Session, SettlementReport};
use crate::roster::{MatchRecord, RatingUpdate};
use crate::types::{
    AdminCommand, MatchId, MatchStatus, PhaseKind, PlayerId, Prompt, PromptContent, ResultEvidence, Side,
};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

impl MatchEngine {
    /// Forward result evidence to the administrators; never decides the winner
    pub async fn accept_result(&self, match_id: MatchId, evidence: ResultEvidence) -> Result<()> {
        let handle = self.live_handle(match_id).await?;
        let mut guard = handle.lock().await;
        let active = expect_active(&guard, match_id)?;

        if !active.is_participant(&evidence.submitted_by) {
            return Err(MatchmakingError::NotAParticipant {
                player_id: evidence.submitted_by.clone(),
                match_id,
            }
            .into());
        }
        if active.phase != PhaseKind::Finished {
            return Err(MatchmakingError::MatchNotReady { match_id }.into());
        }

        let mut next = active.clone();
        next.status = MatchStatus::Disputed;
        if next != *active {
            self.inner.matches.save_match(&next.to_record()).await?;
        }
        let commands = review_commands(&next);
        *guard = Session::Active(next);
        drop(guard);

        let admins = &self.inner.settings.admins;
        if admins.is_empty() {
            warn!(
                "Result evidence for match {} from {} has no administrator to go to",
                match_id, evidence.submitted_by
            );
        }
        info!(
            "Match {} result evidence from {} forwarded to {} administrators",
            match_id,
            evidence.submitted_by,
            admins.len()
        );
        let prompts = admins
            .iter()
            .map(|admin| {
                Prompt::new(
                    admin.clone(),
                    PromptContent::ResultSubmitted {
                        evidence: evidence.clone(),
                    },
                )
                .for_match(match_id)
                .with_admin_actions(commands.clone())
            })
            .collect();
        self.deliver(prompts).await;
        Ok(())
    }

    /// Settle a finished match for the winning side.
    ///
    /// Settlement happens at most once: the winner is persisted first and
    /// every participant is flagged as settled right after their rating
    /// write, so a call that failed halfway can be retried safely. A call on
    /// a match that is already settled returns the earlier winner with
    /// `already_settled` set.
    pub async fn decide_winner(&self, match_id: MatchId, winner: Side) -> Result<SettlementReport> {
        let handle = match self.live_handle(match_id).await {
            Ok(handle) => handle,
            Err(e) => {
                return match e.downcast_ref::<MatchmakingError>() {
                    Some(MatchmakingError::MatchClosed { .. }) => {
                        self.settled_report(match_id, winner).await
                    }
                    _ => Err(e),
                }
            }
        };
        let mut guard = handle.lock().await;

        let mut next = match &*guard {
            Session::Active(active) => active.clone(),
            Session::Pending(_) => return Err(MatchmakingError::MatchNotReady { match_id }.into()),
            Session::Closed(record) => return closed_report(record, winner),
        };
        if next.phase != PhaseKind::Finished {
            return Err(MatchmakingError::MatchNotReady { match_id }.into());
        }
        match next.winner {
            Some(decided) if decided != winner => {
                return Err(MatchmakingError::ConflictingWinner { match_id }.into())
            }
            Some(_) => {}
            None => {
                next.winner = Some(winner);
                self.inner.matches.save_match(&next.to_record()).await?;
                *guard = Session::Active(next.clone());
            }
        }

        let mut vips = HashSet::new();
        for participant in &next.participants {
            let owed = !participant.annulled && !participant.settled;
            if owed
                && participant.side == Some(winner)
                && self.inner.roster.is_vip(&participant.player_id).await?
            {
                vips.insert(participant.player_id.clone());
            }
        }
        let bonus_percent = self.inner.settings.vip_bonus_percent();
        let plan = self.with_rng(|rng| {
            plan_settlement(
                &next.participants,
                winner,
                next.stake,
                &vips,
                bonus_percent,
                rng,
            )
        })?;

        // A committed rating write is recorded in the session before the
        // save, so a failed save never leads to a second write on retry
        let mut updates: Vec<RatingUpdate> = Vec::with_capacity(plan.len());
        for entry in plan {
            let update = self
                .inner
                .roster
                .apply_rating_delta(&entry.player_id, entry.delta, entry.is_win)
                .await?;
            if let Some(participant) = next.participant_mut(&entry.player_id) {
                participant.settled = true;
            }
            *guard = Session::Active(next.clone());
            updates.push(update);
            self.inner.matches.save_match(&next.to_record()).await?;
        }

        let mut clans = Vec::new();
        if let Some((clan_a, clan_b)) = next.clans {
            for (clan_id, side) in [(clan_a, Side::A), (clan_b, Side::B)] {
                if next.settled_clans.contains(&clan_id) {
                    continue;
                }
                let is_win = side == winner;
                let delta = if is_win { next.stake } else { -next.stake };
                let clan = self
                    .inner
                    .roster
                    .apply_clan_result(clan_id, is_win, delta)
                    .await?;
                next.settled_clans.push(clan_id);
                *guard = Session::Active(next.clone());
                clans.push(clan);
                self.inner.matches.save_match(&next.to_record()).await?;
            }
        }

        next.status = MatchStatus::Finished;
        let record = next.to_record();
        self.inner.matches.save_match(&record).await?;
        *guard = Session::Closed(record);
        self.remove_session(match_id);
        self.inner.timers.cancel(match_id);
        drop(guard);

        self.inner.registry.release(&next.player_ids())?;
        self.inner
            .counters
            .settlements
            .fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_settlement(next.mode);
        }
        info!(
            "Match {} settled: side {} won, stake {}, {} rating updates",
            match_id,
            winner,
            next.stake,
            updates.len()
        );

        let prompts = updates
            .iter()
            .map(|update| {
                Prompt::new(
                    update.player_id.clone(),
                    PromptContent::Settled {
                        winner,
                        delta: update.delta(),
                        new_rating: update.new_rating,
                        level: update.level,
                    },
                )
                .for_match(match_id)
            })
            .collect();
        self.deliver(prompts).await;

        Ok(SettlementReport {
            match_id,
            winner,
            stake: next.stake,
            updates,
            clans,
            already_settled: false,
        })
    }

    async fn settled_report(&self, match_id: MatchId, winner: Side) -> Result<SettlementReport> {
        match self.inner.matches.load_match(match_id).await? {
            Some(record) => closed_report(&record, winner),
            None => Err(MatchmakingError::MatchNotFound { match_id }.into()),
        }
    }

    /// Cancel a pending or active match with no rating effect
    pub async fn force_cancel(&self, match_id: MatchId, reason: &str) -> Result<()> {
        let handle = self.live_handle(match_id).await?;
        let mut guard = handle.lock().await;

        let mut record = match &*guard {
            Session::Closed(record) => {
                return Err(MatchmakingError::MatchClosed {
                    match_id,
                    status: record.status.to_string(),
                }
                .into())
            }
            session => session.to_record(),
        };
        if record.participants.iter().any(|p| p.settled) {
            return Err(MatchmakingError::MatchClosed {
                match_id,
                status: "settling".to_string(),
            }
            .into());
        }

        record.status = MatchStatus::Cancelled;
        self.inner.matches.save_match(&record).await?;
        let players: Vec<PlayerId> = record
            .participants
            .iter()
            .map(|p| p.player_id.clone())
            .collect();
        *guard = Session::Closed(record);
        self.remove_session(match_id);
        self.inner.timers.cancel(match_id);
        drop(guard);

        self.inner.registry.release(&players)?;
        self.count_cancellation("forced");
        info!("Match {} cancelled by an administrator: {}", match_id, reason);

        let prompts = players
            .into_iter()
            .map(|id| {
                Prompt::new(
                    id,
                    PromptContent::MatchCancelled {
                        reason: reason.to_string(),
                    },
                )
                .for_match(match_id)
            })
            .collect();
        self.deliver(prompts).await;
        Ok(())
    }

    /// Exclude one participant from settlement
    pub async fn annul_participant(&self, match_id: MatchId, player_id: &str) -> Result<()> {
        let handle: SessionHandle = self.live_handle(match_id).await?;
        let mut guard = handle.lock().await;
        let active = expect_active(&guard, match_id)?;

        let participant =
            active
                .participant(player_id)
                .ok_or_else(|| MatchmakingError::NotAParticipant {
                    player_id: player_id.to_string(),
                    match_id,
                })?;
        if participant.annulled {
            return Ok(());
        }
        if participant.settled {
            return Err(MatchmakingError::InvalidAction {
                match_id,
                action: format!("annul:{}", player_id),
            }
            .into());
        }

        let mut next = active.clone();
        if let Some(participant) = next.participant_mut(player_id) {
            participant.annulled = true;
        }
        self.inner.matches.save_match(&next.to_record()).await?;
        *guard = Session::Active(next);
        drop(guard);

        info!("Participant {} of match {} annulled", player_id, match_id);
        self.deliver(vec![
            Prompt::new(player_id, PromptContent::Annulled).for_match(match_id)
        ])
        .await;
        Ok(())
    }

    /// Run an administrator command received through the gateway
    pub async fn run_admin_command(&self, admin_id: &str, command: AdminCommand) -> Result<()> {
        if !self.inner.settings.is_admin(admin_id) {
            warn!("{} is not an administrator, refusing {}", admin_id, command);
            return Err(MatchmakingError::NotAnAdministrator {
                player_id: admin_id.to_string(),
            }
            .into());
        }
        info!("Administrator {} runs {}", admin_id, command);

        match &command {
            AdminCommand::DecideWinner { match_id, winner } => {
                self.decide_winner(*match_id, *winner).await?;
            }
            AdminCommand::Cancel { match_id, reason } => {
                self.force_cancel(*match_id, reason).await?;
            }
            AdminCommand::Annul {
                match_id,
                player_id,
            } => self.annul_participant(*match_id, player_id).await?,
            AdminCommand::AdjustRating { player_id, delta } => {
                self.adjust_rating(player_id, *delta).await?;
            }
        }

        self.deliver(vec![Prompt::new(
            admin_id,
            PromptContent::AdminApplied { command },
        )])
        .await;
        Ok(())
    }

    /// Manual rating edit outside any match
    pub async fn adjust_rating(&self, player_id: &str, delta: i64) -> Result<RatingUpdate> {
        let update = self.inner.roster.adjust_rating(player_id, delta).await?;
        info!(
            "Rating of {} adjusted by {} to {}",
            player_id, delta, update.new_rating
        );
        self.deliver(vec![Prompt::new(
            player_id,
            PromptContent::RatingAdjusted {
                delta,
                new_rating: update.new_rating,
                level: update.level,
            },
        )])
        .await;
        Ok(update)
    }
}

/// Answers an administrator may give to disputed result evidence
fn review_commands(session: &MatchSession) -> Vec<AdminCommand> {
    let match_id = session.match_id;
    let mut commands = vec![
        AdminCommand::DecideWinner {
            match_id,
            winner: Side::A,
        },
        AdminCommand::DecideWinner {
            match_id,
            winner: Side::B,
        },
        AdminCommand::Cancel {
            match_id,
            reason: "cancelled after result review".to_string(),
        },
    ];
    commands.extend(
        session
            .player_ids()
            .into_iter()
            .map(|player_id| AdminCommand::Annul {
                match_id,
                player_id,
            }),
    );
    commands
}

fn expect_active(session: &Session, match_id: MatchId) -> Result<&MatchSession> {
    match session {
        Session::Active(active) => Ok(active),
        Session::Pending(_) => Err(MatchmakingError::MatchNotReady { match_id }.into()),
        Session::Closed(record) => Err(MatchmakingError::MatchClosed {
            match_id,
            status: record.status.to_string(),
        }
        .into()),
    }
}

/// Answer for a match that is no longer live
fn closed_report(record: &MatchRecord, winner: Side) -> Result<SettlementReport> {
    match (record.status, record.winner) {
        (MatchStatus::Finished, Some(decided)) if decided == winner => Ok(SettlementReport {
            match_id: record.match_id,
            winner,
            stake: record.stake.unwrap_or_default(),
            updates: Vec::new(),
            clans: Vec::new(),
            already_settled: true,
        }),
        (MatchStatus::Finished, Some(_)) => Err(MatchmakingError::ConflictingWinner {
            match_id: record.match_id,
        }
        .into()),
        (status, _) => Err(MatchmakingError::MatchClosed {
            match_id: record.match_id,
            status: status.to_string(),
        }
        .into()),
    }
}
