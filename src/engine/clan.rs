//! Clan queue matches
//!
//! Two clan pairs meeting in the queue have already agreed through the
//! invite handshake, so their match skips confirmation and opens straight
//! into the map veto.

use super::{draw_stake, phase_prompts, MatchEngine};
use crate::error::{MatchmakingError, Result};
use crate::lobby::{ClanQueueEntry, ClanQueueOutcome};
use crate::matches::{MatchSession, Session};
use crate::roster::ParticipantRecord;
use crate::types::{ClanId, GameMode, MatchId, PlayerId, Prompt, PromptContent};
use std::sync::atomic::Ordering;
use tracing::{info, warn};

impl MatchEngine {
    /// Queue a clan pair, starting a match when an opponent is waiting
    pub(super) async fn enqueue_clan(
        &self,
        clan_id: ClanId,
        players: Vec<PlayerId>,
    ) -> Result<ClanQueueOutcome> {
        let outcome = self
            .inner
            .registry
            .enqueue_clan(ClanQueueEntry::new(clan_id, players.clone()))?;

        match &outcome {
            ClanQueueOutcome::Waiting { waiting } => {
                info!("Clan {} waiting in the clan queue", clan_id);
                let prompts = players
                    .into_iter()
                    .map(|id| Prompt::new(id, PromptContent::ClanQueued { waiting: *waiting }))
                    .collect();
                self.deliver(prompts).await;
            }
            ClanQueueOutcome::Paired { opponent, entry } => {
                self.start_clan_match(opponent, entry).await?;
            }
        }
        Ok(outcome)
    }

    /// Take the caller's clan out of the clan queue
    pub async fn withdraw_clan_queue(&self, player_id: &str) -> Result<()> {
        let clan = self
            .inner
            .roster
            .get_clan(player_id)
            .await?
            .ok_or_else(|| MatchmakingError::NotInClan {
                player_id: player_id.to_string(),
            })?;
        let entry = self.inner.registry.withdraw_clan(clan.id)?;
        info!("Clan {} withdrawn from the clan queue by {}", clan.id, player_id);

        let prompts = entry
            .players
            .into_iter()
            .map(|id| Prompt::new(id, PromptContent::ClanQueueWithdrawn))
            .collect();
        self.deliver(prompts).await;
        Ok(())
    }

    async fn start_clan_match(
        &self,
        opponent: &ClanQueueEntry,
        entry: &ClanQueueEntry,
    ) -> Result<MatchId> {
        let players: Vec<PlayerId> = opponent
            .players
            .iter()
            .chain(entry.players.iter())
            .cloned()
            .collect();

        let session = match self.persist_clan_match(opponent, entry).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    "Could not open a match for clans {} and {}: {}",
                    opponent.clan_id, entry.clan_id, e
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

        let match_id = session.match_id;
        let turn_timeout = self.inner.settings.turn_timeout();
        let admins = self.admin_recipients(&players);
        let prompts = phase_prompts(&session, turn_timeout, &admins);
        let key = session.timer_key();

        self.insert_session(Session::Active(session))?;
        if let Some(key) = key {
            self.schedule_timer(key, turn_timeout);
        }

        self.inner
            .counters
            .promotions
            .fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_promotion(GameMode::ClanDuo);
        }
        info!(
            "Clan match {} opened: clan {} against clan {}",
            match_id, opponent.clan_id, entry.clan_id
        );

        self.deliver(prompts).await;
        Ok(match_id)
    }

    async fn persist_clan_match(
        &self,
        opponent: &ClanQueueEntry,
        entry: &ClanQueueEntry,
    ) -> Result<MatchSession> {
        let match_id = self.inner.matches.next_match_id().await?;
        let (stake, pool) = draw_stake(self, GameMode::ClanDuo)?;

        let participants = [opponent, entry]
            .into_iter()
            .flat_map(|queued| {
                queued.players.iter().map(move |id| {
                    let mut participant = ParticipantRecord::new(id.clone());
                    participant.clan_id = Some(queued.clan_id);
                    participant.accepted = true;
                    participant
                })
            })
            .collect();

        let session = MatchSession::clan(match_id, participants, pool, stake)?;
        self.inner.matches.save_match(&session.to_record()).await?;
        Ok(session)
    }
}
