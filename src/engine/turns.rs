//! Turn-gated actions: side choice, draft picks and map bans

use super::{phase_prompts, MatchEngine, SessionHandle, TimerOutcome};
use crate::error::{MatchmakingError, Result};
use crate::matches::{MatchSession, Session, TimerKey, TurnEvent};
use crate::types::{MatchAction, MatchId, PhaseKind, Prompt, PromptContent, Side};
use std::sync::atomic::Ordering;
use tracing::{debug, info};

impl MatchEngine {
    /// Apply a player's match action
    pub async fn act(&self, player_id: &str, match_id: MatchId, action: MatchAction) -> Result<()> {
        if action == MatchAction::Accept {
            return self.accept(player_id, match_id).await;
        }

        let handle = self.live_handle(match_id).await?;
        let mut guard = handle.lock().await;
        let mut next = match &*guard {
            Session::Active(active) => active.clone(),
            Session::Pending(pending) => {
                return Err(if pending.is_candidate(player_id) {
                    MatchmakingError::InvalidAction {
                        match_id,
                        action: action.to_string(),
                    }
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

        let event = next.apply(player_id, &action)?;
        debug!("Match {}: {} by {}", match_id, action, player_id);
        let prompts = self.commit_turn(&mut guard, next, event).await?;
        drop(guard);
        self.deliver(prompts).await;
        Ok(())
    }

    pub async fn choose_side(&self, player_id: &str, match_id: MatchId, side: Side) -> Result<()> {
        self.act(player_id, match_id, MatchAction::ChooseSide { side })
            .await
    }

    pub async fn pick(&self, captain: &str, match_id: MatchId, player_id: &str) -> Result<()> {
        self.act(
            captain,
            match_id,
            MatchAction::Pick {
                player_id: player_id.to_string(),
            },
        )
        .await
    }

    pub async fn ban(&self, player_id: &str, match_id: MatchId, map: &str) -> Result<()> {
        self.act(
            player_id,
            match_id,
            MatchAction::Ban {
                map: map.to_string(),
            },
        )
        .await
    }

    /// Resolve an expired turn with its automatic action
    pub(super) async fn on_turn_timeout(&self, key: TimerKey) -> Result<TimerOutcome> {
        let handle: SessionHandle = match self.handle(key.match_id) {
            Ok(handle) => handle,
            Err(_) => return Ok(TimerOutcome::Stale),
        };
        let mut guard = handle.lock().await;
        let mut next = match &*guard {
            Session::Active(active) if active.timer_key() == Some(key) => active.clone(),
            _ => return Ok(TimerOutcome::Stale),
        };

        let event = self.with_rng(|rng| next.apply_timeout(rng))??;
        info!(
            "Match {} turn {} timed out, automatic {}",
            key.match_id,
            key.turn,
            event.as_action()
        );
        let prompts = self.commit_turn(&mut guard, next, event).await?;
        drop(guard);
        self.deliver(prompts).await;

        self.inner
            .counters
            .auto_actions
            .fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_auto_action(key.phase);
        }
        Ok(TimerOutcome::Fired)
    }

    /// Persist the advanced session, swap it in and re-arm the timer.
    /// Returns the prompts to send once the session lock is released.
    async fn commit_turn(
        &self,
        slot: &mut Session,
        next: MatchSession,
        event: TurnEvent,
    ) -> Result<Vec<Prompt>> {
        self.inner.matches.save_match(&next.to_record()).await?;

        let match_id = next.match_id;
        let key = next.timer_key();
        let turn_timeout = self.inner.settings.turn_timeout();
        let admins = self.admin_recipients(&next.player_ids());

        let taken = PromptContent::TurnTaken {
            by: event.actor().clone(),
            action: event.as_action(),
            automatic: event.is_automatic(),
        };
        let mut prompts: Vec<Prompt> = next
            .player_ids()
            .into_iter()
            .map(|id| Prompt::new(id, taken.clone()).for_match(match_id))
            .collect();
        prompts.extend(phase_prompts(&next, turn_timeout, &admins));

        if next.phase == PhaseKind::Finished {
            info!(
                "Match {} set up on {} with stake {}",
                match_id,
                next.picked_map().unwrap_or_default(),
                next.stake
            );
        }
        *slot = Session::Active(next);

        match key {
            Some(key) => self.schedule_timer(key, turn_timeout),
            None => {
                self.inner.timers.cancel(match_id);
            }
        }
        Ok(prompts)
    }
}
