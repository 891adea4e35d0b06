//! Lobby operations: joins, leaves and the clan invite handshake

use super::MatchEngine;
use crate::error::{MatchmakingError, Result};
use crate::lobby::{ClanInvite, ClanQueueOutcome, JoinOutcome, Membership, SlotMember};
use crate::types::{BanState, GameMode, InviteTarget, PlayerId, Prompt, PromptContent};
use chrono::Utc;
use tracing::{info, warn};

/// How an answered clan invite ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteResolution {
    Declined,
    /// The pair took its seat in a clan slot
    Seated(JoinOutcome),
    /// The pair entered the clan queue
    Queued(ClanQueueOutcome),
}

impl MatchEngine {
    /// Fail for banned players, lifting a ban that already ran out
    pub(super) async fn ensure_eligible(&self, player_id: &str) -> Result<()> {
        let player = self.inner.roster.get_player(player_id).await?;
        if player.ban.is_active(Utc::now()) {
            return Err(MatchmakingError::PlayerBanned {
                player_id: player_id.to_string(),
            }
            .into());
        }
        if let BanState::Until(_) = player.ban {
            self.inner.roster.set_ban(player_id, BanState::None).await?;
            info!("Lifted expired ban of player {}", player_id);
        }
        Ok(())
    }

    /// Seat a player in a lobby slot
    pub async fn join(&self, player_id: &str, mode: GameMode, slot: usize) -> Result<JoinOutcome> {
        self.ensure_eligible(player_id).await?;
        let outcome = self.inner.registry.join(player_id, mode, slot)?;
        self.after_seating(&outcome, player_id, &[player_id.to_string()])
            .await?;
        Ok(outcome)
    }

    /// Leave a lobby slot; in clan mode the clanmate leaves too
    pub async fn leave(&self, player_id: &str, mode: GameMode, slot: usize) -> Result<Vec<PlayerId>> {
        let removed = self.inner.registry.leave(player_id, mode, slot)?;
        self.persist_slot_or_warn(mode, slot).await;
        let prompts = removed
            .iter()
            .map(|id| Prompt::new(id.clone(), PromptContent::LeftSlot { mode, slot }))
            .collect();
        self.deliver(prompts).await;
        Ok(removed)
    }

    /// Invite a clanmate to a clan slot or to the clan queue
    pub async fn invite_clanmate(
        &self,
        inviter: &str,
        invitee: &str,
        target: InviteTarget,
    ) -> Result<()> {
        let clan = self
            .inner
            .roster
            .get_clan(inviter)
            .await?
            .ok_or_else(|| MatchmakingError::NotInClan {
                player_id: inviter.to_string(),
            })?;
        let members = self.inner.roster.get_clan_members(clan.id).await?;
        if inviter == invitee || !members.iter().any(|member| member == invitee) {
            return Err(MatchmakingError::NotClanmates {
                first: inviter.to_string(),
                second: invitee.to_string(),
            }
            .into());
        }
        self.ensure_eligible(inviter).await?;
        self.ensure_eligible(invitee).await?;

        // Advisory only: join_pair checks the slot again under the registry lock
        if let InviteTarget::Slot { slot } = target {
            let mode = GameMode::ClanDuo;
            let capacity = self.inner.registry.mode_config(mode)?.capacity;
            let seated = self.inner.registry.slot_members(mode, slot)?;
            if seated.iter().any(|member| member.clan_id == Some(clan.id)) {
                return Err(MatchmakingError::ClanAlreadyInSlot {
                    clan_id: clan.id,
                    mode,
                    slot,
                }
                .into());
            }
            if capacity.saturating_sub(seated.len()) < 2 {
                return Err(MatchmakingError::SlotFull { mode, slot }.into());
            }
        }

        let expired = self.inner.registry.add_invite(ClanInvite {
            inviter: inviter.to_string(),
            invitee: invitee.to_string(),
            clan_id: clan.id,
            target,
            created_at: Utc::now(),
        })?;
        info!(
            "Player {} invited clanmate {} ({:?})",
            inviter, invitee, target
        );

        let mut prompts: Vec<Prompt> = expired
            .into_iter()
            .map(|invite| {
                Prompt::new(
                    invite.inviter.clone(),
                    PromptContent::InviteExpired {
                        inviter: invite.inviter,
                        invitee: invite.invitee,
                    },
                )
            })
            .collect();
        prompts.push(Prompt::new(
            invitee,
            PromptContent::ClanInvite {
                inviter: inviter.to_string(),
                target,
            },
        ));
        self.deliver(prompts).await;
        Ok(())
    }

    /// Answer a pending clan invite
    pub async fn respond_invite(
        &self,
        invitee: &str,
        inviter: &str,
        accept: bool,
    ) -> Result<InviteResolution> {
        let invite = match self.inner.registry.take_invite(inviter, invitee, Utc::now()) {
            Ok(invite) => invite,
            Err(e) => {
                if let Some(MatchmakingError::InviteExpired { .. }) =
                    e.downcast_ref::<MatchmakingError>()
                {
                    self.deliver(vec![Prompt::new(
                        inviter,
                        PromptContent::InviteExpired {
                            inviter: inviter.to_string(),
                            invitee: invitee.to_string(),
                        },
                    )])
                    .await;
                }
                return Err(e);
            }
        };
        if !accept {
            self.deliver(vec![Prompt::new(
                inviter,
                PromptContent::InviteDeclined {
                    invitee: invitee.to_string(),
                },
            )])
            .await;
            return Ok(InviteResolution::Declined);
        }

        self.ensure_eligible(inviter).await?;
        self.ensure_eligible(invitee).await?;

        match invite.target {
            InviteTarget::Slot { slot } => {
                let outcome = self.inner.registry.join_pair(
                    GameMode::ClanDuo,
                    slot,
                    SlotMember::new(inviter).with_clan(invite.clan_id),
                    SlotMember::new(invitee).with_clan(invite.clan_id),
                )?;
                self.after_seating(
                    &outcome,
                    inviter,
                    &[inviter.to_string(), invitee.to_string()],
                )
                .await?;
                Ok(InviteResolution::Seated(outcome))
            }
            InviteTarget::ClanQueue => {
                let outcome = self
                    .enqueue_clan(
                        invite.clan_id,
                        vec![inviter.to_string(), invitee.to_string()],
                    )
                    .await?;
                Ok(InviteResolution::Queued(outcome))
            }
        }
    }

    /// Current lobby membership of a player
    pub fn membership(&self, player_id: &str) -> Result<Option<Membership>> {
        self.inner.registry.membership(player_id)
    }

    /// Persist the seats just taken and start confirmation if the slot
    /// filled. A seat that cannot be stored is given back.
    async fn after_seating(
        &self,
        outcome: &JoinOutcome,
        joiner: &str,
        seated: &[PlayerId],
    ) -> Result<()> {
        match outcome {
            JoinOutcome::Entered {
                mode,
                slot,
                occupancy,
                capacity,
            } => {
                if let Err(e) = self.persist_slot(*mode, *slot).await {
                    warn!(
                        "Could not store seats of slot {} of mode {}, undoing join of {:?}: {}",
                        slot, mode, seated, e
                    );
                    if let Err(undo) = self.inner.registry.leave(joiner, *mode, *slot) {
                        warn!("Join of {} could not be undone: {}", joiner, undo);
                    }
                    return Err(e);
                }
                let prompts = seated
                    .iter()
                    .map(|id| {
                        Prompt::new(
                            id.clone(),
                            PromptContent::SlotJoined {
                                mode: *mode,
                                slot: *slot,
                                occupancy: *occupancy,
                                capacity: *capacity,
                            },
                        )
                    })
                    .collect();
                self.deliver(prompts).await;
                Ok(())
            }
            JoinOutcome::Promoted(promotion) => {
                let started = self.start_confirmation(promotion.clone()).await;
                // The match record goes first; recovery skips players it holds
                self.persist_slot_or_warn(promotion.mode, promotion.slot)
                    .await;
                started.map(|_| ())
            }
        }
    }

    /// Store the current seats of a slot
    pub(super) async fn persist_slot(&self, mode: GameMode, slot: usize) -> Result<()> {
        let snapshot = self.inner.registry.snapshot(mode, slot)?;
        self.inner.matches.save_slot(&snapshot).await
    }

    /// Store the current seats of a slot after the change already took effect
    pub(super) async fn persist_slot_or_warn(&self, mode: GameMode, slot: usize) {
        if let Err(e) = self.persist_slot(mode, slot).await {
            warn!(
                "Seats of slot {} of mode {} not stored, a restart may lose them: {}",
                slot, mode, e
            );
        }
    }
}
