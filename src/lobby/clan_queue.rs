//! Clan queue
//!
//! First-in first-out pairing at clan granularity. A clan holds at most one
//! entry; a new entry is paired with the oldest waiting clan when there is one.

use crate::error::{MatchmakingError, Result};
use crate::types::{ClanId, PlayerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A clan pair waiting for an opponent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClanQueueEntry {
    pub clan_id: ClanId,
    pub players: Vec<PlayerId>,
    pub queued_at: DateTime<Utc>,
}

impl ClanQueueEntry {
    pub fn new(clan_id: ClanId, players: Vec<PlayerId>) -> Self {
        Self {
            clan_id,
            players,
            queued_at: Utc::now(),
        }
    }
}

/// Result of queueing a clan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClanQueueOutcome {
    /// No opponent yet; `waiting` entries are queued including this one
    Waiting { waiting: usize },
    /// Paired with the oldest waiting clan
    Paired {
        opponent: ClanQueueEntry,
        entry: ClanQueueEntry,
    },
}

#[derive(Debug, Default)]
pub struct ClanQueue {
    entries: VecDeque<ClanQueueEntry>,
}

impl ClanQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, clan_id: ClanId) -> bool {
        self.entries.iter().any(|e| e.clan_id == clan_id)
    }

    /// Queue a clan, pairing it with the oldest entry if one waits
    pub fn enqueue(&mut self, entry: ClanQueueEntry) -> Result<ClanQueueOutcome> {
        if self.contains(entry.clan_id) {
            return Err(MatchmakingError::ClanAlreadyQueued {
                clan_id: entry.clan_id,
            }
            .into());
        }

        match self.entries.pop_front() {
            Some(opponent) => Ok(ClanQueueOutcome::Paired { opponent, entry }),
            None => {
                self.entries.push_back(entry);
                Ok(ClanQueueOutcome::Waiting {
                    waiting: self.entries.len(),
                })
            }
        }
    }

    /// Withdraw a clan's own entry
    pub fn withdraw(&mut self, clan_id: ClanId) -> Result<ClanQueueEntry> {
        let position = self
            .entries
            .iter()
            .position(|e| e.clan_id == clan_id)
            .ok_or(MatchmakingError::ClanNotQueued { clan_id })?;
        self.entries
            .remove(position)
            .ok_or_else(|| MatchmakingError::ClanNotQueued { clan_id }.into())
    }
}
