//! Session lookup and restart recovery
//!
//! Every open match has a durable record. On start-up the engine rebuilds
//! sessions from those records and re-arms their timers with whatever budget
//! was left when the process went down. Lobby seats are stored per slot and
//! are given back once the matches hold their players again.

use super::{MatchEngine, SessionHandle};
use crate::error::{MatchmakingError, Result};
use crate::matches::{MatchSession, PendingMatch, Session};
use crate::roster::MatchRecord;
use crate::types::{MatchId, MatchStatus};
use crate::utils::remaining_budget;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Where a match currently lives
#[derive(Debug, Clone, PartialEq)]
pub enum MatchLookup {
    Live(Session),
    /// Only the durable record is left
    Closed(MatchRecord),
}

/// Summary of a recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub pending: usize,
    pub active: usize,
    pub failed: usize,
    /// Players put back into their lobby slot
    pub seats: usize,
}

impl RecoveryReport {
    pub fn recovered(&self) -> usize {
        self.pending + self.active
    }
}

impl MatchEngine {
    /// Handle of a live session.
    ///
    /// An open match that is not in memory yet is rebuilt from its record
    /// first; a closed match reports its final status.
    pub(super) async fn live_handle(&self, match_id: MatchId) -> Result<SessionHandle> {
        if let Ok(handle) = self.handle(match_id) {
            return Ok(handle);
        }
        match self.inner.matches.load_match(match_id).await? {
            Some(record) if record.status.is_closed() => Err(MatchmakingError::MatchClosed {
                match_id,
                status: record.status.to_string(),
            }
            .into()),
            Some(record) => {
                info!("Match {} touched before recovery, rebuilding it", match_id);
                let (handle, _) = self.restore(&record)?;
                Ok(handle)
            }
            None => Err(MatchmakingError::MatchNotFound { match_id }.into()),
        }
    }

    /// Find a match in memory or, failing that, in the match store
    pub async fn lookup(&self, match_id: MatchId) -> Result<MatchLookup> {
        if let Some(session) = self.snapshot(match_id).await {
            return Ok(match session {
                Session::Closed(record) => MatchLookup::Closed(record),
                live => MatchLookup::Live(live),
            });
        }
        match self.live_handle(match_id).await {
            Ok(handle) => {
                let session = handle.lock().await.clone();
                Ok(match session {
                    Session::Closed(record) => MatchLookup::Closed(record),
                    live => MatchLookup::Live(live),
                })
            }
            Err(e) => match e.downcast_ref::<MatchmakingError>() {
                Some(MatchmakingError::MatchClosed { .. }) => self
                    .inner
                    .matches
                    .load_match(match_id)
                    .await?
                    .map(MatchLookup::Closed)
                    .ok_or_else(|| MatchmakingError::MatchNotFound { match_id }.into()),
                _ => Err(e),
            },
        }
    }

    /// Rebuild every open match from the store and re-arm its timer
    pub async fn recover_open_matches(&self) -> Result<RecoveryReport> {
        let records = self.inner.matches.open_matches().await?;
        let mut report = RecoveryReport::default();

        for record in records {
            let match_id = record.match_id;
            if self.handle(match_id).is_ok() {
                continue;
            }
            match self.restore(&record) {
                Ok((_, false)) => {}
                Ok((_, true)) if record.status == MatchStatus::Pending => report.pending += 1,
                Ok((_, true)) => report.active += 1,
                Err(e) => {
                    warn!("Could not recover match {}: {}", match_id, e);
                    report.failed += 1;
                }
            }
        }

        for snapshot in self.inner.matches.occupied_slots().await? {
            match self.inner.registry.restore_slot(&snapshot) {
                Ok(seated) => report.seats += seated.len(),
                Err(e) => warn!(
                    "Could not restore slot {} of mode {}: {}",
                    snapshot.slot, snapshot.mode, e
                ),
            }
        }

        info!(
            "Recovered {} open matches ({} pending, {} active, {} failed) and {} lobby seats",
            report.recovered(),
            report.pending,
            report.active,
            report.failed,
            report.seats
        );
        Ok(report)
    }

    /// Rebuild a session from its record and arm the timer with the budget
    /// left. Returns false when another caller restored it first.
    fn restore(&self, record: &MatchRecord) -> Result<(SessionHandle, bool)> {
        let now = Utc::now();
        let session = match record.status {
            MatchStatus::Pending => Session::Pending(PendingMatch::from_record(record)),
            MatchStatus::Active | MatchStatus::Disputed => {
                Session::Active(MatchSession::from_record(record)?)
            }
            status => {
                return Err(MatchmakingError::MatchClosed {
                    match_id: record.match_id,
                    status: status.to_string(),
                }
                .into())
            }
        };

        let timer = session.timer_key().map(|key| {
            let delay = match &session {
                Session::Pending(pending) if pending.expired => Duration::ZERO,
                Session::Pending(_) => remaining_budget(
                    record.created_at,
                    self.inner.settings.confirm_timeout(),
                    now,
                ),
                _ => remaining_budget(
                    record.last_action_at,
                    self.inner.settings.turn_timeout(),
                    now,
                ),
            };
            (key, delay)
        });
        let players = session.player_ids();

        let (handle, adopted) = self.adopt_session(session)?;
        if adopted {
            self.inner.registry.engage(&players)?;
            if let Some((key, delay)) = timer {
                self.schedule_timer(key, delay);
            }
        }
        Ok((handle, adopted))
    }
}
