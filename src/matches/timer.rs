//! Cancellable single-shot timers
//!
//! Each match owns at most one pending timer, keyed by a [`TimerKey`]
//! fingerprint of (match, phase, turn). Scheduling a new timer for a match
//! aborts the previous one. The firing callback must still compare the key
//! with the live session, since an action can land at the expiry instant.

use crate::types::{MatchId, PhaseKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Fingerprint of the state a timer was scheduled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerKey {
    pub match_id: MatchId,
    pub phase: PhaseKind,
    pub turn: u32,
}

impl TimerKey {
    pub fn new(match_id: MatchId, phase: PhaseKind, turn: u32) -> Self {
        Self {
            match_id,
            phase,
            turn,
        }
    }

    pub fn confirmation(match_id: MatchId) -> Self {
        Self::new(match_id, PhaseKind::Confirmation, 0)
    }
}

impl std::fmt::Display for TimerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.match_id, self.phase, self.turn)
    }
}

type TimerSlots = HashMap<MatchId, (TimerKey, JoinHandle<()>)>;

/// Registry of live timer tasks
#[derive(Debug, Default, Clone)]
pub struct TimerRegistry {
    slots: Arc<Mutex<TimerSlots>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` after `delay`, replacing any timer the match already has
    pub fn schedule<F>(&self, key: TimerKey, delay: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(mut guard) = self.slots.lock() else {
            return;
        };
        let slots = self.slots.clone();
        // Spawned under the lock so the task cannot detach before it is registered
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach before firing so a reschedule from inside `fire`
            // does not abort this task
            if let Ok(mut slots) = slots.lock() {
                if slots.get(&key.match_id).map(|(k, _)| *k) == Some(key) {
                    slots.remove(&key.match_id);
                }
            }
            fire.await;
        });

        if let Some((previous, handle)) = guard.insert(key.match_id, (key, handle)) {
            debug!("Replacing timer {} with {}", previous, key);
            handle.abort();
        }
    }

    /// Abort the match's pending timer, if any
    pub fn cancel(&self, match_id: MatchId) -> Option<TimerKey> {
        let mut slots = self.slots.lock().ok()?;
        let (key, handle) = slots.remove(&match_id)?;
        handle.abort();
        debug!("Cancelled timer {}", key);
        Some(key)
    }

    /// Key of the match's pending timer
    pub fn pending(&self, match_id: MatchId) -> Option<TimerKey> {
        let slots = self.slots.lock().ok()?;
        slots.get(&match_id).map(|(key, _)| *key)
    }

    /// Number of pending timers
    pub fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every timer, used on shutdown
    pub fn cancel_all(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            for (_, (_, handle)) in slots.drain() {
                handle.abort();
            }
        }
    }
}
