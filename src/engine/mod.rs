//! Matchmaking engine
//!
//! [`MatchEngine`] ties the lobby registry, the per-match sessions, the
//! timers and the external stores together. It is cheap to clone; every
//! clone shares the same state.
//!
//! Each session sits behind its own async lock. Operations mutate a copy of
//! the session, persist it and only then swap it in, so the in-memory phase
//! never runs ahead of the durable record. Prompts are collected while the
//! lock is held and delivered after it is released.

mod clan;
mod confirmation;
mod finalization;
mod lobby_ops;
mod recovery;
mod turns;

pub use lobby_ops::InviteResolution;
pub use recovery::{MatchLookup, RecoveryReport};

use crate::amqp::MessagingGateway;
use crate::config::{validate_matchmaking, MatchmakingSettings};
use crate::error::{classify, ErrorClass, MatchmakingError, Result};
use crate::lobby::{LobbyRegistry, ModeProvider, RegistryStats};
use crate::matches::{MatchSession, Session, TimerKey, TimerRegistry};
use crate::metrics::MetricsCollector;
use crate::roster::{MatchStore, RosterStore};
use crate::types::{
    GameMode, GatewayRequest, MatchAction, MatchId, PhaseKind, PlayerId, Prompt, PromptContent,
    Side,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Delay before a timer whose handler hit a store failure runs again
const PERSISTENCE_RETRY_DELAY: Duration = Duration::from_secs(5);

type SessionHandle = Arc<AsyncMutex<Session>>;

/// What a timer firing did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The fingerprint no longer matched; nothing changed
    Stale,
    Fired,
}

/// Engine counters and gauges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub pending_matches: usize,
    pub active_matches: usize,
    pub pending_timers: usize,
    pub promotions: u64,
    pub confirmation_timeouts: u64,
    pub auto_actions: u64,
    pub stale_timers: u64,
    pub settlements: u64,
    pub cancellations: u64,
    pub rejected_requests: u64,
    pub delivery_failures: u64,
    pub registry: RegistryStats,
}

#[derive(Debug, Default)]
struct EngineCounters {
    promotions: AtomicU64,
    confirmation_timeouts: AtomicU64,
    auto_actions: AtomicU64,
    stale_timers: AtomicU64,
    settlements: AtomicU64,
    cancellations: AtomicU64,
    rejected_requests: AtomicU64,
    delivery_failures: AtomicU64,
}

struct EngineInner {
    settings: MatchmakingSettings,
    registry: LobbyRegistry,
    roster: Arc<dyn RosterStore>,
    matches: Arc<dyn MatchStore>,
    gateway: Arc<dyn MessagingGateway>,
    sessions: RwLock<HashMap<MatchId, SessionHandle>>,
    timers: TimerRegistry,
    rng: Mutex<StdRng>,
    metrics: Option<Arc<MetricsCollector>>,
    counters: EngineCounters,
}

/// The matchmaking engine
#[derive(Clone)]
pub struct MatchEngine {
    inner: Arc<EngineInner>,
}

impl MatchEngine {
    pub fn new(
        settings: MatchmakingSettings,
        modes: &dyn ModeProvider,
        roster: Arc<dyn RosterStore>,
        matches: Arc<dyn MatchStore>,
        gateway: Arc<dyn MessagingGateway>,
    ) -> Result<Self> {
        validate_matchmaking(&settings).map_err(|e| MatchmakingError::ConfigurationError {
            message: e.to_string(),
        })?;
        let registry = LobbyRegistry::new(modes)?.with_invite_ttl(settings.invite_ttl());

        Ok(Self {
            inner: Arc::new(EngineInner {
                settings,
                registry,
                roster,
                matches,
                gateway,
                sessions: RwLock::new(HashMap::new()),
                timers: TimerRegistry::new(),
                rng: Mutex::new(StdRng::from_entropy()),
                metrics: None,
                counters: EngineCounters::default(),
            }),
        })
    }

    /// Attach a metrics collector; must be called before the engine is cloned
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.metrics = Some(metrics);
        } else {
            warn!("Engine already shared, metrics collector not attached");
        }
        self
    }

    /// Replace the random source with a seeded one
    pub fn reseed(&self, seed: u64) {
        if let Ok(mut rng) = self.inner.rng.lock() {
            *rng = StdRng::seed_from_u64(seed);
        }
    }

    pub fn settings(&self) -> &MatchmakingSettings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &LobbyRegistry {
        &self.inner.registry
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.inner.timers
    }

    /// Copy of a live session
    pub async fn snapshot(&self, match_id: MatchId) -> Option<Session> {
        let handle = self.handle(match_id).ok()?;
        let guard = handle.lock().await;
        Some(guard.clone())
    }

    /// Ids of every live session
    pub fn live_matches(&self) -> Vec<MatchId> {
        let mut ids: Vec<MatchId> = self
            .inner
            .sessions
            .read()
            .map(|sessions| sessions.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        let handles: Vec<SessionHandle> = self
            .inner
            .sessions
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire session map lock".to_string(),
            })?
            .values()
            .cloned()
            .collect();

        let mut stats = EngineStats {
            registry: self.inner.registry.stats()?,
            pending_timers: self.inner.timers.len(),
            ..EngineStats::default()
        };
        for handle in handles {
            match &*handle.lock().await {
                Session::Pending(_) => stats.pending_matches += 1,
                Session::Active(_) => stats.active_matches += 1,
                Session::Closed(_) => {}
            }
        }

        let counters = &self.inner.counters;
        stats.promotions = counters.promotions.load(Ordering::Relaxed);
        stats.confirmation_timeouts = counters.confirmation_timeouts.load(Ordering::Relaxed);
        stats.auto_actions = counters.auto_actions.load(Ordering::Relaxed);
        stats.stale_timers = counters.stale_timers.load(Ordering::Relaxed);
        stats.settlements = counters.settlements.load(Ordering::Relaxed);
        stats.cancellations = counters.cancellations.load(Ordering::Relaxed);
        stats.rejected_requests = counters.rejected_requests.load(Ordering::Relaxed);
        stats.delivery_failures = counters.delivery_failures.load(Ordering::Relaxed);

        if let Some(metrics) = &self.inner.metrics {
            metrics.update_from_engine_stats(&stats);
        }
        Ok(stats)
    }

    /// Route an inbound gateway request.
    ///
    /// Validation failures are answered with a rejection prompt and races are
    /// dropped; only persistence and internal failures surface as errors.
    pub async fn handle_request(&self, request: GatewayRequest) -> Result<()> {
        let started = Instant::now();
        let player_id = request.player_id().to_string();
        let operation = request_operation(&request);

        let result = match request {
            GatewayRequest::Join {
                player_id,
                mode,
                slot,
            } => self.join(&player_id, mode, slot).await.map(|_| ()),
            GatewayRequest::Leave {
                player_id,
                mode,
                slot,
            } => self.leave(&player_id, mode, slot).await.map(|_| ()),
            GatewayRequest::InviteClanmate {
                inviter,
                invitee,
                target,
            } => self.invite_clanmate(&inviter, &invitee, target).await,
            GatewayRequest::RespondInvite {
                invitee,
                inviter,
                accept,
            } => self
                .respond_invite(&invitee, &inviter, accept)
                .await
                .map(|_| ()),
            GatewayRequest::WithdrawClanQueue { player_id } => {
                self.withdraw_clan_queue(&player_id).await
            }
            GatewayRequest::Action {
                player_id,
                match_id,
                action,
            } => self.act(&player_id, match_id, action).await,
            GatewayRequest::SubmitResult { match_id, evidence } => {
                self.accept_result(match_id, evidence).await
            }
            GatewayRequest::Admin { admin_id, command } => {
                self.run_admin_command(&admin_id, command).await
            }
        };

        if let Some(metrics) = &self.inner.metrics {
            metrics.record_operation(operation, started.elapsed());
        }

        match result {
            Ok(()) => Ok(()),
            Err(e) => match classify(&e) {
                ErrorClass::Validation => {
                    let reason = e
                        .downcast_ref::<MatchmakingError>()
                        .map(MatchmakingError::reason)
                        .unwrap_or("other");
                    debug!("Rejected {} from {}: {}", operation, player_id, e);
                    if let Some(metrics) = &self.inner.metrics {
                        metrics.record_rejection(reason);
                    }
                    self.reject(&player_id, &e.to_string()).await;
                    Ok(())
                }
                ErrorClass::Race => {
                    debug!("Dropped late {} from {}: {}", operation, player_id, e);
                    Ok(())
                }
                _ => Err(e),
            },
        }
    }

    /// Answer a request that will not be served
    pub async fn reject(&self, player_id: &str, reason: &str) {
        self.inner
            .counters
            .rejected_requests
            .fetch_add(1, Ordering::Relaxed);
        self.deliver(vec![Prompt::new(
            player_id,
            PromptContent::Rejected {
                reason: reason.to_string(),
            },
        )])
        .await;
    }

    /// Abort every pending timer
    pub fn shutdown(&self) {
        self.inner.timers.cancel_all();
        info!("Matchmaking engine stopped");
    }

    // Shared plumbing used by the operation modules

    fn handle(&self, match_id: MatchId) -> Result<SessionHandle> {
        self.inner
            .sessions
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire session map lock".to_string(),
            })?
            .get(&match_id)
            .cloned()
            .ok_or_else(|| MatchmakingError::MatchNotFound { match_id }.into())
    }

    fn insert_session(&self, session: Session) -> Result<()> {
        let match_id = session.match_id();
        self.inner
            .sessions
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire session map lock".to_string(),
            })?
            .insert(match_id, Arc::new(AsyncMutex::new(session)));
        Ok(())
    }

    /// Insert a rebuilt session unless one is already live under its id
    fn adopt_session(&self, session: Session) -> Result<(SessionHandle, bool)> {
        let match_id = session.match_id();
        let mut sessions =
            self.inner
                .sessions
                .write()
                .map_err(|_| MatchmakingError::InternalError {
                    message: "Failed to acquire session map lock".to_string(),
                })?;
        if let Some(existing) = sessions.get(&match_id) {
            return Ok((existing.clone(), false));
        }
        let handle: SessionHandle = Arc::new(AsyncMutex::new(session));
        sessions.insert(match_id, handle.clone());
        Ok((handle, true))
    }

    fn remove_session(&self, match_id: MatchId) {
        if let Ok(mut sessions) = self.inner.sessions.write() {
            sessions.remove(&match_id);
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> Result<T> {
        let mut rng = self
            .inner
            .rng
            .lock()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire random source lock".to_string(),
            })?;
        Ok(f(&mut rng))
    }

    /// Arm the match timer; the firing path re-checks the fingerprint
    fn schedule_timer(&self, key: TimerKey, delay: Duration) {
        let engine = self.clone();
        debug!("Scheduling timer {} in {:?}", key, delay);
        self.inner.timers.schedule(key, delay, async move {
            if let Err(e) = engine.on_timer(key).await {
                if classify(&e) == ErrorClass::Persistence {
                    warn!("Timer {} failed to persist, retrying: {}", key, e);
                    engine.schedule_timer(key, PERSISTENCE_RETRY_DELAY);
                } else {
                    warn!("Timer {} failed: {}", key, e);
                }
            }
        });
    }

    /// Dispatch a fired timer to its phase handler
    pub async fn on_timer(&self, key: TimerKey) -> Result<TimerOutcome> {
        let outcome = match key.phase {
            PhaseKind::Confirmation => self.on_confirmation_timeout(key).await?,
            PhaseKind::SideChoice | PhaseKind::Pick | PhaseKind::Ban => {
                self.on_turn_timeout(key).await?
            }
            PhaseKind::Finished => TimerOutcome::Stale,
        };

        if outcome == TimerOutcome::Stale {
            debug!("Timer {} is stale, ignoring", key);
            self.inner
                .counters
                .stale_timers
                .fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_stale_timer();
            }
        }
        Ok(outcome)
    }

    /// Best-effort delivery; one failed recipient never blocks the rest
    async fn deliver(&self, prompts: Vec<Prompt>) {
        for prompt in prompts {
            if let Err(e) = self.inner.gateway.prompt(&prompt).await {
                warn!("Failed to deliver prompt to {}: {}", prompt.player_id, e);
                self.inner
                    .counters
                    .delivery_failures
                    .fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_delivery_failure();
                }
            }
        }
    }

    /// Admins that are not already among the recipients
    fn admin_recipients(&self, participants: &[PlayerId]) -> Vec<PlayerId> {
        self.inner
            .settings
            .admins
            .iter()
            .filter(|admin| !participants.contains(admin))
            .cloned()
            .collect()
    }

    fn count_cancellation(&self, reason: &str) {
        self.inner
            .counters
            .cancellations
            .fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_cancellation(reason);
        }
    }
}

fn request_operation(request: &GatewayRequest) -> &'static str {
    match request {
        GatewayRequest::Join { .. } => "join",
        GatewayRequest::Leave { .. } => "leave",
        GatewayRequest::InviteClanmate { .. } => "invite_clanmate",
        GatewayRequest::RespondInvite { .. } => "respond_invite",
        GatewayRequest::WithdrawClanQueue { .. } => "withdraw_clan_queue",
        GatewayRequest::Action { .. } => "act",
        GatewayRequest::SubmitResult { .. } => "accept_result",
        GatewayRequest::Admin { .. } => "admin",
    }
}

/// Prompts announcing the current phase of an active match
fn phase_prompts(session: &MatchSession, turn_timeout: Duration, admins: &[PlayerId]) -> Vec<Prompt> {
    let timeout_secs = turn_timeout.as_secs();
    let match_id = session.match_id;

    if session.phase == PhaseKind::Finished {
        let content = PromptContent::MatchReady {
            mode: session.mode,
            side_a: session.roster(Side::A),
            side_b: session.roster(Side::B),
            map: session.picked_map().unwrap_or_default().to_string(),
            stake: session.stake,
        };
        return session
            .player_ids()
            .into_iter()
            .chain(admins.iter().cloned())
            .map(|recipient| Prompt::new(recipient, content.clone()).for_match(match_id))
            .collect();
    }

    let Some(holder) = session.turn_holder().cloned() else {
        return Vec::new();
    };

    let (content, actions) = match session.phase {
        PhaseKind::SideChoice => (
            PromptContent::ChooseSide { timeout_secs },
            vec![
                MatchAction::ChooseSide { side: Side::A },
                MatchAction::ChooseSide { side: Side::B },
            ],
        ),
        PhaseKind::Pick => {
            let available: Vec<PlayerId> = session
                .draft
                .as_ref()
                .map(|draft| draft.available().to_vec())
                .unwrap_or_default();
            let actions = available
                .iter()
                .map(|player_id| MatchAction::Pick {
                    player_id: player_id.clone(),
                })
                .collect();
            (
                PromptContent::PickPlayer {
                    available,
                    timeout_secs,
                },
                actions,
            )
        }
        _ => {
            let remaining: Vec<String> = session
                .veto
                .as_ref()
                .map(|veto| veto.remaining())
                .unwrap_or_default();
            let actions = remaining
                .iter()
                .map(|map| MatchAction::Ban { map: map.clone() })
                .collect();
            (
                PromptContent::BanMap {
                    remaining,
                    timeout_secs,
                },
                actions,
            )
        }
    };

    let waiting = PromptContent::WaitingForTurn {
        turn_holder: holder.clone(),
        phase: session.phase,
    };
    session
        .player_ids()
        .into_iter()
        .map(|recipient| {
            if recipient == holder {
                Prompt::new(recipient, content.clone())
                    .for_match(match_id)
                    .with_actions(actions.clone())
            } else {
                Prompt::new(recipient, waiting.clone()).for_match(match_id)
            }
        })
        .collect()
}

/// Stake range and map pool of a mode, drawn once on entry to draft or veto
fn draw_stake(engine: &MatchEngine, mode: GameMode) -> Result<(i64, Vec<String>)> {
    let config = engine.inner.registry.mode_config(mode)?;
    let range = config.stake_range();
    let pool = config.map_pool.clone();
    let stake = engine.with_rng(|rng| rand::Rng::gen_range(rng, range))?;
    Ok((stake, pool))
}
