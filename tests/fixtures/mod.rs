//! Shared setup for the integration tests: an engine wired to in-memory
//! stores and a recording gateway, plus helpers to walk a match through its
//! phases.

#![allow(dead_code)]

use scrim_room::amqp::{MessagingGateway, MockGateway};
use scrim_room::config::MatchmakingSettings;
use scrim_room::lobby::StaticModeProvider;
use scrim_room::matches::{MatchSession, Session};
use scrim_room::roster::{InMemoryMatchStore, InMemoryRosterStore};
use scrim_room::types::{Clan, ClanId, MatchId, PhaseKind, Player, PromptContent, Side};
use scrim_room::MatchEngine;
use std::sync::Arc;

/// Seed used for every engine built by the fixtures
pub const TEST_SEED: u64 = 7;

/// Engine plus handles on everything it talks to
pub struct TestSystem {
    pub engine: MatchEngine,
    pub roster: Arc<InMemoryRosterStore>,
    pub matches: Arc<InMemoryMatchStore>,
    pub gateway: Arc<MockGateway>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_settings(MatchmakingSettings::default())
    }

    pub fn with_settings(settings: MatchmakingSettings) -> Self {
        let roster = Arc::new(InMemoryRosterStore::new());
        let matches = Arc::new(InMemoryMatchStore::new());
        let gateway = Arc::new(MockGateway::new());
        let engine = build_engine(settings, roster.clone(), matches.clone(), gateway.clone());
        Self {
            engine,
            roster,
            matches,
            gateway,
        }
    }

    /// A second engine over the same stores, as after a restart
    pub fn restarted(&self) -> MatchEngine {
        self.engine.shutdown();
        build_engine(
            self.engine.settings().clone(),
            self.roster.clone(),
            self.matches.clone(),
            self.gateway.clone(),
        )
    }

    pub fn add_players(&self, ids: &[&str]) {
        for id in ids {
            self.roster
                .add_player(Player::new(*id, format!("Player {}", id)))
                .expect("Failed to add player");
        }
    }

    /// Register a clan together with its member accounts
    pub fn add_clan(&self, clan_id: ClanId, name: &str, members: &[&str]) {
        self.add_players(members);
        let mut clan = Clan::new(clan_id, name);
        clan.members = members.iter().map(|m| m.to_string()).collect();
        self.roster.add_clan(clan).expect("Failed to add clan");
    }

    /// Whether the player received a prompt matching `predicate`
    pub fn received(&self, player_id: &str, predicate: impl Fn(&PromptContent) -> bool) -> bool {
        self.gateway
            .prompts_for(player_id)
            .iter()
            .any(|prompt| predicate(&prompt.content))
    }
}

pub fn build_engine(
    settings: MatchmakingSettings,
    roster: Arc<InMemoryRosterStore>,
    matches: Arc<InMemoryMatchStore>,
    gateway: Arc<dyn MessagingGateway>,
) -> MatchEngine {
    let engine = MatchEngine::new(settings, &StaticModeProvider::new(), roster, matches, gateway)
        .expect("Failed to build engine");
    engine.reseed(TEST_SEED);
    engine
}

/// The only live match of the engine
pub fn single_match(engine: &MatchEngine) -> MatchId {
    let live = engine.live_matches();
    assert_eq!(live.len(), 1, "expected exactly one live match, got {:?}", live);
    live[0]
}

/// Active session of a live match
pub async fn active(engine: &MatchEngine, match_id: MatchId) -> MatchSession {
    match engine.snapshot(match_id).await {
        Some(Session::Active(session)) => session,
        other => panic!("match {} is not active: {:?}", match_id, other),
    }
}

/// Accept on behalf of every listed player
pub async fn accept_all(engine: &MatchEngine, match_id: MatchId, players: &[&str]) {
    for player in players {
        engine
            .accept(player, match_id)
            .await
            .expect("Failed to accept");
    }
}

/// Choose side A if a side choice is pending, then draft in pool order
pub async fn run_draft(engine: &MatchEngine, match_id: MatchId) {
    loop {
        let session = active(engine, match_id).await;
        match session.phase {
            PhaseKind::SideChoice => {
                let chooser = session.turn_holder().cloned().expect("no side chooser");
                engine
                    .choose_side(&chooser, match_id, Side::A)
                    .await
                    .expect("Failed to choose side");
            }
            PhaseKind::Pick => {
                let captain = session.turn_holder().cloned().expect("no captain on turn");
                let target = session
                    .draft
                    .as_ref()
                    .and_then(|draft| draft.available().first().cloned())
                    .expect("empty draft pool");
                engine
                    .pick(&captain, match_id, &target)
                    .await
                    .expect("Failed to pick");
            }
            _ => return,
        }
    }
}

/// Ban the first remaining map until one map is left
pub async fn run_veto(engine: &MatchEngine, match_id: MatchId) -> String {
    loop {
        let session = active(engine, match_id).await;
        if session.phase == PhaseKind::Finished {
            return session
                .picked_map()
                .map(str::to_string)
                .expect("finished without a map");
        }
        let holder = session.turn_holder().cloned().expect("no banner on turn");
        let map = session
            .veto
            .as_ref()
            .and_then(|veto| veto.remaining().first().cloned())
            .expect("empty veto pool");
        engine
            .ban(&holder, match_id, &map)
            .await
            .expect("Failed to ban");
    }
}
