//! Integration tests for the scrim-room matchmaking engine
//!
//! These tests drive the engine end to end over in-memory stores:
//! - Lobby fill, confirmation, draft, veto and settlement
//! - Timer expiry for confirmation and turns
//! - Clan invites and the clan queue
//! - Restart recovery and administrative overrides
//! - Delivery failures at the gateway

mod fixtures;

use async_trait::async_trait;
use fixtures::{accept_all, active, build_engine, run_draft, run_veto, single_match, TestSystem};
use mockall::mock;
use scrim_room::amqp::MessagingGateway;
use scrim_room::config::MatchmakingSettings;
use scrim_room::error::{classify, ErrorClass, MatchmakingError};
use scrim_room::lobby::provider::{DUEL_MAP_POOL, TEAM_MAP_POOL};
use scrim_room::lobby::{ClanQueueOutcome, JoinOutcome, Membership};
use scrim_room::matches::{vip_bonus, TimerKey};
use scrim_room::roster::{InMemoryMatchStore, InMemoryRosterStore};
use scrim_room::types::{
    AdminCommand, BanState, GameMode, GatewayRequest, InviteTarget, MatchId, MatchStatus, PhaseKind, Prompt,
    PromptContent, ResultEvidence, Side,
};
use scrim_room::{InviteResolution, MatchLookup, RosterStore};
use std::sync::Arc;
use std::time::Duration;

async fn confirmed_duel(system: &TestSystem) -> MatchId {
    system.add_players(&["alice", "bob"]);
    system.engine.join("alice", GameMode::Duel, 1).await.unwrap();
    system.engine.join("bob", GameMode::Duel, 1).await.unwrap();
    let match_id = single_match(&system.engine);
    accept_all(&system.engine, match_id, &["alice", "bob"]).await;
    match_id
}

async fn finished_duel(system: &TestSystem) -> MatchId {
    let match_id = confirmed_duel(system).await;
    run_veto(&system.engine, match_id).await;
    match_id
}

fn error_of<T: std::fmt::Debug>(result: scrim_room::Result<T>) -> MatchmakingError {
    result
        .expect_err("expected an error")
        .downcast::<MatchmakingError>()
        .expect("not a matchmaking error")
}

#[tokio::test]
async fn test_duel_full_lifecycle() {
    let system = TestSystem::new();
    system.add_players(&["alice", "bob"]);
    let engine = &system.engine;

    let outcome = engine.join("alice", GameMode::Duel, 1).await.unwrap();
    assert!(matches!(
        outcome,
        JoinOutcome::Entered {
            occupancy: 1,
            capacity: 2,
            ..
        }
    ));
    assert!(system.received("alice", |c| matches!(c, PromptContent::SlotJoined { .. })));

    let outcome = engine.join("bob", GameMode::Duel, 1).await.unwrap();
    assert!(matches!(outcome, JoinOutcome::Promoted(_)));

    let match_id = single_match(engine);
    assert!(system.received("alice", |c| matches!(c, PromptContent::ConfirmMatch { .. })));
    assert_eq!(engine.membership("alice").unwrap(), Some(Membership::Engaged));

    accept_all(engine, match_id, &["alice", "bob"]).await;
    let session = active(engine, match_id).await;
    assert_eq!(session.phase, PhaseKind::Ban);
    assert!((5..=15).contains(&session.stake));
    assert_eq!(session.side_of("alice"), Some(Side::A));
    assert_eq!(session.side_of("bob"), Some(Side::B));
    assert!(system.received("alice", |c| matches!(c, PromptContent::BanMap { .. })));

    let map = run_veto(engine, match_id).await;
    assert!(DUEL_MAP_POOL.contains(&map.as_str()));
    assert!(system.received("bob", |c| matches!(c, PromptContent::MatchReady { .. })));
    assert!(engine.timers().pending(match_id).is_none());

    let report = engine.decide_winner(match_id, Side::A).await.unwrap();
    assert!(!report.already_settled);
    assert_eq!(report.updates.len(), 2);

    let alice = system.roster.player("alice").unwrap();
    let bob = system.roster.player("bob").unwrap();
    assert_eq!(alice.rating, 1000 + session.stake);
    assert_eq!(bob.rating, 1000 - session.stake);
    assert_eq!((alice.wins, alice.matches), (1, 1));
    assert_eq!((bob.losses, bob.matches), (1, 1));
    assert!(system.received("alice", |c| matches!(c, PromptContent::Settled { winner: Side::A, .. })));

    assert_eq!(engine.membership("alice").unwrap(), None);
    assert!(engine.live_matches().is_empty());
    let record = system.matches.record(match_id).unwrap();
    assert_eq!(record.status, MatchStatus::Finished);
    assert_eq!(record.winner, Some(Side::A));
    assert_eq!(record.picked_map, Some(map));

    println!("✅ Duel lifecycle test passed");
}

#[tokio::test]
async fn test_decide_winner_is_idempotent() {
    let system = TestSystem::new();
    let match_id = finished_duel(&system).await;
    let engine = &system.engine;

    engine.decide_winner(match_id, Side::B).await.unwrap();
    let rating_after_first = system.roster.player("bob").unwrap().rating;

    let repeat = engine.decide_winner(match_id, Side::B).await.unwrap();
    assert!(repeat.already_settled);
    assert!(repeat.updates.is_empty());
    assert_eq!(system.roster.player("bob").unwrap().rating, rating_after_first);
    assert_eq!(system.roster.rating_calls().len(), 2);

    let conflict = error_of(engine.decide_winner(match_id, Side::A).await);
    assert!(matches!(conflict, MatchmakingError::ConflictingWinner { .. }));

    assert!(matches!(
        engine.lookup(match_id).await.unwrap(),
        MatchLookup::Closed(_)
    ));
}

#[tokio::test]
async fn test_decide_winner_requires_finished_setup() {
    let system = TestSystem::new();
    let match_id = confirmed_duel(&system).await;

    let error = error_of(system.engine.decide_winner(match_id, Side::A).await);
    assert!(matches!(error, MatchmakingError::MatchNotReady { .. }));

    let error = error_of(system.engine.decide_winner(9999, Side::A).await);
    assert!(matches!(error, MatchmakingError::MatchNotFound { match_id: 9999 }));
}

#[tokio::test]
async fn test_settlement_resumes_after_store_failure() {
    let system = TestSystem::new();
    let match_id = finished_duel(&system).await;
    let engine = &system.engine;

    system.roster.fail_writes_for("bob").unwrap();
    let error = engine.decide_winner(match_id, Side::A).await.unwrap_err();
    assert_eq!(classify(&error), ErrorClass::Persistence);
    assert_eq!(engine.live_matches(), vec![match_id]);

    system.roster.clear_failures().unwrap();
    let report = engine.decide_winner(match_id, Side::A).await.unwrap();
    assert!(!report.already_settled);
    assert_eq!(report.updates.len(), 1);
    assert_eq!(report.updates[0].player_id, "bob");

    let calls = system.roster.rating_calls();
    assert_eq!(calls.iter().filter(|c| c.player_id == "alice").count(), 1);
    assert_eq!(calls.iter().filter(|c| c.player_id == "bob").count(), 1);
}

#[tokio::test]
async fn test_settlement_save_failure_never_double_applies() {
    let system = TestSystem::new();
    let match_id = finished_duel(&system).await;
    let engine = &system.engine;

    // The winner is stored, the first rating write lands, its save fails
    system.matches.fail_saves_after(1);
    let error = engine.decide_winner(match_id, Side::A).await.unwrap_err();
    assert_eq!(classify(&error), ErrorClass::Persistence);
    assert_eq!(system.roster.rating_calls().len(), 1);

    system.matches.set_fail_saves(false);
    let report = engine.decide_winner(match_id, Side::A).await.unwrap();
    assert!(!report.already_settled);
    assert_eq!(report.updates.len(), 1);

    let calls = system.roster.rating_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls.iter().filter(|c| c.player_id == "alice").count(), 1);
    assert_eq!(calls.iter().filter(|c| c.player_id == "bob").count(), 1);

    let record = system.matches.record(match_id).unwrap();
    assert_eq!(record.status, MatchStatus::Finished);
    assert!(record.participants.iter().all(|p| p.settled));
}

#[tokio::test]
async fn test_clan_settlement_resumes_per_clan() {
    let system = TestSystem::new();
    system.add_clan(1, "Alpha", &["a1", "a2"]);
    system.add_clan(2, "Bravo", &["b1", "b2"]);
    let engine = &system.engine;

    for (inviter, invitee) in [("a1", "a2"), ("b1", "b2")] {
        engine
            .invite_clanmate(inviter, invitee, InviteTarget::Slot { slot: 1 })
            .await
            .unwrap();
        engine.respond_invite(invitee, inviter, true).await.unwrap();
    }
    let match_id = single_match(engine);
    accept_all(engine, match_id, &["a1", "a2", "b1", "b2"]).await;
    run_veto(engine, match_id).await;
    let stake = active(engine, match_id).await.stake;

    // Winner, four players and both clans land; the save after the last clan fails
    system.matches.fail_saves_after(6);
    assert!(engine.decide_winner(match_id, Side::A).await.is_err());
    system.matches.set_fail_saves(false);
    let report = engine.decide_winner(match_id, Side::A).await.unwrap();
    assert!(report.updates.is_empty());
    assert!(report.clans.is_empty());

    let alpha = system.roster.clan(1).unwrap();
    let bravo = system.roster.clan(2).unwrap();
    assert_eq!((alpha.rating, alpha.matches), (1000 + stake, 1));
    assert_eq!((bravo.rating, bravo.matches), (1000 - stake, 1));
    assert_eq!(system.roster.rating_calls().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout_warns_and_requeues() {
    let system = TestSystem::new();
    system.add_players(&["alice", "bob", "carol"]);
    let engine = &system.engine;

    engine.join("alice", GameMode::Duel, 1).await.unwrap();
    engine.join("bob", GameMode::Duel, 1).await.unwrap();
    let match_id = single_match(engine);
    engine.accept("alice", match_id).await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert!(engine.live_matches().is_empty());
    assert!(system.received("bob", |c| matches!(
        c,
        PromptContent::Warning {
            warnings: 1,
            threshold: 3
        }
    )));
    assert!(system.received("alice", |c| matches!(
        c,
        PromptContent::Requeued {
            mode: GameMode::Duel,
            slot: 1
        }
    )));
    assert_eq!(
        engine.membership("alice").unwrap(),
        Some(Membership::Slot {
            mode: GameMode::Duel,
            slot: 1
        })
    );
    assert_eq!(engine.membership("bob").unwrap(), None);

    let record = system.matches.record(match_id).unwrap();
    assert_eq!(record.status, MatchStatus::Cancelled);
    assert!(record.participant("bob").unwrap().left);
    assert_eq!(engine.stats().await.unwrap().confirmation_timeouts, 1);

    // Alice keeps her readiness, so the next match only waits for Carol
    engine.join("carol", GameMode::Duel, 1).await.unwrap();
    let rematch = single_match(engine);
    assert_ne!(rematch, match_id);
    engine.accept("carol", rematch).await.unwrap();
    let session = active(engine, rematch).await;
    assert!(session.is_participant("alice"));
    assert_eq!(session.phase, PhaseKind::Ban);
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout_retries_failed_warning() {
    let system = TestSystem::new();
    system.add_players(&["alice", "bob"]);
    let engine = &system.engine;

    engine.join("alice", GameMode::Duel, 1).await.unwrap();
    engine.join("bob", GameMode::Duel, 1).await.unwrap();
    let match_id = single_match(engine);
    engine.accept("alice", match_id).await.unwrap();
    system.roster.fail_writes_for("bob").unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;

    // The warning could not be stored, so the match stays open and nobody moves
    assert_eq!(engine.live_matches(), vec![match_id]);
    assert_eq!(system.roster.player("bob").unwrap().warnings, 0);
    assert_eq!(engine.membership("alice").unwrap(), Some(Membership::Engaged));
    assert_eq!(engine.stats().await.unwrap().confirmation_timeouts, 0);
    let error = error_of(engine.accept("bob", match_id).await);
    assert!(matches!(error, MatchmakingError::PhaseAdvanced { .. }));

    system.roster.clear_failures().unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(engine.live_matches().is_empty());
    assert_eq!(system.roster.player("bob").unwrap().warnings, 1);
    assert!(system.received("bob", |c| matches!(
        c,
        PromptContent::Warning {
            warnings: 1,
            threshold: 3
        }
    )));
    assert_eq!(
        engine.membership("alice").unwrap(),
        Some(Membership::Slot {
            mode: GameMode::Duel,
            slot: 1
        })
    );
    let record = system.matches.record(match_id).unwrap();
    assert_eq!(record.status, MatchStatus::Cancelled);
    assert!(record.participant("bob").unwrap().penalty.is_some());
    assert_eq!(engine.stats().await.unwrap().confirmation_timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_penalty_progress_survives_restart() {
    let system = TestSystem::new();
    system.add_players(&["alice", "bob", "carol"]);
    system.engine.join("alice", GameMode::Duo, 1).await.unwrap();
    system.engine.join("bob", GameMode::Duo, 1).await.unwrap();
    system.engine.join("carol", GameMode::Duo, 1).await.unwrap();
    system.add_players(&["dave"]);
    system.engine.join("dave", GameMode::Duo, 1).await.unwrap();
    let match_id = single_match(&system.engine);
    system.engine.accept("alice", match_id).await.unwrap();
    system.roster.fail_writes_for("carol").unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;

    // Bob's warning landed and is on the record; Carol's did not
    let record = system.matches.record(match_id).unwrap();
    assert_eq!(record.status, MatchStatus::Pending);
    assert!(record.participant("bob").unwrap().penalty.is_some());
    assert!(record.participant("carol").unwrap().penalty.is_none());

    system.roster.clear_failures().unwrap();
    let engine = system.restarted();
    engine.recover_open_matches().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(engine.live_matches().is_empty());
    for player in ["bob", "carol", "dave"] {
        assert_eq!(system.roster.player(player).unwrap().warnings, 1, "{}", player);
    }
    assert_eq!(system.roster.player("alice").unwrap().warnings, 0);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_third_no_show_is_banned() {
    let system = TestSystem::new();
    system.add_players(&["alice", "bob"]);
    let engine = &system.engine;
    system.roster.increment_warning("bob").await.unwrap();
    system.roster.increment_warning("bob").await.unwrap();

    engine.join("alice", GameMode::Duel, 1).await.unwrap();
    engine.join("bob", GameMode::Duel, 1).await.unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert!(system.received("bob", |c| matches!(c, PromptContent::Banned { .. })));
    // Neither side confirmed, so nobody is requeued
    assert_eq!(engine.membership("alice").unwrap(), None);

    let bob = system.roster.player("bob").unwrap();
    assert!(matches!(bob.ban, BanState::Until(_)));
    assert_eq!(bob.warnings, 0);

    let error = error_of(engine.join("bob", GameMode::Duel, 2).await);
    assert!(matches!(error, MatchmakingError::PlayerBanned { .. }));

    engine
        .handle_request(GatewayRequest::Join {
            player_id: "bob".to_string(),
            mode: GameMode::Duel,
            slot: 2,
        })
        .await
        .unwrap();
    assert!(system.received("bob", |c| matches!(c, PromptContent::Rejected { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_turn_timeouts_ban_automatically() {
    let system = TestSystem::new();
    let match_id = confirmed_duel(&system).await;
    let engine = &system.engine;

    tokio::time::sleep(Duration::from_secs(31)).await;
    let session = active(engine, match_id).await;
    assert_eq!(session.turn, 1);
    assert_eq!(session.veto.as_ref().unwrap().bans(), 1);
    assert!(system.received("bob", |c| matches!(
        c,
        PromptContent::TurnTaken {
            automatic: true,
            ..
        }
    )));

    tokio::time::sleep(Duration::from_secs(5 * 31)).await;
    let session = active(engine, match_id).await;
    assert_eq!(session.phase, PhaseKind::Finished);
    assert!(session.picked_map().is_some());
    assert_eq!(engine.stats().await.unwrap().auto_actions, 6);
    assert!(engine.timers().pending(match_id).is_none());
}

#[tokio::test]
async fn test_stale_timer_is_ignored() {
    let system = TestSystem::new();
    let match_id = confirmed_duel(&system).await;
    let engine = &system.engine;

    let session = active(engine, match_id).await;
    let holder = session.turn_holder().cloned().unwrap();
    engine.ban(&holder, match_id, DUEL_MAP_POOL[0]).await.unwrap();

    let outcome = engine
        .on_timer(TimerKey::new(match_id, PhaseKind::Ban, 0))
        .await
        .unwrap();
    assert_eq!(outcome, scrim_room::engine::TimerOutcome::Stale);
    let outcome = engine.on_timer(TimerKey::confirmation(match_id)).await.unwrap();
    assert_eq!(outcome, scrim_room::engine::TimerOutcome::Stale);

    let session = active(engine, match_id).await;
    assert_eq!(session.turn, 1);
    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.stale_timers, 2);
    assert_eq!(stats.confirmation_timeouts, 0);
    for player in ["alice", "bob"] {
        assert_eq!(system.roster.player(player).unwrap().warnings, 0);
        assert!(!system.received(player, |c| matches!(c, PromptContent::Warning { .. })));
    }
    assert_eq!(
        engine.timers().pending(match_id),
        Some(TimerKey::new(match_id, PhaseKind::Ban, 1))
    );
}

#[tokio::test]
async fn test_out_of_turn_actions_are_rejected() {
    let system = TestSystem::new();
    let match_id = confirmed_duel(&system).await;
    let engine = &system.engine;

    let error = error_of(engine.ban("bob", match_id, DUEL_MAP_POOL[0]).await);
    assert!(matches!(error, MatchmakingError::NotYourTurn { .. }));

    let error = error_of(engine.ban("alice", match_id, "Atlantis").await);
    assert!(matches!(error, MatchmakingError::MapUnavailable { .. }));

    let error = error_of(engine.ban("mallory", match_id, DUEL_MAP_POOL[0]).await);
    assert!(matches!(error, MatchmakingError::NotAParticipant { .. }));

    let error = error_of(engine.accept("alice", match_id).await);
    assert!(matches!(error, MatchmakingError::PhaseAdvanced { .. }));
    assert_eq!(active(engine, match_id).await.turn, 0);
}

#[tokio::test]
async fn test_duo_draft_and_veto() {
    let system = TestSystem::new();
    let players = ["d1", "d2", "d3", "d4"];
    system.add_players(&players);
    let engine = &system.engine;

    for player in players {
        engine.join(player, GameMode::Duo, 2).await.unwrap();
    }
    let match_id = single_match(engine);
    accept_all(engine, match_id, &players).await;

    let session = active(engine, match_id).await;
    assert_eq!(session.captains.len(), 2);
    assert!((20..=30).contains(&session.stake));
    // Nobody is VIP, so captains take fixed sides and drafting starts at once
    assert_eq!(session.phase, PhaseKind::Pick);

    run_draft(engine, match_id).await;
    let session = active(engine, match_id).await;
    assert_eq!(session.phase, PhaseKind::Ban);
    assert_eq!(session.roster(Side::A).len(), 2);
    assert_eq!(session.roster(Side::B).len(), 2);
    assert_ne!(
        session.side_of(&session.captains[0]),
        session.side_of(&session.captains[1])
    );

    let map = run_veto(engine, match_id).await;
    assert!(TEAM_MAP_POOL.contains(&map.as_str()));

    let report = engine.decide_winner(match_id, Side::B).await.unwrap();
    assert_eq!(report.updates.len(), 4);
    for update in &report.updates {
        let expected = if session.side_of(&update.player_id) == Some(Side::B) {
            session.stake
        } else {
            -session.stake
        };
        assert_eq!(update.delta(), expected);
    }
}

#[tokio::test]
async fn test_squad_vip_winner_gets_bonus() {
    let system = TestSystem::new();
    let players: Vec<String> = (0..10).map(|i| format!("s{}", i)).collect();
    let ids: Vec<&str> = players.iter().map(String::as_str).collect();
    system.add_players(&ids);
    system
        .roster
        .set_vip("s0", Some(chrono::Utc::now() + chrono::Duration::days(30)))
        .unwrap();
    let engine = &system.engine;

    for player in &ids {
        engine.join(player, GameMode::Squad, 1).await.unwrap();
    }
    let match_id = single_match(engine);
    accept_all(engine, match_id, &ids).await;
    run_draft(engine, match_id).await;
    run_veto(engine, match_id).await;

    let session = active(engine, match_id).await;
    assert_eq!(session.roster(Side::A).len(), 5);
    let vip_side = session.side_of("s0").unwrap();

    let report = engine.decide_winner(match_id, vip_side).await.unwrap();
    let vip_update = report
        .updates
        .iter()
        .find(|update| update.player_id == "s0")
        .unwrap();
    assert!(vip_update.delta() > session.stake);
    assert!(vip_update.delta() <= session.stake + vip_bonus(session.stake, 15));

    for update in report.updates.iter().filter(|u| u.player_id != "s0") {
        assert_eq!(update.delta().abs(), session.stake);
    }
}

#[tokio::test]
async fn test_clan_slot_match() {
    let system = TestSystem::new();
    system.add_clan(1, "Ravens", &["c1a", "c1b"]);
    system.add_clan(2, "Wolves", &["c2a", "c2b"]);
    let engine = &system.engine;

    let error = error_of(engine.join("c1a", GameMode::ClanDuo, 1).await);
    assert!(matches!(error, MatchmakingError::PairRequired { .. }));

    engine
        .invite_clanmate("c1a", "c1b", InviteTarget::Slot { slot: 1 })
        .await
        .unwrap();
    assert!(system.received("c1b", |c| matches!(c, PromptContent::ClanInvite { .. })));
    let resolution = engine.respond_invite("c1b", "c1a", true).await.unwrap();
    assert!(matches!(
        resolution,
        InviteResolution::Seated(JoinOutcome::Entered { occupancy: 2, .. })
    ));

    engine
        .invite_clanmate("c2a", "c2b", InviteTarget::Slot { slot: 1 })
        .await
        .unwrap();
    let resolution = engine.respond_invite("c2b", "c2a", true).await.unwrap();
    assert!(matches!(
        resolution,
        InviteResolution::Seated(JoinOutcome::Promoted(_))
    ));

    let match_id = single_match(engine);
    accept_all(engine, match_id, &["c1a", "c1b", "c2a", "c2b"]).await;
    let session = active(engine, match_id).await;
    assert_eq!(session.phase, PhaseKind::Ban);
    assert_eq!(session.clans, Some((1, 2)));
    assert_eq!(session.side_of("c1b"), Some(Side::A));
    assert_eq!(session.side_of("c2b"), Some(Side::B));
    assert!((25..=35).contains(&session.stake));

    run_veto(engine, match_id).await;
    let report = engine.decide_winner(match_id, Side::A).await.unwrap();
    assert_eq!(report.updates.len(), 4);
    assert_eq!(report.clans.len(), 2);

    let winners = system.roster.clan(1).unwrap();
    let losers = system.roster.clan(2).unwrap();
    assert_eq!(winners.rating, 1000 + session.stake);
    assert_eq!(winners.experience, 50);
    assert_eq!(losers.rating, 1000 - session.stake);
    assert_eq!(losers.experience, 10);
}

#[tokio::test]
async fn test_invite_rules() {
    let system = TestSystem::new();
    system.add_clan(1, "Ravens", &["c1a", "c1b"]);
    system.add_clan(2, "Wolves", &["c2a", "c2b"]);
    system.add_players(&["loner"]);
    let engine = &system.engine;

    let error = error_of(
        engine
            .invite_clanmate("c1a", "c2a", InviteTarget::ClanQueue)
            .await,
    );
    assert!(matches!(error, MatchmakingError::NotClanmates { .. }));

    let error = error_of(
        engine
            .invite_clanmate("loner", "c1a", InviteTarget::ClanQueue)
            .await,
    );
    assert!(matches!(error, MatchmakingError::NotInClan { .. }));

    engine
        .invite_clanmate("c1a", "c1b", InviteTarget::ClanQueue)
        .await
        .unwrap();
    let resolution = engine.respond_invite("c1b", "c1a", false).await.unwrap();
    assert_eq!(resolution, InviteResolution::Declined);
    assert!(system.received("c1a", |c| matches!(c, PromptContent::InviteDeclined { .. })));
    assert_eq!(engine.membership("c1a").unwrap(), None);

    let error = error_of(engine.respond_invite("c1b", "c1a", true).await);
    assert!(matches!(error, MatchmakingError::InviteNotFound { .. }));
}

#[tokio::test]
async fn test_seating_rechecks_slot_after_invite() {
    let system = TestSystem::new();
    system.add_clan(1, "Ravens", &["r1", "r2", "r3", "r4"]);
    let engine = &system.engine;
    let target = InviteTarget::Slot { slot: 1 };

    // Both invites pass the early check while the slot is still empty
    engine.invite_clanmate("r1", "r2", target).await.unwrap();
    engine.invite_clanmate("r3", "r4", target).await.unwrap();

    engine.respond_invite("r2", "r1", true).await.unwrap();
    let error = error_of(engine.respond_invite("r4", "r3", true).await);
    assert!(matches!(error, MatchmakingError::ClanAlreadyInSlot { clan_id: 1, .. }));
    assert_eq!(engine.membership("r3").unwrap(), None);
    assert_eq!(engine.registry().occupancy(GameMode::ClanDuo).unwrap()[0], 2);
}

#[tokio::test]
async fn test_unanswered_invite_expires() {
    let settings = MatchmakingSettings {
        invite_timeout_seconds: 1,
        ..MatchmakingSettings::default()
    };
    let system = TestSystem::with_settings(settings);
    system.add_clan(1, "Ravens", &["c1a", "c1b"]);
    let engine = &system.engine;

    engine
        .invite_clanmate("c1a", "c1b", InviteTarget::Slot { slot: 1 })
        .await
        .unwrap();
    // Invite lifetimes run on the wall clock
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    engine
        .handle_request(GatewayRequest::RespondInvite {
            invitee: "c1b".to_string(),
            inviter: "c1a".to_string(),
            accept: true,
        })
        .await
        .unwrap();
    assert!(system.received("c1b", |c| matches!(c, PromptContent::Rejected { .. })));
    assert!(system.received("c1a", |c| matches!(c, PromptContent::InviteExpired { .. })));
    assert_eq!(engine.membership("c1a").unwrap(), None);
    assert_eq!(engine.registry().pending_invites().unwrap(), 0);

    let error = error_of(engine.respond_invite("c1b", "c1a", true).await);
    assert!(matches!(error, MatchmakingError::InviteNotFound { .. }));
}

#[tokio::test]
async fn test_clan_queue_pairs_without_confirmation() {
    let system = TestSystem::new();
    system.add_clan(1, "Ravens", &["c1a", "c1b"]);
    system.add_clan(2, "Wolves", &["c2a", "c2b"]);
    let engine = &system.engine;

    engine
        .invite_clanmate("c1a", "c1b", InviteTarget::ClanQueue)
        .await
        .unwrap();
    let resolution = engine.respond_invite("c1b", "c1a", true).await.unwrap();
    assert_eq!(
        resolution,
        InviteResolution::Queued(ClanQueueOutcome::Waiting { waiting: 1 })
    );
    assert_eq!(
        engine.membership("c1a").unwrap(),
        Some(Membership::ClanQueue { clan_id: 1 })
    );
    assert!(system.received("c1b", |c| matches!(c, PromptContent::ClanQueued { waiting: 1 })));

    engine
        .invite_clanmate("c2a", "c2b", InviteTarget::ClanQueue)
        .await
        .unwrap();
    let resolution = engine.respond_invite("c2b", "c2a", true).await.unwrap();
    assert!(matches!(
        resolution,
        InviteResolution::Queued(ClanQueueOutcome::Paired { .. })
    ));

    let match_id = single_match(engine);
    let session = active(engine, match_id).await;
    assert_eq!(session.phase, PhaseKind::Ban);
    assert_eq!(session.clans, Some((1, 2)));
    assert_eq!(session.turn_holder().map(String::as_str), Some("c1a"));
    assert!(system.received("c1a", |c| matches!(c, PromptContent::BanMap { .. })));
    assert_eq!(engine.membership("c2b").unwrap(), Some(Membership::Engaged));
}

#[tokio::test]
async fn test_withdraw_from_clan_queue() {
    let system = TestSystem::new();
    system.add_clan(1, "Ravens", &["c1a", "c1b"]);
    let engine = &system.engine;

    engine
        .invite_clanmate("c1a", "c1b", InviteTarget::ClanQueue)
        .await
        .unwrap();
    engine.respond_invite("c1b", "c1a", true).await.unwrap();

    engine.withdraw_clan_queue("c1b").await.unwrap();
    assert!(system.received("c1a", |c| matches!(c, PromptContent::ClanQueueWithdrawn)));
    assert_eq!(engine.membership("c1a").unwrap(), None);
    assert_eq!(engine.stats().await.unwrap().registry.clans_queued, 0);

    let error = error_of(engine.withdraw_clan_queue("c1a").await);
    assert!(matches!(error, MatchmakingError::ClanNotQueued { clan_id: 1 }));
}

#[tokio::test]
async fn test_recovery_after_restart() {
    let system = TestSystem::new();
    let active_id = confirmed_duel(&system).await;
    system.add_players(&["carol", "dave"]);
    system.engine.join("carol", GameMode::Duel, 2).await.unwrap();
    system.engine.join("dave", GameMode::Duel, 2).await.unwrap();
    let pending_id = *system
        .engine
        .live_matches()
        .iter()
        .find(|id| **id != active_id)
        .unwrap();

    let session = active(&system.engine, active_id).await;
    let holder = session.turn_holder().cloned().unwrap();
    system
        .engine
        .ban(&holder, active_id, DUEL_MAP_POOL[0])
        .await
        .unwrap();

    let engine = system.restarted();
    let report = engine.recover_open_matches().await.unwrap();
    assert_eq!(report.pending, 1);
    assert_eq!(report.active, 1);
    assert_eq!(report.failed, 0);

    let session = active(&engine, active_id).await;
    assert_eq!(session.turn, 1);
    assert_eq!(session.veto.as_ref().unwrap().remaining().len(), 6);
    assert_eq!(
        engine.timers().pending(active_id),
        Some(TimerKey::new(active_id, PhaseKind::Ban, 1))
    );
    assert_eq!(engine.membership("alice").unwrap(), Some(Membership::Engaged));
    assert!(matches!(
        engine.lookup(pending_id).await.unwrap(),
        MatchLookup::Live(_)
    ));

    // The recovered match carries on where it stopped
    let holder = session.turn_holder().cloned().unwrap();
    engine
        .ban(&holder, active_id, DUEL_MAP_POOL[1])
        .await
        .unwrap();
    assert_eq!(active(&engine, active_id).await.turn, 2);

    let again = engine.recover_open_matches().await.unwrap();
    assert_eq!(again.recovered(), 0);
    engine.shutdown();
}

#[tokio::test]
async fn test_lobby_seats_survive_restart() {
    let system = TestSystem::new();
    system.add_players(&["alice", "bob", "carol", "dave", "erin", "frank"]);
    let engine = &system.engine;

    engine.join("alice", GameMode::Duo, 2).await.unwrap();
    engine.join("bob", GameMode::Duo, 2).await.unwrap();
    engine.leave("bob", GameMode::Duo, 2).await.unwrap();
    engine.join("carol", GameMode::Duel, 1).await.unwrap();
    engine.join("dave", GameMode::Duel, 3).await.unwrap();
    engine.join("erin", GameMode::Duel, 3).await.unwrap();
    assert!(system.matches.slot(GameMode::Duel, 3).unwrap().members.is_empty());

    let engine = system.restarted();
    let report = engine.recover_open_matches().await.unwrap();
    assert_eq!(report.pending, 1);
    assert_eq!(report.seats, 2);
    assert_eq!(
        engine.membership("alice").unwrap(),
        Some(Membership::Slot {
            mode: GameMode::Duo,
            slot: 2
        })
    );
    assert_eq!(engine.membership("bob").unwrap(), None);
    assert_eq!(engine.membership("dave").unwrap(), Some(Membership::Engaged));
    assert_eq!(engine.registry().occupancy(GameMode::Duel).unwrap()[2], 0);

    // The restored seat still counts toward filling the slot
    engine.join("frank", GameMode::Duel, 1).await.unwrap();
    assert_eq!(engine.live_matches().len(), 2);
    assert_eq!(engine.membership("carol").unwrap(), Some(Membership::Engaged));
    engine.shutdown();
}

#[tokio::test]
async fn test_join_is_undone_when_seat_cannot_be_stored() {
    let system = TestSystem::new();
    system.add_players(&["alice"]);
    let engine = &system.engine;

    system.matches.set_fail_slot_saves(true);
    let result = engine.join("alice", GameMode::Duel, 1).await;
    assert_eq!(classify(&result.unwrap_err()), ErrorClass::Persistence);
    assert_eq!(engine.membership("alice").unwrap(), None);
    assert_eq!(engine.registry().occupancy(GameMode::Duel).unwrap()[0], 0);

    system.matches.set_fail_slot_saves(false);
    engine.join("alice", GameMode::Duel, 1).await.unwrap();
    assert_eq!(system.matches.slot(GameMode::Duel, 1).unwrap().members.len(), 1);
}

#[tokio::test]
async fn test_first_touch_restores_match() {
    let system = TestSystem::new();
    let match_id = confirmed_duel(&system).await;
    let holder = active(&system.engine, match_id)
        .await
        .turn_holder()
        .cloned()
        .unwrap();

    let engine = system.restarted();
    assert!(engine.live_matches().is_empty());

    engine
        .ban(&holder, match_id, DUEL_MAP_POOL[0])
        .await
        .unwrap();
    assert_eq!(engine.live_matches(), vec![match_id]);
    assert_eq!(active(&engine, match_id).await.turn, 1);
    assert_eq!(engine.membership("bob").unwrap(), Some(Membership::Engaged));

    let error = error_of(engine.ban(&holder, 9_999, DUEL_MAP_POOL[1]).await);
    assert!(matches!(error, MatchmakingError::MatchNotFound { match_id: 9_999 }));
    engine.shutdown();
}

#[tokio::test]
async fn test_force_cancel_releases_players() {
    let system = TestSystem::new();
    let match_id = confirmed_duel(&system).await;
    let engine = &system.engine;

    engine.force_cancel(match_id, "server maintenance").await.unwrap();
    assert!(system.received("bob", |c| matches!(c, PromptContent::MatchCancelled { .. })));
    assert_eq!(engine.membership("alice").unwrap(), None);
    assert!(engine.timers().pending(match_id).is_none());
    assert_eq!(
        system.matches.record(match_id).unwrap().status,
        MatchStatus::Cancelled
    );

    let error = error_of(engine.force_cancel(match_id, "again").await);
    assert!(matches!(error, MatchmakingError::MatchClosed { .. }));
    let error = error_of(engine.ban("alice", match_id, DUEL_MAP_POOL[0]).await);
    assert!(matches!(error, MatchmakingError::MatchClosed { .. }));

    // Released players may queue again
    engine.join("alice", GameMode::Duel, 1).await.unwrap();
}

#[tokio::test]
async fn test_annulled_participant_is_not_settled() {
    let system = TestSystem::new();
    let match_id = finished_duel(&system).await;
    let engine = &system.engine;

    engine.annul_participant(match_id, "bob").await.unwrap();
    engine.annul_participant(match_id, "bob").await.unwrap();
    assert!(system.received("bob", |c| matches!(c, PromptContent::Annulled)));

    let report = engine.decide_winner(match_id, Side::A).await.unwrap();
    assert_eq!(report.updates.len(), 1);
    assert_eq!(report.updates[0].player_id, "alice");
    let bob = system.roster.player("bob").unwrap();
    assert_eq!((bob.rating, bob.matches), (1000, 0));
}

#[tokio::test]
async fn test_adjust_rating_notifies_player() {
    let system = TestSystem::new();
    system.add_players(&["alice"]);

    let update = system.engine.adjust_rating("alice", 25).await.unwrap();
    assert_eq!(update.new_rating, 1025);
    assert_eq!(update.delta(), 25);
    assert!(system.received("alice", |c| matches!(
        c,
        PromptContent::RatingAdjusted {
            delta: 25,
            new_rating: 1025,
            ..
        }
    )));
    assert_eq!(system.roster.player("alice").unwrap().matches, 0);
}

#[tokio::test]
async fn test_result_evidence_goes_to_admins() {
    let settings = MatchmakingSettings {
        admins: vec!["referee".to_string()],
        ..MatchmakingSettings::default()
    };
    let system = TestSystem::with_settings(settings);
    let match_id = confirmed_duel(&system).await;
    let engine = &system.engine;

    let evidence = ResultEvidence {
        submitted_by: "alice".to_string(),
        attachment: "screenshot-1".to_string(),
        note: Some("gg".to_string()),
    };
    engine
        .handle_request(GatewayRequest::SubmitResult {
            match_id,
            evidence: evidence.clone(),
        })
        .await
        .unwrap();
    assert!(system.received("alice", |c| matches!(c, PromptContent::Rejected { .. })));
    assert!(system.gateway.prompts_for("referee").is_empty());

    run_veto(engine, match_id).await;
    assert!(system.received("referee", |c| matches!(c, PromptContent::MatchReady { .. })));

    engine
        .handle_request(GatewayRequest::SubmitResult {
            match_id,
            evidence: evidence.clone(),
        })
        .await
        .unwrap();
    assert!(system.received("referee", |c| *c
        == PromptContent::ResultSubmitted {
            evidence: evidence.clone()
        }));
    assert_eq!(
        system.matches.record(match_id).unwrap().status,
        MatchStatus::Disputed
    );

    let report = engine.decide_winner(match_id, Side::A).await.unwrap();
    assert_eq!(report.updates.len(), 2);
}

#[tokio::test]
async fn test_admin_decides_through_gateway() {
    let settings = MatchmakingSettings {
        admins: vec!["referee".to_string()],
        ..MatchmakingSettings::default()
    };
    let system = TestSystem::with_settings(settings);
    let match_id = finished_duel(&system).await;
    let engine = &system.engine;

    engine
        .handle_request(GatewayRequest::SubmitResult {
            match_id,
            evidence: ResultEvidence {
                submitted_by: "bob".to_string(),
                attachment: "screenshot-2".to_string(),
                note: None,
            },
        })
        .await
        .unwrap();
    let review = system
        .gateway
        .prompts_for("referee")
        .into_iter()
        .find(|p| matches!(p.content, PromptContent::ResultSubmitted { .. }))
        .expect("referee got no result prompt");
    let decide_b = AdminCommand::DecideWinner {
        match_id,
        winner: Side::B,
    };
    assert!(review.admin_actions.contains(&decide_b));
    assert!(review.admin_actions.contains(&AdminCommand::Annul {
        match_id,
        player_id: "alice".to_string(),
    }));

    // Only configured administrators may answer
    engine
        .handle_request(GatewayRequest::Admin {
            admin_id: "bob".to_string(),
            command: decide_b.clone(),
        })
        .await
        .unwrap();
    assert!(system.received("bob", |c| matches!(c, PromptContent::Rejected { .. })));
    assert_eq!(system.roster.player("bob").unwrap().matches, 0);
    assert!(engine.live_matches().contains(&match_id));

    engine
        .handle_request(GatewayRequest::Admin {
            admin_id: "referee".to_string(),
            command: decide_b.clone(),
        })
        .await
        .unwrap();
    let record = system.matches.record(match_id).unwrap();
    assert_eq!(record.status, MatchStatus::Finished);
    assert_eq!(record.winner, Some(Side::B));
    assert!(system.received("bob", |c| matches!(c, PromptContent::Settled { winner: Side::B, .. })));
    assert!(system.received("referee", |c| *c
        == PromptContent::AdminApplied {
            command: decide_b.clone()
        }));

    engine
        .handle_request(GatewayRequest::Admin {
            admin_id: "referee".to_string(),
            command: AdminCommand::AdjustRating {
                player_id: "alice".to_string(),
                delta: 15,
            },
        })
        .await
        .unwrap();
    assert!(system.received("alice", |c| matches!(
        c,
        PromptContent::RatingAdjusted { delta: 15, .. }
    )));
}

#[tokio::test]
async fn test_admin_cancel_through_gateway() {
    let settings = MatchmakingSettings {
        admins: vec!["referee".to_string()],
        ..MatchmakingSettings::default()
    };
    let system = TestSystem::with_settings(settings);
    let match_id = confirmed_duel(&system).await;

    system
        .engine
        .handle_request(GatewayRequest::Admin {
            admin_id: "referee".to_string(),
            command: AdminCommand::Cancel {
                match_id,
                reason: "server crash".to_string(),
            },
        })
        .await
        .unwrap();
    assert_eq!(
        system.matches.record(match_id).unwrap().status,
        MatchStatus::Cancelled
    );
    assert!(system.received("alice", |c| matches!(c, PromptContent::MatchCancelled { .. })));
    assert_eq!(system.engine.membership("alice").unwrap(), None);
}

#[tokio::test]
async fn test_requests_are_validated() {
    let system = TestSystem::new();
    let match_id = confirmed_duel(&system).await;
    let engine = &system.engine;

    engine
        .handle_request(GatewayRequest::Join {
            player_id: "alice".to_string(),
            mode: GameMode::Duel,
            slot: 3,
        })
        .await
        .unwrap();
    engine
        .handle_request(GatewayRequest::Join {
            player_id: "bob".to_string(),
            mode: GameMode::Duo,
            slot: 0,
        })
        .await
        .unwrap();
    let error = error_of(engine.join("alice", GameMode::Duel, 3).await);
    assert!(matches!(error, MatchmakingError::AlreadyInMatch { .. }));

    assert!(system.received("alice", |c| matches!(c, PromptContent::Rejected { .. })));
    assert!(system.received("bob", |c| matches!(c, PromptContent::Rejected { .. })));
    assert_eq!(engine.stats().await.unwrap().rejected_requests, 2);
    assert_eq!(active(engine, match_id).await.turn, 0);
}

#[tokio::test]
async fn test_leave_slot() {
    let system = TestSystem::new();
    system.add_players(&["alice"]);
    let engine = &system.engine;

    engine.join("alice", GameMode::Squad, 4).await.unwrap();
    let removed = engine.leave("alice", GameMode::Squad, 4).await.unwrap();
    assert_eq!(removed, vec!["alice".to_string()]);
    assert!(system.received("alice", |c| matches!(
        c,
        PromptContent::LeftSlot {
            mode: GameMode::Squad,
            slot: 4
        }
    )));
    assert_eq!(engine.membership("alice").unwrap(), None);

    let error = error_of(engine.leave("alice", GameMode::Squad, 4).await);
    assert!(matches!(error, MatchmakingError::NotInSlot { .. }));
}

#[tokio::test]
async fn test_unreachable_player_does_not_block_others() {
    let system = TestSystem::new();
    system.gateway.fail_for("alice");
    let match_id = confirmed_duel(&system).await;

    assert!(system.gateway.prompts_for("alice").is_empty());
    assert!(system.received("bob", |c| matches!(c, PromptContent::ConfirmMatch { .. })));
    assert_eq!(active(&system.engine, match_id).await.phase, PhaseKind::Ban);
    assert!(system.engine.stats().await.unwrap().delivery_failures >= 3);
}

mock! {
    pub FlakyGateway {}

    #[async_trait]
    impl MessagingGateway for FlakyGateway {
        async fn prompt(&self, prompt: &Prompt) -> scrim_room::Result<()>;
    }
}

#[tokio::test]
async fn test_gateway_errors_never_fail_operations() {
    let mut gateway = MockFlakyGateway::new();
    gateway.expect_prompt().returning(|prompt| {
        if prompt.player_id == "bob" {
            Err(MatchmakingError::DeliveryFailed {
                player_id: prompt.player_id.clone(),
                reason: "connection reset".to_string(),
            }
            .into())
        } else {
            Ok(())
        }
    });

    let roster = Arc::new(InMemoryRosterStore::new());
    let matches = Arc::new(InMemoryMatchStore::new());
    let engine = build_engine(
        MatchmakingSettings::default(),
        roster.clone(),
        matches.clone(),
        Arc::new(gateway),
    );
    for id in ["alice", "bob"] {
        roster
            .add_player(scrim_room::types::Player::new(id, id))
            .unwrap();
    }

    engine.join("alice", GameMode::Duel, 5).await.unwrap();
    engine.join("bob", GameMode::Duel, 5).await.unwrap();
    let match_id = single_match(&engine);
    accept_all(&engine, match_id, &["alice", "bob"]).await;
    run_veto(&engine, match_id).await;

    let report = engine.decide_winner(match_id, Side::B).await.unwrap();
    assert_eq!(report.updates.len(), 2);
    assert!(engine.stats().await.unwrap().delivery_failures > 0);
    assert_eq!(
        matches.record(match_id).unwrap().status,
        MatchStatus::Finished
    );
}

#[tokio::test]
async fn test_promotion_fails_cleanly_without_storage() {
    let system = TestSystem::new();
    system.add_players(&["alice", "bob"]);
    let engine = &system.engine;

    system.matches.set_fail_saves(true);
    engine.join("alice", GameMode::Duel, 1).await.unwrap();
    let error = engine.join("bob", GameMode::Duel, 1).await.unwrap_err();
    assert_eq!(classify(&error), ErrorClass::Persistence);

    assert!(engine.live_matches().is_empty());
    assert_eq!(engine.membership("alice").unwrap(), None);
    assert!(system.received("bob", |c| matches!(c, PromptContent::MatchCancelled { .. })));

    system.matches.set_fail_saves(false);
    engine.join("alice", GameMode::Duel, 1).await.unwrap();
}
