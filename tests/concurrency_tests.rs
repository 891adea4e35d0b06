//! Concurrency and property tests
//!
//! Races between players hitting the same slot or match, plus randomized
//! checks of the registry bookkeeping and the captain policy.

mod fixtures;

use fixtures::{active, single_match, TestSystem};
use futures::future::join_all;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use scrim_room::lobby::{JoinOutcome, LobbyRegistry, Membership, StaticModeProvider};
use scrim_room::matches::{pick_captains, Session, VetoState};
use scrim_room::types::{GameMode, PhaseKind, PlayerId};
use std::collections::HashSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_fill_slots_once() {
    let system = TestSystem::new();
    let players: Vec<String> = (0..10).map(|i| format!("racer{}", i)).collect();
    let ids: Vec<&str> = players.iter().map(String::as_str).collect();
    system.add_players(&ids);

    let joins = players.iter().map(|player| {
        let engine = system.engine.clone();
        let player = player.clone();
        async move { engine.join(&player, GameMode::Duel, 1).await }
    });
    let outcomes = join_all(joins).await;

    let promotions = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Ok(JoinOutcome::Promoted(_))))
        .count();
    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(promotions, 5);

    let live = system.engine.live_matches();
    assert_eq!(live.len(), 5);
    let mut seen = HashSet::new();
    for match_id in live {
        let Some(Session::Pending(pending)) = system.engine.snapshot(match_id).await else {
            panic!("match {} should be pending", match_id);
        };
        assert_eq!(pending.candidates.len(), 2);
        for candidate in pending.candidates {
            assert!(seen.insert(candidate.player_id), "player seated twice");
        }
    }
    assert_eq!(seen.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_accepts_activate_once() {
    let system = TestSystem::new();
    let players: Vec<String> = (0..10).map(|i| format!("sq{}", i)).collect();
    let ids: Vec<&str> = players.iter().map(String::as_str).collect();
    system.add_players(&ids);
    for id in &ids {
        system.engine.join(id, GameMode::Squad, 1).await.unwrap();
    }
    let match_id = single_match(&system.engine);

    let accepts = players.iter().map(|player| {
        let engine = system.engine.clone();
        let player = player.clone();
        async move { engine.accept(&player, match_id).await }
    });
    let results = join_all(accepts).await;
    assert!(results.iter().all(Result::is_ok));

    let session = active(&system.engine, match_id).await;
    assert!(matches!(
        session.phase,
        PhaseKind::SideChoice | PhaseKind::Pick
    ));
    assert!(session.participants.iter().all(|p| p.accepted));

    let stats = system.engine.stats().await.unwrap();
    assert_eq!(stats.promotions, 1);
    assert_eq!(stats.active_matches, 1);
    assert_eq!(stats.pending_matches, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_bans_take_one_turn() {
    let system = TestSystem::new();
    system.add_players(&["alice", "bob"]);
    system.engine.join("alice", GameMode::Duel, 1).await.unwrap();
    system.engine.join("bob", GameMode::Duel, 1).await.unwrap();
    let match_id = single_match(&system.engine);
    fixtures::accept_all(&system.engine, match_id, &["alice", "bob"]).await;

    let session = active(&system.engine, match_id).await;
    let holder = session.turn_holder().cloned().unwrap();
    let maps = session.veto.as_ref().unwrap().remaining();

    // The turn holder fires the same ban several times at once
    let bans = (0..4).map(|_| {
        let engine = system.engine.clone();
        let holder = holder.clone();
        let map = maps[0].clone();
        async move { engine.ban(&holder, match_id, &map).await }
    });
    let results = join_all(bans).await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

    let session = active(&system.engine, match_id).await;
    assert_eq!(session.turn, 1);
    assert_eq!(session.veto.as_ref().unwrap().bans(), 1);
}

#[test]
fn test_vip_captain_rate() {
    let vip = vec!["vip".to_string()];
    let others: Vec<PlayerId> = (0..9).map(|i| format!("p{}", i)).collect();
    let mut rng = StdRng::seed_from_u64(11);

    let draws = 10_000;
    let (mut first_seat_vip, mut second_seat_vip) = (0, 0);
    for _ in 0..draws {
        let (first, second) = pick_captains(&vip, &others, &mut rng, 0.6).unwrap();
        assert_ne!(first, second);
        if first == "vip" {
            first_seat_vip += 1;
        }
        if second == "vip" {
            second_seat_vip += 1;
        }
    }

    let first_rate = first_seat_vip as f64 / draws as f64;
    assert!((0.57..=0.63).contains(&first_rate), "VIP first-seat rate {}", first_rate);
    // The second seat only sees the VIP when the first seat missed it
    let second_rate = second_seat_vip as f64 / draws as f64;
    assert!((0.21..=0.27).contains(&second_rate), "VIP second-seat rate {}", second_rate);
}

#[test]
fn test_vip_captain_rate_with_two_candidates() {
    let vip = vec!["vip".to_string()];
    let others = vec!["p0".to_string()];
    let mut rng = StdRng::seed_from_u64(23);

    let draws = 10_000;
    let mut first_seat_vip = 0;
    let mut second_seat_vip = 0;
    for _ in 0..draws {
        let (first, second) = pick_captains(&vip, &others, &mut rng, 0.6).unwrap();
        assert!(first == "vip" || second == "vip");
        if first == "vip" {
            first_seat_vip += 1;
        } else {
            second_seat_vip += 1;
        }
    }

    let first_rate = first_seat_vip as f64 / draws as f64;
    let second_rate = second_seat_vip as f64 / draws as f64;
    assert!((0.57..=0.63).contains(&first_rate), "VIP first-seat rate {}", first_rate);
    assert!((0.37..=0.43).contains(&second_rate), "VIP second-seat rate {}", second_rate);
}

#[derive(Debug, Clone)]
enum LobbyOp {
    Join { player: usize, slot: usize },
    Leave { player: usize, slot: usize },
}

fn lobby_op() -> impl Strategy<Value = LobbyOp> {
    prop_oneof![
        (0..8usize, 1..=3usize).prop_map(|(player, slot)| LobbyOp::Join { player, slot }),
        (0..8usize, 1..=3usize).prop_map(|(player, slot)| LobbyOp::Leave { player, slot }),
    ]
}

proptest! {
    #[test]
    fn prop_registry_membership_matches_slots(ops in prop::collection::vec(lobby_op(), 1..60)) {
        let registry = LobbyRegistry::new(&StaticModeProvider::new()).unwrap();
        let mode = GameMode::Duo;

        for op in ops {
            match op {
                LobbyOp::Join { player, slot } => {
                    let _ = registry.join(&format!("p{}", player), mode, slot);
                }
                LobbyOp::Leave { player, slot } => {
                    let _ = registry.leave(&format!("p{}", player), mode, slot);
                }
            }

            for slot in 1..=3 {
                let members = registry.slot_members(mode, slot).unwrap();
                prop_assert!(members.len() < 4, "a full slot was not promoted");
                for member in members {
                    prop_assert_eq!(
                        registry.membership(&member.player_id).unwrap(),
                        Some(Membership::Slot { mode, slot })
                    );
                }
            }
        }

        let stats = registry.stats().unwrap();
        let seated: usize = registry.occupancy(mode).unwrap().iter().sum();
        prop_assert_eq!(stats.players_waiting, seated);
    }

    #[test]
    fn prop_random_veto_ends_on_one_map(seed in any::<u64>()) {
        let pool: Vec<String> = scrim_room::lobby::provider::TEAM_MAP_POOL
            .iter()
            .map(|m| m.to_string())
            .collect();
        let mut veto = VetoState::new(1, &pool, "a".to_string(), "b".to_string());
        let mut rng = StdRng::seed_from_u64(seed);

        let mut banned = HashSet::new();
        for _ in 0..pool.len() - 1 {
            let ban = veto.auto_ban(&mut rng).unwrap();
            prop_assert!(banned.insert(ban.map));
        }
        prop_assert_eq!(veto.bans(), pool.len() - 1);
        let decided = veto.decided().map(str::to_string);
        prop_assert!(decided.is_some());
        prop_assert!(!banned.contains(decided.as_deref().unwrap_or_default()));
        prop_assert!(veto.auto_ban(&mut rng).is_err());
    }

    #[test]
    fn prop_captains_are_distinct(vips in 0..4usize, others in 0..6usize, seed in any::<u64>()) {
        let vip: Vec<PlayerId> = (0..vips).map(|i| format!("v{}", i)).collect();
        let rest: Vec<PlayerId> = (0..others).map(|i| format!("o{}", i)).collect();
        let mut rng = StdRng::seed_from_u64(seed);

        match pick_captains(&vip, &rest, &mut rng, 0.6) {
            Ok((first, second)) => {
                prop_assert!(vips + others >= 2);
                prop_assert_ne!(first, second);
            }
            Err(_) => prop_assert!(vips + others < 2),
        }
    }
}
