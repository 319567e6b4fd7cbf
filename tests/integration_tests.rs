//! Integration tests for the draft-room service
//!
//! These tests drive the whole system through its public API:
//! - Complete match lifecycles from lobby to FREE
//! - Scoring from scripted telemetry
//! - Command decoding and dispatch
//! - Concurrent lobby traffic and several match slots

mod fixtures;

use draft_room::accounts::AccountAllocator;
use draft_room::amqp::handlers::process_message;
use draft_room::lobby::LobbyEvent;
use draft_room::matches::MatchStatus;
use draft_room::metrics::MetricsCollector;
use draft_room::service::ProductionCommandHandler;
use draft_room::telemetry::{CaptureEvent, KillEvent};
use draft_room::types::{Faction, NoticeKey, NoticeTarget, TeamId};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use fixtures::*;

fn kill(attacker: u64, victim: u64, weapon: u32) -> KillEvent {
    KillEvent {
        attacker: telemetry_of(attacker),
        victim: telemetry_of(victim),
        attacker_loadout: 1,
        victim_loadout: 3,
        weapon,
        timestamp: 0,
    }
}

#[tokio::test(start_paused = true)]
async fn test_two_round_match_is_scored_and_freed() {
    let system = create_test_system(4, vec![1], 4);
    fill_lobby(&system.manager, 1..=4).await;
    assert_eq!(system.manager.status(1).await.unwrap(), MatchStatus::Picking);

    draft(&system.manager, 1).await;
    pick_factions(&system.manager, 1).await;
    // A single map is preset, so the match goes straight to the ready-check
    assert_eq!(system.manager.status(1).await.unwrap(), MatchStatus::Waiting);
    assert_eq!(system.notifier.count(NoticeKey::MapConfirmed), 1);

    let snapshot = system.manager.snapshot(1).await.unwrap();
    let first_captain = captain(&snapshot, TeamId::First);
    let second_captain = captain(&snapshot, TeamId::Second);
    system.telemetry.set_kills(
        telemetry_of(first_captain),
        vec![kill(first_captain, second_captain, GAUSS_RIFLE)],
    );
    system.telemetry.set_captures(vec![CaptureEvent {
        facility_id: lab_map().facility_id,
        faction: Faction::TerranRepublic,
        timestamp: 0,
    }]);

    validate_all(&system.manager, 1).await;
    ready_up(&system.manager, 1).await;
    assert_eq!(system.manager.status(1).await.unwrap(), MatchStatus::Starting);

    sleep(Duration::from_secs(31)).await;
    assert_eq!(system.manager.status(1).await.unwrap(), MatchStatus::Playing);

    sleep(Duration::from_secs(600)).await;
    assert_eq!(system.manager.status(1).await.unwrap(), MatchStatus::Waiting);
    let round_over = system.notifier.with_key(NoticeKey::RoundOver);
    assert_eq!(round_over.len(), 1);
    assert_eq!(round_over[0].args[0], "1");

    // Accounts stay validated between rounds
    ready_up(&system.manager, 1).await;
    sleep(Duration::from_secs(31)).await;
    assert_eq!(system.manager.snapshot(1).await.unwrap().round_no, 2);
    sleep(Duration::from_secs(600)).await;

    assert_eq!(system.manager.status(1).await.unwrap(), MatchStatus::Free);
    let match_over = system.notifier.with_key(NoticeKey::MatchOver);
    assert_eq!(match_over.len(), 1);
    assert_eq!(match_over[0].args[0], snapshot.teams[0].name);
    assert_eq!(system.accounts.available(), 4);
    assert_eq!(system.manager.engaged_match(first_captain), None);
}

#[tokio::test(start_paused = true)]
async fn test_banned_weapon_is_reported_to_staff() {
    let system = create_test_system(2, vec![1], 2);
    fill_lobby(&system.manager, [1, 2]).await;
    // Lobby of two: no draft, the match opens at the faction phase
    assert_eq!(system.manager.status(1).await.unwrap(), MatchStatus::Faction);

    pick_factions(&system.manager, 1).await;
    let snapshot = system.manager.snapshot(1).await.unwrap();
    let first = captain(&snapshot, TeamId::First);
    let second = captain(&snapshot, TeamId::Second);
    system
        .telemetry
        .set_kills(telemetry_of(first), vec![kill(first, second, BANNED_LAUNCHER)]);

    validate_all(&system.manager, 1).await;
    ready_up(&system.manager, 1).await;
    sleep(Duration::from_secs(631)).await;

    let reports = system.notifier.with_key(NoticeKey::IllegalWeapon);
    assert!(reports.iter().any(|n| n.target == NoticeTarget::Staff));
    assert!(reports.iter().any(|n| n.target == NoticeTarget::Match(1)));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_joins_fill_every_slot() {
    let system = create_test_system(4, vec![1, 2], 8);

    for wave in [1..=4u64, 5..=8] {
        let joins = wave.map(|id| {
            let manager = system.manager.clone();
            async move { manager.join(player(id)).await }
        });
        let results = join_all(joins).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Ok(LobbyEvent::Full)))
                .count(),
            1
        );
        settle().await;
    }

    assert!(system.manager.lobby_players().await.is_empty());
    for match_id in [1, 2] {
        assert_eq!(
            system.manager.status(match_id).await.unwrap(),
            MatchStatus::Picking
        );
    }
    for id in 1..=8 {
        assert!(system.manager.engaged_match(id).is_some());
    }

    // A third full lobby has nowhere to go
    let joins = (9..=12).map(|id| {
        let manager = system.manager.clone();
        async move { manager.join(player(id)).await }
    });
    join_all(joins).await;
    settle().await;

    let stats = system.manager.get_stats().await.unwrap();
    assert_eq!(stats.matches_started, 2);
    assert_eq!(stats.free_slots, 0);
    assert!(stats.lobby_stuck);
    assert_eq!(system.notifier.count(NoticeKey::LobbyStuck), 1);
}

#[tokio::test(start_paused = true)]
async fn test_commands_are_decoded_and_dispatched() {
    let system = create_test_system(2, vec![1], 2);
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let handler = ProductionCommandHandler::new(
        system.manager.clone(),
        system.notifier.clone(),
        metrics.clone(),
    );

    process_message(
        &handler,
        br#"{"type":"join","player":{"id":1,"name":"Alice","telemetry_id":5001}}"#,
    )
    .await;
    process_message(
        &handler,
        br#"{"type":"join","player":{"id":2,"name":"Bob","telemetry_id":5002}}"#,
    )
    .await;
    settle().await;
    assert_eq!(system.manager.status(1).await.unwrap(), MatchStatus::Faction);

    // Bob is engaged now, so leaving the lobby is rejected back to him
    process_message(&handler, br#"{"type":"leave","player_id":2}"#).await;
    let rejected = system.notifier.with_key(NoticeKey::CommandRejected);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].target, NoticeTarget::Player(2));

    process_message(&handler, br#"{"type":"clear_match","match_id":1}"#).await;
    assert_eq!(system.manager.status(1).await.unwrap(), MatchStatus::Free);
    assert_eq!(system.manager.engaged_match(1), None);

    // Malformed input never reaches the manager
    process_message(&handler, b"not json").await;
    assert_eq!(system.notifier.count(NoticeKey::CommandRejected), 1);
    assert_eq!(
        metrics
            .service()
            .amqp_messages_total
            .with_label_values(&["join", "success"])
            .get(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_substitute_between_rounds_keeps_scores() {
    let system = create_test_system(4, vec![1], 5);
    fill_lobby(&system.manager, 1..=4).await;
    prepare_match(&system.manager, 1).await;
    sleep(Duration::from_secs(631)).await;
    assert_eq!(system.manager.status(1).await.unwrap(), MatchStatus::Waiting);

    let snapshot = system.manager.snapshot(1).await.unwrap();
    let member = roster_ids(&snapshot, TeamId::Second)[1];
    system
        .manager
        .substitute(1, member, player(9))
        .await
        .unwrap();

    let snapshot = system.manager.snapshot(1).await.unwrap();
    assert!(roster_ids(&snapshot, TeamId::Second).contains(&9));
    assert!(snapshot.teams[1].score.is_some());
    assert_eq!(system.manager.engaged_match(9), Some(1));
    assert_eq!(system.manager.engaged_match(member), None);
    assert_eq!(system.notifier.count(NoticeKey::PlayerSubstituted), 1);

    // The newcomer borrowed an account and must validate it before the next round
    system.manager.validate_account(1, 9).await.unwrap();
    ready_up(&system.manager, 1).await;
    assert_eq!(system.manager.status(1).await.unwrap(), MatchStatus::Starting);
}

#[tokio::test(start_paused = true)]
async fn test_swap_moves_players_across_teams() {
    let system = create_test_system_with_maps(
        4,
        vec![1],
        4,
        vec![
            lab_map(),
            draft_room::types::GameMap {
                id: 2,
                name: "Chac Fusion Lab".to_string(),
                facility_id: 200,
            },
        ],
    );
    fill_lobby(&system.manager, 1..=4).await;
    draft(&system.manager, 1).await;
    pick_factions(&system.manager, 1).await;
    assert_eq!(system.manager.status(1).await.unwrap(), MatchStatus::Mapping);

    let snapshot = system.manager.snapshot(1).await.unwrap();
    let first = roster_ids(&snapshot, TeamId::First)[1];
    let second = roster_ids(&snapshot, TeamId::Second)[1];
    system.manager.swap(1, first, second).await.unwrap();

    let snapshot = system.manager.snapshot(1).await.unwrap();
    assert!(roster_ids(&snapshot, TeamId::First).contains(&second));
    assert!(roster_ids(&snapshot, TeamId::Second).contains(&first));

    // Captains cannot be swapped
    let captains = (
        captain(&snapshot, TeamId::First),
        captain(&snapshot, TeamId::Second),
    );
    assert!(system
        .manager
        .swap(1, captains.0, captains.1)
        .await
        .is_err());
}
