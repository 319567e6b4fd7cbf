//! Shared harness for the integration tests
//!
//! Builds a match manager over in-memory collaborators and drives matches
//! through their phases the way captains would.

#![allow(dead_code)]

use draft_room::accounts::{AccountPool, GameAccount};
use draft_room::amqp::MockNotifier;
use draft_room::config::{MatchmakingSettings, ScoringSettings};
use draft_room::maps::MapPool;
use draft_room::matches::{Collaborators, MatchManager, MatchSnapshot, MatchStatus};
use draft_room::score::WeaponCatalog;
use draft_room::telemetry::MockTelemetryClient;
use draft_room::types::{Faction, GameMap, MatchId, Player, PlayerId, TeamId, Weapon};
use std::sync::Arc;
use std::time::Duration;

pub const GAUSS_RIFLE: u32 = 7;
pub const BANNED_LAUNCHER: u32 = 9;

pub struct TestSystem {
    pub manager: MatchManager,
    pub notifier: Arc<MockNotifier>,
    pub telemetry: Arc<MockTelemetryClient>,
    pub accounts: Arc<AccountPool>,
}

pub fn settings(lobby_size: usize, match_ids: Vec<MatchId>) -> MatchmakingSettings {
    MatchmakingSettings {
        lobby_size,
        match_ids,
        ..MatchmakingSettings::default()
    }
}

pub fn weapons() -> WeaponCatalog {
    WeaponCatalog::from_weapons(vec![
        Weapon {
            id: GAUSS_RIFLE,
            name: "Gauss Rifle".to_string(),
            points: 1,
            banned: false,
        },
        Weapon {
            id: BANNED_LAUNCHER,
            name: "Lancer".to_string(),
            points: 2,
            banned: true,
        },
    ])
}

pub fn account_pool(count: u32) -> Arc<AccountPool> {
    Arc::new(AccountPool::new(
        (1..=count)
            .map(|id| GameAccount {
                id,
                username: format!("pool{}", id),
            })
            .collect(),
    ))
}

pub fn lab_map() -> GameMap {
    GameMap {
        id: 1,
        name: "Acan Southern Labs".to_string(),
        facility_id: 100,
    }
}

/// Create a complete system with a single map, so the map is preset
pub fn create_test_system(
    lobby_size: usize,
    match_ids: Vec<MatchId>,
    accounts: u32,
) -> TestSystem {
    create_test_system_with_maps(lobby_size, match_ids, accounts, vec![lab_map()])
}

pub fn create_test_system_with_maps(
    lobby_size: usize,
    match_ids: Vec<MatchId>,
    accounts: u32,
    maps: Vec<GameMap>,
) -> TestSystem {
    let notifier = Arc::new(MockNotifier::new());
    let telemetry = Arc::new(MockTelemetryClient::new());
    let accounts = account_pool(accounts);

    let collaborators = Collaborators {
        notifier: notifier.clone(),
        accounts: accounts.clone(),
        maps: Arc::new(MapPool::new(maps)),
        telemetry: telemetry.clone(),
        weapons: Arc::new(weapons()),
    };
    let manager = MatchManager::new(
        settings(lobby_size, match_ids),
        ScoringSettings::default(),
        collaborators,
    );

    TestSystem {
        manager,
        notifier,
        telemetry,
        accounts,
    }
}

/// Telemetry ids are derived from player ids
pub fn player(id: PlayerId) -> Player {
    Player::new(id, format!("player{}", id), telemetry_of(id))
}

pub fn telemetry_of(id: PlayerId) -> u64 {
    5_000 + id
}

/// Let spawned timer actions run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub async fn fill_lobby(manager: &MatchManager, ids: impl IntoIterator<Item = PlayerId>) {
    for id in ids {
        manager.join(player(id)).await.unwrap();
    }
    settle().await;
}

pub fn captain(snapshot: &MatchSnapshot, team: TeamId) -> PlayerId {
    snapshot.teams[team.index()].roster[0].player().id
}

pub fn roster_ids(snapshot: &MatchSnapshot, team: TeamId) -> Vec<PlayerId> {
    snapshot.teams[team.index()]
        .roster
        .iter()
        .map(|entry| entry.player().id)
        .collect()
}

pub fn turn_holder(snapshot: &MatchSnapshot) -> TeamId {
    if snapshot.teams[0].turn {
        TeamId::First
    } else {
        TeamId::Second
    }
}

/// Captains alternate picking the head of the pool until the draft ends
pub async fn draft(manager: &MatchManager, match_id: MatchId) {
    loop {
        let snapshot = manager.snapshot(match_id).await.unwrap();
        if snapshot.status != MatchStatus::Picking {
            break;
        }
        let team = turn_holder(&snapshot);
        manager
            .pick(match_id, captain(&snapshot, team), snapshot.pool[0].id)
            .await
            .unwrap();
    }
}

pub async fn pick_factions(manager: &MatchManager, match_id: MatchId) {
    let snapshot = manager.snapshot(match_id).await.unwrap();
    manager
        .pick_faction(match_id, captain(&snapshot, TeamId::Second), Faction::Vanu)
        .await
        .unwrap();
    manager
        .pick_faction(
            match_id,
            captain(&snapshot, TeamId::First),
            Faction::TerranRepublic,
        )
        .await
        .unwrap();
}

pub async fn validate_all(manager: &MatchManager, match_id: MatchId) {
    let snapshot = manager.snapshot(match_id).await.unwrap();
    for team in TeamId::BOTH {
        for id in roster_ids(&snapshot, team) {
            manager.validate_account(match_id, id).await.unwrap();
        }
    }
}

pub async fn ready_up(manager: &MatchManager, match_id: MatchId) {
    let snapshot = manager.snapshot(match_id).await.unwrap();
    for team in TeamId::BOTH {
        manager
            .ready(match_id, captain(&snapshot, team))
            .await
            .unwrap();
    }
}

/// Drive a freshly launched match up to the first countdown
pub async fn prepare_match(manager: &MatchManager, match_id: MatchId) {
    draft(manager, match_id).await;
    pick_factions(manager, match_id).await;
    validate_all(manager, match_id).await;
    ready_up(manager, match_id).await;
}
