//! Performance benchmarks for round scoring

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use draft_room::config::ScoringSettings;
use draft_room::score::{roster_index, tally_captures, tally_kills, WeaponCatalog};
use draft_room::team::{RosterEntry, Team};
use draft_room::telemetry::{CaptureEvent, KillEvent};
use draft_room::types::{Faction, Player, TeamId, Weapon};

const TEAM_SIZE: u64 = 6;

fn telemetry_id(player: u64) -> u64 {
    9_000 + player
}

fn build_teams() -> [Team; 2] {
    let mut teams = [
        Team::new(TeamId::First, "Alpha"),
        Team::new(TeamId::Second, "Bravo"),
    ];
    for (offset, team) in teams.iter_mut().enumerate() {
        for i in 0..TEAM_SIZE {
            let id = offset as u64 * TEAM_SIZE + i;
            let player = Player::new(id, format!("player{}", id), telemetry_id(id));
            let entry = if i == 0 {
                RosterEntry::captain(player)
            } else {
                RosterEntry::regular(player)
            };
            team.add_player(entry).unwrap();
        }
        team.on_ready(true);
    }
    teams[0].set_faction(Some(Faction::TerranRepublic));
    teams[1].set_faction(Some(Faction::Vanu));
    teams
}

fn weapons() -> WeaponCatalog {
    WeaponCatalog::from_weapons((1..=40).map(|id| Weapon {
        id,
        name: format!("weapon{}", id),
        points: 1 + (id % 3) as i32,
        banned: id % 17 == 0,
    }))
}

/// Kills by `attacker` spread over every player of the match, team kills and
/// suicides included
fn kill_feed(attacker: u64, count: usize) -> Vec<KillEvent> {
    (0..count)
        .map(|i| KillEvent {
            attacker: telemetry_id(attacker),
            victim: telemetry_id(i as u64 % (TEAM_SIZE * 2)),
            attacker_loadout: 1 + (i % 4) as u32,
            victim_loadout: 5 + (i % 4) as u32,
            weapon: 1 + (i % 40) as u32,
            timestamp: i as i64,
        })
        .collect()
}

fn bench_tally_kills(c: &mut Criterion) {
    let weapons = weapons();
    let mut group = c.benchmark_group("tally_kills");

    for count in [10usize, 100, 1000] {
        let events = kill_feed(0, count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &events, |b, events| {
            b.iter_batched(
                build_teams,
                |mut teams| {
                    let index = roster_index(&teams);
                    black_box(tally_kills(
                        &mut teams,
                        &index,
                        &weapons,
                        telemetry_id(0),
                        black_box(events),
                    ))
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_full_round(c: &mut Criterion) {
    let weapons = weapons();
    let feeds: Vec<Vec<KillEvent>> = (0..TEAM_SIZE * 2).map(|p| kill_feed(p, 50)).collect();
    let captures: Vec<CaptureEvent> = (0..20)
        .map(|i| CaptureEvent {
            facility_id: 100,
            faction: if i % 2 == 0 {
                Faction::TerranRepublic
            } else {
                Faction::Vanu
            },
            timestamp: 20 - i,
        })
        .collect();

    c.bench_function("score_full_round", |b| {
        b.iter_batched(
            build_teams,
            |mut teams| {
                let index = roster_index(&teams);
                for (player, feed) in feeds.iter().enumerate() {
                    black_box(tally_kills(
                        &mut teams,
                        &index,
                        &weapons,
                        telemetry_id(player as u64),
                        feed,
                    ));
                }
                black_box(tally_captures(
                    &mut teams,
                    100,
                    &captures,
                    ScoringSettings::default(),
                ))
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_tally_kills, bench_full_round);
criterion_main!(benches);
