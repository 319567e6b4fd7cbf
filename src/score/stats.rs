//! Per-loadout, per-player and per-team score tallies

use crate::types::{LoadoutId, Player, PlayerId, TelemetryId, WeaponId};
use serde::Serialize;
use std::collections::BTreeMap;

/// Tallies for one player on one in-match loadout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadoutStat {
    pub kill_points: i32,
    pub death_points: i32,
    pub kills: u32,
    pub deaths: u32,
    pub suicides: u32,
    pub team_kills: u32,
    /// Kills made with banned weapons, by weapon id
    pub illegal_weapons: BTreeMap<WeaponId, u32>,
}

impl LoadoutStat {
    pub fn add_kill(&mut self, points: i32) {
        self.kills += 1;
        self.kill_points += points;
    }

    pub fn add_death(&mut self, points: i32) {
        self.deaths += 1;
        self.death_points += points;
    }

    pub fn add_suicide(&mut self) {
        self.suicides += 1;
    }

    pub fn add_team_kill(&mut self) {
        self.team_kills += 1;
    }

    pub fn add_illegal_weapon(&mut self, weapon: WeaponId) {
        *self.illegal_weapons.entry(weapon).or_insert(0) += 1;
    }
}

/// All loadout tallies of a single player
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerScore {
    pub player_id: PlayerId,
    pub name: String,
    pub telemetry_id: TelemetryId,
    pub loadouts: BTreeMap<LoadoutId, LoadoutStat>,
}

impl PlayerScore {
    pub fn new(player: &Player) -> Self {
        Self {
            player_id: player.id,
            name: player.name.clone(),
            telemetry_id: player.telemetry_id,
            loadouts: BTreeMap::new(),
        }
    }

    pub fn loadout_mut(&mut self, loadout: LoadoutId) -> &mut LoadoutStat {
        self.loadouts.entry(loadout).or_default()
    }

    pub fn kill_points(&self) -> i32 {
        self.loadouts.values().map(|l| l.kill_points).sum()
    }

    pub fn death_points(&self) -> i32 {
        self.loadouts.values().map(|l| l.death_points).sum()
    }

    pub fn kills(&self) -> u32 {
        self.loadouts.values().map(|l| l.kills).sum()
    }

    pub fn deaths(&self) -> u32 {
        self.loadouts.values().map(|l| l.deaths).sum()
    }

    pub fn team_kills(&self) -> u32 {
        self.loadouts.values().map(|l| l.team_kills).sum()
    }

    pub fn suicides(&self) -> u32 {
        self.loadouts.values().map(|l| l.suicides).sum()
    }

    /// Illegal weapon hits summed over loadouts
    pub fn illegal_weapons(&self) -> BTreeMap<WeaponId, u32> {
        let mut totals = BTreeMap::new();
        for loadout in self.loadouts.values() {
            for (weapon, count) in &loadout.illegal_weapons {
                *totals.entry(*weapon).or_insert(0) += count;
            }
        }
        totals
    }
}

/// Score aggregator of a ready team
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamScore {
    pub team_name: String,
    players: BTreeMap<PlayerId, PlayerScore>,
    pub capture_points: i32,
}

impl TeamScore {
    pub fn new<'a>(team_name: &str, players: impl IntoIterator<Item = &'a Player>) -> Self {
        Self {
            team_name: team_name.to_string(),
            players: players
                .into_iter()
                .map(|p| (p.id, PlayerScore::new(p)))
                .collect(),
            capture_points: 0,
        }
    }

    /// Start tracking a player who joined after the team became ready
    pub fn track(&mut self, player: &Player) {
        self.players
            .entry(player.id)
            .or_insert_with(|| PlayerScore::new(player));
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerScore> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut PlayerScore> {
        self.players.get_mut(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerScore> {
        self.players.values()
    }

    pub fn add_capture(&mut self, points: i32) {
        self.capture_points += points;
    }

    pub fn kill_points(&self) -> i32 {
        self.players.values().map(|p| p.kill_points()).sum()
    }

    pub fn death_points(&self) -> i32 {
        self.players.values().map(|p| p.death_points()).sum()
    }

    /// Kill points plus capture points
    pub fn total(&self) -> i32 {
        self.kill_points() + self.capture_points
    }

    pub fn net(&self) -> i32 {
        self.total() - self.death_points()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_totals_span_loadouts() {
        let player = Player::new(1, "alpha", 100);
        let mut score = PlayerScore::new(&player);

        score.loadout_mut(3).add_kill(2);
        score.loadout_mut(3).add_illegal_weapon(80);
        score.loadout_mut(5).add_kill(1);
        score.loadout_mut(5).add_death(2);
        score.loadout_mut(5).add_illegal_weapon(80);

        assert_eq!(score.kill_points(), 3);
        assert_eq!(score.kills(), 2);
        assert_eq!(score.death_points(), 2);
        assert_eq!(score.illegal_weapons().get(&80), Some(&2));
    }

    #[test]
    fn test_team_totals() {
        let players = vec![Player::new(1, "alpha", 100), Player::new(2, "bravo", 200)];
        let mut score = TeamScore::new("Team A", &players);

        score.player_mut(1).unwrap().loadout_mut(1).add_kill(3);
        score.player_mut(2).unwrap().loadout_mut(1).add_death(2);
        score.add_capture(15);

        assert_eq!(score.total(), 18);
        assert_eq!(score.net(), 16);
        assert_eq!(score.players().count(), 2);
    }
}
