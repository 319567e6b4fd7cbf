//! One side of a match: ordered roster, faction and readiness

use crate::error::{MatchmakingError, Result};
use crate::score::TeamScore;
use crate::team::roster::RosterEntry;
use crate::types::{Faction, Player, PlayerId, TeamId};
use serde::Serialize;
use tracing::debug;

/// Slot of the captain in every roster
pub const CAPTAIN_SLOT: usize = 0;

/// A team roster. Slot 0 always holds the captain.
#[derive(Debug, Clone, Serialize)]
pub struct Team {
    id: TeamId,
    name: String,
    roster: Vec<RosterEntry>,
    faction: Option<Faction>,
    ready: bool,
    #[serde(skip)]
    score: Option<TeamScore>,
}

impl Team {
    pub fn new(id: TeamId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            roster: Vec::new(),
            faction: None,
            ready: false,
            score: None,
        }
    }

    pub fn id(&self) -> TeamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append an entry. A captain is only valid for an empty roster and a
    /// regular entry needs a captain in place.
    pub fn add_player(&mut self, entry: RosterEntry) -> Result<usize> {
        match (entry.is_captain(), self.roster.is_empty()) {
            (true, false) => {
                return Err(MatchmakingError::invalid_action(format!(
                    "{} already has a captain",
                    self.name
                ))
                .into())
            }
            (false, true) => {
                return Err(MatchmakingError::invalid_action(format!(
                    "{} has no captain yet",
                    self.name
                ))
                .into())
            }
            _ => {}
        }

        if let Some(score) = self.score.as_mut() {
            score.track(entry.player());
        }
        self.roster.push(entry);
        Ok(self.roster.len() - 1)
    }

    /// Replace the player at `slot`, keeping the role (and the captain's turn).
    /// Returns the player that left.
    pub fn substitute(&mut self, slot: usize, player: Player) -> Result<Player> {
        let team_name = self.name.clone();
        let entry = self
            .roster
            .get_mut(slot)
            .ok_or_else(|| MatchmakingError::not_found("Roster slot", format!("{}#{}", team_name, slot)))?;

        if let Some(score) = self.score.as_mut() {
            score.track(&player);
        }
        let previous = entry.replace_player(player);
        debug!(
            "Substituted slot {} of {} - out: {}, in: {}",
            slot,
            self.name,
            previous.name,
            entry.player().name
        );
        Ok(previous)
    }

    /// Exchange two regular slots
    pub fn swap(&mut self, a: usize, b: usize) -> Result<()> {
        if a == CAPTAIN_SLOT || b == CAPTAIN_SLOT {
            return Err(MatchmakingError::invalid_action("The captain cannot be swapped").into());
        }
        if a >= self.roster.len() || b >= self.roster.len() {
            return Err(MatchmakingError::not_found("Roster slot", format!("{}/{}", a, b)).into());
        }
        self.roster.swap(a, b);
        Ok(())
    }

    /// Put `entry` in a regular slot, returning the entry that was there
    pub fn replace_entry(&mut self, slot: usize, entry: RosterEntry) -> Result<RosterEntry> {
        if slot == CAPTAIN_SLOT || entry.is_captain() {
            return Err(MatchmakingError::invalid_action("Captains cannot be exchanged").into());
        }
        let current = self
            .roster
            .get_mut(slot)
            .ok_or_else(|| MatchmakingError::not_found("Roster slot", slot))?;

        if let Some(score) = self.score.as_mut() {
            score.track(entry.player());
        }
        Ok(std::mem::replace(current, entry))
    }

    /// Replace a captain who is alone on the team, carrying over the turn
    pub fn replace_captain(&mut self, player: Player) -> Result<Player> {
        if self.roster.len() != 1 {
            return Err(MatchmakingError::invalid_action(format!(
                "{} captain is not the sole roster member",
                self.name
            ))
            .into());
        }
        self.substitute(CAPTAIN_SLOT, player)
    }

    /// Toggle readiness. Activation creates the score aggregator seeded with
    /// every roster player; deactivation discards it.
    pub fn on_ready(&mut self, ready: bool) {
        self.ready = ready;
        if ready {
            let score = TeamScore::new(&self.name, self.roster.iter().map(|e| e.player()));
            self.score = Some(score);
        } else {
            self.score = None;
        }
    }

    /// Empty the roster and return the released players
    pub fn clear(&mut self) -> Vec<Player> {
        self.faction = None;
        self.on_ready(false);
        self.roster
            .drain(..)
            .map(RosterEntry::into_player)
            .collect()
    }

    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    pub fn entry(&self, slot: usize) -> Option<&RosterEntry> {
        self.roster.get(slot)
    }

    pub fn entry_mut(&mut self, slot: usize) -> Option<&mut RosterEntry> {
        self.roster.get_mut(slot)
    }

    pub fn captain(&self) -> Option<&RosterEntry> {
        self.roster.first()
    }

    pub fn captain_mut(&mut self) -> Option<&mut RosterEntry> {
        self.roster.first_mut()
    }

    pub fn slot_of(&self, player_id: PlayerId) -> Option<usize> {
        self.roster.iter().position(|e| e.player().id == player_id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.roster.iter().map(|e| e.player())
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    /// The captain's handshake flag
    pub fn turn(&self) -> bool {
        self.captain().map(|c| c.turn()).unwrap_or(false)
    }

    pub fn set_turn(&mut self, turn: bool) {
        if let Some(captain) = self.captain_mut() {
            captain.set_turn(turn);
        }
    }

    pub fn faction(&self) -> Option<Faction> {
        self.faction
    }

    pub fn set_faction(&mut self, faction: Option<Faction>) {
        self.faction = faction;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn score(&self) -> Option<&TeamScore> {
        self.score.as_ref()
    }

    pub fn score_mut(&mut self) -> Option<&mut TeamScore> {
        self.score.as_mut()
    }

    /// Players who borrowed an account but have not validated it yet
    pub fn unvalidated_players(&self) -> Vec<&Player> {
        self.roster
            .iter()
            .filter(|e| !e.is_account_ready())
            .map(|e| e.player())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team_with(count: u64) -> Team {
        let mut team = Team::new(TeamId::First, "Team alpha");
        team.add_player(RosterEntry::captain(Player::new(1, "alpha", 100)))
            .unwrap();
        for id in 2..=count {
            team.add_player(RosterEntry::regular(Player::new(id, format!("p{}", id), id * 100)))
                .unwrap();
        }
        team
    }

    #[test]
    fn test_captain_only_on_empty_roster() {
        let mut team = Team::new(TeamId::First, "Team alpha");
        assert!(team
            .add_player(RosterEntry::regular(Player::new(2, "bravo", 200)))
            .is_err());

        assert_eq!(
            team.add_player(RosterEntry::captain(Player::new(1, "alpha", 100)))
                .unwrap(),
            CAPTAIN_SLOT
        );
        assert!(team
            .add_player(RosterEntry::captain(Player::new(3, "charlie", 300)))
            .is_err());
        assert_eq!(team.len(), 1);
    }

    #[test]
    fn test_substitute_captain_preserves_turn() {
        let mut team = team_with(3);
        team.set_turn(true);

        let previous = team.substitute(CAPTAIN_SLOT, Player::new(9, "zulu", 900)).unwrap();
        assert_eq!(previous.id, 1);
        assert_eq!(team.captain().unwrap().player().id, 9);
        assert!(team.turn());
        assert_eq!(team.slot_of(9), Some(0));
    }

    #[test]
    fn test_swap_excludes_captain() {
        let mut team = team_with(3);
        assert!(team.swap(0, 1).is_err());
        assert!(team.swap(1, 5).is_err());

        team.swap(1, 2).unwrap();
        assert_eq!(team.entry(1).unwrap().player().id, 3);
        assert_eq!(team.entry(2).unwrap().player().id, 2);
    }

    #[test]
    fn test_ready_creates_and_discards_score() {
        let mut team = team_with(3);
        assert!(team.score().is_none());

        team.on_ready(true);
        assert!(team.is_ready());
        let score = team.score().unwrap();
        assert_eq!(score.players().count(), 3);
        assert!(score.player(2).is_some());

        team.substitute(2, Player::new(7, "golf", 700)).unwrap();
        assert!(team.score().unwrap().player(7).is_some());

        team.on_ready(false);
        assert!(team.score().is_none());
    }

    #[test]
    fn test_replace_captain_requires_sole_member() {
        let mut team = team_with(2);
        assert!(team.replace_captain(Player::new(5, "echo", 500)).is_err());

        let mut alone = team_with(1);
        alone.set_turn(true);
        let resigned = alone.replace_captain(Player::new(5, "echo", 500)).unwrap();
        assert_eq!(resigned.id, 1);
        assert!(alone.turn());
    }

    #[test]
    fn test_clear_releases_everyone() {
        let mut team = team_with(4);
        team.set_faction(Some(Faction::Vanu));
        team.on_ready(true);

        let released = team.clear();
        assert_eq!(released.len(), 4);
        assert!(team.is_empty());
        assert_eq!(team.faction(), None);
        assert!(!team.is_ready());
        assert!(team.score().is_none());
    }
}
