//! A single match slot and its state machine
//!
//! The match owns both teams, the unassigned player pool, the map selector and
//! the round timers. Every operation checks the current [`MatchStatus`] and
//! rejects decisions that are out of phase or out of turn with
//! `InvalidAction`; transitions only ever follow
//! [`MatchStatus::can_transition_to`].

use crate::config::MatchmakingSettings;
use crate::error::{MatchmakingError, Result};
use crate::maps::{MapSelector, MapStatus};
use crate::matches::state::MatchStatus;
use crate::score::{RoundContext, TeamScore};
use crate::team::{RosterEntry, Team, CAPTAIN_SLOT};
use crate::timer::TimerScheduler;
use crate::types::{
    AccountAssignment, Faction, GameMap, MatchId, Player, PlayerId, RoundWindow, TeamId,
};
use rand::seq::IteratorRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Rounds played before a match is over
pub const MAX_ROUNDS: u32 = 2;

/// Where the draft stands after a pick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftProgress {
    Continue { next: TeamId },
    /// Pool empty, faction pick starts with the second team
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickReport {
    pub team: TeamId,
    pub picked: Player,
    /// The last pool player, assigned without a pick
    pub auto_picked: Option<(TeamId, Player)>,
    pub progress: DraftProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactionOutcome {
    /// The opponent already plays that faction; nothing changed
    Rejected { held_by: TeamId },
    OpponentTurn { next: TeamId },
    /// Both factions set, map negotiation started
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Players who still have to validate their lent account
    NotReady(Vec<String>),
    WaitingForOpponent,
    /// Both captains confirmed; the countdown may start
    Countdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEnd {
    NextRound { next: u32 },
    MatchOver,
}

/// Score totals of one team, for the after-round notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamSummary {
    pub team: TeamId,
    pub name: String,
    pub kill_points: i32,
    pub death_points: i32,
    pub capture_points: i32,
    pub net: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstituteReport {
    pub replaced: Player,
    /// `None` when the player was still in the pool
    pub team: Option<TeamId>,
    /// Lent account handed to the newcomer, still to be validated
    pub account: Option<AccountAssignment>,
}

#[derive(Debug, Clone)]
pub struct ClearReport {
    pub released: Vec<Player>,
    pub was_playing: bool,
    pub round_no: u32,
    pub summaries: Vec<TeamSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamSnapshot {
    pub id: TeamId,
    pub name: String,
    pub faction: Option<Faction>,
    pub ready: bool,
    pub turn: bool,
    pub roster: Vec<RosterEntry>,
    pub score: Option<TeamScore>,
}

/// Serialisable view of a match
#[derive(Debug, Clone, Serialize)]
pub struct MatchSnapshot {
    pub id: MatchId,
    pub status: MatchStatus,
    pub round_no: u32,
    pub teams: Vec<TeamSnapshot>,
    pub pool: Vec<Player>,
    pub map: Option<GameMap>,
    pub map_status: Option<MapStatus>,
}

#[derive(Debug)]
pub struct Match {
    id: MatchId,
    status: MatchStatus,
    /// Mirrors `status.is_free()`, readable without the match lock
    free: Arc<AtomicBool>,
    teams: Option<[Team; 2]>,
    pool: BTreeMap<PlayerId, Player>,
    map_selector: Option<Box<dyn MapSelector>>,
    /// Unix start time of every round played so far
    round_stamps: Vec<i64>,
    round_length: Duration,
    countdown: TimerScheduler,
    round_over: TimerScheduler,
}

impl Match {
    pub fn new(id: MatchId, settings: &MatchmakingSettings) -> Self {
        Self {
            id,
            status: MatchStatus::Free,
            free: Arc::new(AtomicBool::new(true)),
            teams: None,
            pool: BTreeMap::new(),
            map_selector: None,
            round_stamps: Vec::new(),
            round_length: settings.round_length(),
            countdown: TimerScheduler::new("match_countdown", settings.countdown_timer()),
            round_over: TimerScheduler::new("match_round_over", settings.round_over_timer()),
        }
    }

    pub fn id(&self) -> MatchId {
        self.id
    }

    pub fn status(&self) -> MatchStatus {
        self.status
    }

    /// Shared flag that tracks whether the match is FREE
    pub fn free_marker(&self) -> Arc<AtomicBool> {
        self.free.clone()
    }

    fn transition(&mut self, next: MatchStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            error!(
                "Invariant violated: match {} cannot go from {} to {}",
                self.id, self.status, next
            );
            return Err(MatchmakingError::invariant(format!(
                "match {} cannot go from {} to {}",
                self.id, self.status, next
            ))
            .into());
        }
        info!("Match {} status: {} -> {}", self.id, self.status, next);
        self.status = next;
        self.free.store(next.is_free(), Ordering::Release);
        Ok(())
    }

    fn expect_status(&self, expected: MatchStatus) -> Result<()> {
        if self.status != expected {
            return Err(MatchmakingError::invalid_action(format!(
                "Match {} is {}, not {}",
                self.id, self.status, expected
            ))
            .into());
        }
        Ok(())
    }

    fn teams_ref(&self) -> Result<&[Team; 2]> {
        self.teams.as_ref().ok_or_else(|| {
            MatchmakingError::invariant(format!("match {} has no teams", self.id)).into()
        })
    }

    pub fn teams(&self) -> Option<&[Team; 2]> {
        self.teams.as_ref()
    }

    pub fn teams_mut(&mut self) -> Result<&mut [Team; 2]> {
        let id = self.id;
        self.teams.as_mut().ok_or_else(|| {
            MatchmakingError::invariant(format!("match {} has no teams", id)).into()
        })
    }

    fn expect_turn(&self, team: TeamId) -> Result<()> {
        let teams = self.teams_ref()?;
        if !teams[team.index()].turn() {
            return Err(MatchmakingError::invalid_action(format!(
                "It is not {}'s turn",
                teams[team.index()].name()
            ))
            .into());
        }
        Ok(())
    }

    /// Fill the pool, draw one captain per team and give the first team the turn
    pub fn launch<R: Rng + ?Sized>(
        &mut self,
        players: Vec<Player>,
        selector: Box<dyn MapSelector>,
        rng: &mut R,
    ) -> Result<[PlayerId; 2]> {
        self.expect_status(MatchStatus::Free)?;
        if players.len() < 2 {
            return Err(MatchmakingError::invalid_action(format!(
                "A match needs at least 2 players, got {}",
                players.len()
            ))
            .into());
        }

        self.pool = players.into_iter().map(|p| (p.id, p)).collect();

        let mut teams = [
            Team::new(TeamId::First, "Team 1"),
            Team::new(TeamId::Second, "Team 2"),
        ];
        let mut captains = [0; 2];
        for team in teams.iter_mut() {
            let captain = self
                .pool
                .keys()
                .copied()
                .choose(rng)
                .and_then(|key| self.pool.remove(&key))
                .ok_or_else(|| MatchmakingError::invariant("pool emptied while drawing captains"))?;
            captains[team.id().index()] = captain.id;
            team.add_player(RosterEntry::captain(captain))?;
        }
        teams[0].set_turn(true);

        self.teams = Some(teams);
        self.map_selector = Some(selector);
        self.transition(MatchStatus::Picking)?;

        info!(
            "Match {} launched - captains: {:?}, pool: {}",
            self.id,
            captains,
            self.pool.len()
        );

        if self.pool.is_empty() {
            self.finish_draft()?;
        }
        Ok(captains)
    }

    fn finish_draft(&mut self) -> Result<()> {
        let teams = self.teams_mut()?;
        teams[1].set_turn(true);
        teams[0].set_turn(false);
        self.transition(MatchStatus::Faction)
    }

    /// Move a pool player to `team`. Passes the turn, and auto-assigns the
    /// last pool player to whoever holds it.
    pub fn pick(&mut self, team: TeamId, player_id: PlayerId) -> Result<PickReport> {
        self.expect_status(MatchStatus::Picking)?;
        self.expect_turn(team)?;

        let picked = self.pool.remove(&player_id).ok_or_else(|| {
            MatchmakingError::invalid_action(format!(
                "Player {} is not in the pool of match {}",
                player_id, self.id
            ))
        })?;
        self.assign(team, picked.clone())?;
        debug!("Match {} - {} picked {}", self.id, team, picked.name);

        let mut auto_picked = None;
        if self.pool.len() == 1 {
            let other = team.opponent();
            if let Some((_, last)) = self.pool.pop_first() {
                info!(
                    "Match {} - last player {} auto-assigned to {}",
                    self.id, last.name, other
                );
                self.assign(other, last.clone())?;
                auto_picked = Some((other, last));
            }
        }

        let progress = if self.pool.is_empty() {
            self.finish_draft()?;
            DraftProgress::Complete
        } else {
            DraftProgress::Continue {
                next: team.opponent(),
            }
        };

        Ok(PickReport {
            team,
            picked,
            auto_picked,
            progress,
        })
    }

    fn assign(&mut self, team: TeamId, player: Player) -> Result<()> {
        let teams = self.teams_mut()?;
        teams[team.index()].add_player(RosterEntry::regular(player))?;
        teams[team.index()].set_turn(false);
        teams[team.opponent().index()].set_turn(true);
        Ok(())
    }

    pub fn pick_faction(&mut self, team: TeamId, faction: Faction) -> Result<FactionOutcome> {
        self.expect_status(MatchStatus::Faction)?;
        self.expect_turn(team)?;

        let other = team.opponent();
        let teams = self.teams_mut()?;
        if teams[other.index()].faction() == Some(faction) {
            debug!("Faction {} already taken by {}", faction, other);
            return Ok(FactionOutcome::Rejected { held_by: other });
        }

        teams[team.index()].set_faction(Some(faction));
        teams[team.index()].set_turn(false);

        if teams[other.index()].faction().is_none() {
            teams[other.index()].set_turn(true);
            return Ok(FactionOutcome::OpponentTurn { next: other });
        }

        for team in teams.iter_mut() {
            team.set_turn(true);
        }
        self.transition(MatchStatus::Mapping)?;
        Ok(FactionOutcome::Complete)
    }

    fn selector_mut(&mut self) -> Result<&mut Box<dyn MapSelector>> {
        let id = self.id;
        self.map_selector.as_mut().ok_or_else(|| {
            MatchmakingError::invariant(format!("match {} has no map selector", id)).into()
        })
    }

    /// Propose a map. A successful proposal hands the turn to the other captain.
    pub fn select_map(&mut self, team: TeamId, query: &str) -> Result<Option<GameMap>> {
        self.expect_status(MatchStatus::Mapping)?;
        self.expect_turn(team)?;

        let selected = self.selector_mut()?.select(query);
        if selected.is_some() {
            let teams = self.teams_mut()?;
            teams[team.index()].set_turn(false);
            teams[team.opponent().index()].set_turn(true);
        }
        Ok(selected)
    }

    /// Accept the proposal of the other captain
    pub fn confirm_map(&mut self, team: TeamId) -> Result<GameMap> {
        self.expect_status(MatchStatus::Mapping)?;
        self.expect_turn(team)?;

        let selector = self.selector_mut()?;
        if selector.status() != MapStatus::Selected || !selector.confirm() {
            return Err(MatchmakingError::invalid_action("No map has been selected").into());
        }
        selector
            .map()
            .cloned()
            .ok_or_else(|| MatchmakingError::invariant("confirmed selector without map").into())
    }

    pub fn map_confirmed(&self) -> bool {
        self.map_selector
            .as_ref()
            .is_some_and(|s| s.status() == MapStatus::Confirmed)
    }

    pub fn map(&self) -> Option<&GameMap> {
        self.map_selector.as_ref().and_then(|s| s.map())
    }

    /// Leave map negotiation; returns the players who must borrow an account
    pub fn begin_preparation(&mut self) -> Result<Vec<PlayerId>> {
        self.expect_status(MatchStatus::Mapping)?;
        if !self.map_confirmed() {
            return Err(MatchmakingError::invalid_action("The map is not confirmed").into());
        }
        self.transition(MatchStatus::Starting)?;

        Ok(self
            .teams_ref()?
            .iter()
            .flat_map(|t| t.roster())
            .filter(|e| e.needs_account())
            .map(|e| e.player().id)
            .collect())
    }

    /// Hand lent accounts to their players, mark both teams ready and open the
    /// ready-check
    pub fn assign_accounts(&mut self, assignments: Vec<(PlayerId, AccountAssignment)>) -> Result<()> {
        self.expect_status(MatchStatus::Starting)?;
        for (player_id, account) in assignments {
            self.give_account(player_id, account)?;
        }

        let teams = self.teams_mut()?;
        for team in teams.iter_mut() {
            team.on_ready(true);
            team.set_turn(true);
        }
        self.transition(MatchStatus::Waiting)
    }

    /// Hand a lent account to one rostered player
    pub fn give_account(&mut self, player_id: PlayerId, account: AccountAssignment) -> Result<()> {
        let match_id = self.id;
        let entry = self
            .teams_mut()?
            .iter_mut()
            .find_map(|t| {
                let slot = t.slot_of(player_id)?;
                t.entry_mut(slot)
            })
            .ok_or_else(|| {
                MatchmakingError::invariant(format!(
                    "account lent to player {} who is not rostered in match {}",
                    player_id, match_id
                ))
            })?;
        entry.set_account(Some(account));
        Ok(())
    }

    /// A player confirmed they logged into their lent account
    pub fn validate_account(&mut self, player_id: PlayerId) -> Result<()> {
        if !matches!(self.status, MatchStatus::Waiting | MatchStatus::Starting) {
            return Err(MatchmakingError::invalid_action(format!(
                "Match {} is not handing out accounts",
                self.id
            ))
            .into());
        }
        let entry = self
            .teams_mut()?
            .iter_mut()
            .find_map(|t| {
                let slot = t.slot_of(player_id)?;
                t.entry_mut(slot)
            })
            .ok_or_else(|| MatchmakingError::not_found("Player", player_id))?;

        match entry.account_mut() {
            Some(account) => {
                account.validated = true;
                Ok(())
            }
            None => Err(MatchmakingError::invalid_action(format!(
                "{} has no lent account",
                entry.player().name
            ))
            .into()),
        }
    }

    /// Ready-check: a captain confirms by clearing their own turn
    pub fn team_ready(&mut self, team: TeamId) -> Result<ReadyOutcome> {
        self.expect_status(MatchStatus::Waiting)?;
        self.expect_turn(team)?;

        let teams = self.teams_mut()?;
        let not_ready: Vec<String> = teams[team.index()]
            .unvalidated_players()
            .into_iter()
            .map(|p| p.name.clone())
            .collect();
        if !not_ready.is_empty() {
            return Ok(ReadyOutcome::NotReady(not_ready));
        }

        teams[team.index()].set_turn(false);
        if teams[team.opponent().index()].turn() {
            return Ok(ReadyOutcome::WaitingForOpponent);
        }

        self.transition(MatchStatus::Starting)?;
        Ok(ReadyOutcome::Countdown)
    }

    /// Run the pre-round countdown; the action receives the step number
    pub fn start_countdown<F, Fut>(&mut self, action: F) -> bool
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.countdown.start(action)
    }

    /// Open a round at `now`; returns its number
    pub fn start_round(&mut self, now: i64) -> Result<u32> {
        self.expect_status(MatchStatus::Starting)?;
        self.round_stamps.push(now);
        self.transition(MatchStatus::Playing)?;
        Ok(self.round_no())
    }

    pub fn schedule_round_over<F, Fut>(&mut self, action: F) -> bool
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.round_over.start(action)
    }

    /// Time window of the round in progress (or just finished)
    pub fn current_round_window(&self) -> Option<RoundWindow> {
        self.round_stamps
            .last()
            .map(|&start| RoundWindow::new(start, start + self.round_length.as_secs() as i64))
    }

    pub fn round_context(&self) -> Result<RoundContext> {
        let window = self.current_round_window().ok_or_else(|| {
            MatchmakingError::invariant(format!("match {} has no round stamp", self.id))
        })?;
        Ok(RoundContext {
            match_id: self.id,
            window,
            facility_id: self.map().map(|m| m.facility_id),
        })
    }

    /// Close the round and reopen the ready-check
    pub fn end_round(&mut self) -> Result<RoundEnd> {
        self.expect_status(MatchStatus::Playing)?;
        let played = self.round_stamps.len() as u32;
        self.transition(MatchStatus::Waiting)?;
        for team in self.teams_mut()?.iter_mut() {
            team.set_turn(true);
        }

        if played >= MAX_ROUNDS {
            Ok(RoundEnd::MatchOver)
        } else {
            Ok(RoundEnd::NextRound { next: played + 1 })
        }
    }

    /// Round being played, or about to be played
    pub fn round_no(&self) -> u32 {
        let played = self.round_stamps.len() as u32;
        match self.status {
            MatchStatus::Playing => played,
            MatchStatus::Starting | MatchStatus::Waiting => played + 1,
            _ => 0,
        }
    }

    /// A captain alone on their team hands the captaincy to a random pool
    /// player. Returns the new captain, or `None` when the team already has
    /// members.
    pub fn resign<R: Rng + ?Sized>(&mut self, team: TeamId, rng: &mut R) -> Result<Option<Player>> {
        self.expect_status(MatchStatus::Picking)?;
        if self.teams_ref()?[team.index()].len() > 1 {
            return Ok(None);
        }

        let replacement = self
            .pool
            .keys()
            .copied()
            .choose(rng)
            .and_then(|key| self.pool.remove(&key))
            .ok_or_else(|| MatchmakingError::invariant("resign with an empty pool"))?;

        let teams = self.teams_mut()?;
        let resigned = teams[team.index()].replace_captain(replacement.clone())?;
        info!(
            "Match {} - {} resigned, {} is captain of {}",
            self.id, resigned.name, replacement.name, team
        );
        self.pool.insert(resigned.id, resigned);
        Ok(Some(replacement))
    }

    fn check_substitute(&self, player_id: PlayerId, newcomer: &Player) -> Result<()> {
        if self.status.is_free() || !self.contains_player(player_id) {
            return Err(MatchmakingError::not_found("Player", player_id).into());
        }
        if self.contains_player(newcomer.id) {
            return Err(MatchmakingError::invalid_action(format!(
                "{} is already in match {}",
                newcomer.name, self.id
            ))
            .into());
        }
        Ok(())
    }

    /// Whether replacing `player_id` with `newcomer` needs a freshly lent
    /// account: the newcomer has none of their own, joins a ready team and the
    /// leaving player holds no lent account to pass on.
    pub fn substitute_needs_account(&self, player_id: PlayerId, newcomer: &Player) -> Result<bool> {
        self.check_substitute(player_id, newcomer)?;
        if newcomer.has_own_account {
            return Ok(false);
        }
        Ok(self.teams.as_ref().is_some_and(|teams| {
            teams.iter().any(|team| {
                team.is_ready()
                    && team
                        .slot_of(player_id)
                        .and_then(|slot| team.entry(slot))
                        .is_some_and(|entry| entry.account().is_none())
            })
        }))
    }

    /// Replace a pool or roster player with an idle one. A captain keeps the turn.
    ///
    /// In a ready team a newcomer without a personal account takes `lent`, or
    /// else the leaving player's lent account, unvalidated.
    pub fn substitute(
        &mut self,
        player_id: PlayerId,
        newcomer: Player,
        lent: Option<AccountAssignment>,
    ) -> Result<SubstituteReport> {
        self.check_substitute(player_id, &newcomer)?;

        if let Some(replaced) = self.pool.remove(&player_id) {
            self.pool.insert(newcomer.id, newcomer);
            return Ok(SubstituteReport {
                replaced,
                team: None,
                account: None,
            });
        }

        let teams = self.teams_mut()?;
        for team in teams.iter_mut() {
            let Some(slot) = team.slot_of(player_id) else {
                continue;
            };
            let inherited = team
                .entry(slot)
                .and_then(|entry| entry.account().cloned())
                .map(|account| AccountAssignment {
                    validated: false,
                    ..account
                });
            let borrows = team.is_ready() && !newcomer.has_own_account;
            let replaced = team.substitute(slot, newcomer)?;

            let account = if borrows { lent.or(inherited) } else { None };
            if let Some(account) = &account {
                if let Some(entry) = team.entry_mut(slot) {
                    entry.set_account(Some(account.clone()));
                }
            }
            return Ok(SubstituteReport {
                replaced,
                team: Some(team.id()),
                account,
            });
        }

        Err(MatchmakingError::not_found("Player", player_id).into())
    }

    /// Exchange two regular players, within a team or across teams
    pub fn swap_players(&mut self, first: PlayerId, second: PlayerId) -> Result<()> {
        if matches!(self.status, MatchStatus::Free | MatchStatus::Playing) {
            return Err(MatchmakingError::invalid_action(format!(
                "Players of match {} cannot be swapped while {}",
                self.id, self.status
            ))
            .into());
        }

        let teams = self.teams_mut()?;
        let locate = |teams: &[Team; 2], id: PlayerId| {
            teams
                .iter()
                .find_map(|t| t.slot_of(id).map(|slot| (t.id(), slot)))
                .ok_or_else(|| MatchmakingError::not_found("Player", id))
        };
        let (team_a, slot_a) = locate(&*teams, first)?;
        let (team_b, slot_b) = locate(&*teams, second)?;
        if slot_a == CAPTAIN_SLOT || slot_b == CAPTAIN_SLOT {
            return Err(MatchmakingError::invalid_action("Captains cannot be swapped").into());
        }

        if team_a == team_b {
            return teams[team_a.index()].swap(slot_a, slot_b);
        }

        let entry_a = teams[team_a.index()]
            .entry(slot_a)
            .cloned()
            .ok_or_else(|| MatchmakingError::not_found("Player", first))?;
        let entry_b = teams[team_b.index()]
            .entry(slot_b)
            .cloned()
            .ok_or_else(|| MatchmakingError::not_found("Player", second))?;
        teams[team_a.index()].replace_entry(slot_a, entry_b)?;
        teams[team_b.index()].replace_entry(slot_b, entry_a)?;
        Ok(())
    }

    /// Score totals of both teams; empty before the teams are ready
    pub fn team_summaries(&self) -> Vec<TeamSummary> {
        self.teams
            .iter()
            .flatten()
            .filter_map(|team| {
                team.score().map(|score| TeamSummary {
                    team: team.id(),
                    name: team.name().to_string(),
                    kill_points: score.kill_points(),
                    death_points: score.death_points(),
                    capture_points: score.capture_points,
                    net: score.net(),
                })
            })
            .collect()
    }

    /// Abort or finish the match: cancel timers, release every player and the
    /// map, and return to FREE
    pub fn clear(&mut self) -> Result<ClearReport> {
        if self.status.is_free() {
            return Err(MatchmakingError::invalid_action(format!(
                "Match {} is already free",
                self.id
            ))
            .into());
        }

        self.countdown.cancel();
        let was_playing = self.status == MatchStatus::Playing;
        if self.round_over.cancel() && !was_playing {
            warn!("Match {} had a round timer outside of play", self.id);
        }

        let round_no = self.round_no();
        let summaries = if was_playing {
            self.team_summaries()
        } else {
            Vec::new()
        };

        let mut released: Vec<Player> = std::mem::take(&mut self.pool).into_values().collect();
        if let Some(mut teams) = self.teams.take() {
            for team in teams.iter_mut() {
                released.extend(team.clear());
            }
        }
        if let Some(mut selector) = self.map_selector.take() {
            selector.release();
        }
        self.round_stamps.clear();
        self.transition(MatchStatus::Free)?;

        info!(
            "Match {} cleared - released players: {}, was playing: {}",
            self.id,
            released.len(),
            was_playing
        );
        Ok(ClearReport {
            released,
            was_playing,
            round_no,
            summaries,
        })
    }

    /// Team of which `player_id` is captain
    pub fn captain_team(&self, player_id: PlayerId) -> Option<TeamId> {
        self.teams.as_ref().and_then(|teams| {
            teams
                .iter()
                .find(|t| t.captain().is_some_and(|c| c.player().id == player_id))
                .map(|t| t.id())
        })
    }

    pub fn contains_player(&self, player_id: PlayerId) -> bool {
        self.pool.contains_key(&player_id)
            || self
                .teams
                .as_ref()
                .is_some_and(|teams| teams.iter().any(|t| t.slot_of(player_id).is_some()))
    }

    pub fn pool(&self) -> impl Iterator<Item = &Player> {
        self.pool.values()
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Every player held by the match, pool and rosters
    pub fn player_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.pool.keys().copied().collect();
        if let Some(teams) = &self.teams {
            ids.extend(teams.iter().flat_map(|t| t.players().map(|p| p.id)));
        }
        ids
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        let teams = self
            .teams
            .iter()
            .flatten()
            .map(|team| TeamSnapshot {
                id: team.id(),
                name: team.name().to_string(),
                faction: team.faction(),
                ready: team.is_ready(),
                turn: team.turn(),
                roster: team.roster().to_vec(),
                score: team.score().cloned(),
            })
            .collect();

        MatchSnapshot {
            id: self.id,
            status: self.status,
            round_no: self.round_no(),
            teams,
            pool: self.pool.values().cloned().collect(),
            map: self
                .map_selector
                .as_ref()
                .and_then(|s| s.selection().cloned()),
            map_status: self.map_selector.as_ref().map(|s| s.status()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::{MapPool, MapSelectorFactory};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings() -> MatchmakingSettings {
        MatchmakingSettings::default()
    }

    fn players(count: u64) -> Vec<Player> {
        (1..=count)
            .map(|id| Player::new(id, format!("p{}", id), id * 10))
            .collect()
    }

    fn maps() -> MapPool {
        MapPool::new(vec![
            GameMap {
                id: 1,
                name: "Acan Southern Labs".to_string(),
                facility_id: 100,
            },
            GameMap {
                id: 2,
                name: "Chac Fusion Lab".to_string(),
                facility_id: 200,
            },
        ])
    }

    fn launched(count: u64, seed: u64) -> Match {
        let mut m = Match::new(1, &settings());
        let mut rng = StdRng::seed_from_u64(seed);
        m.launch(players(count), maps().create(1), &mut rng).unwrap();
        m
    }

    fn pool_ids(m: &Match) -> Vec<PlayerId> {
        m.pool().map(|p| p.id).collect()
    }

    /// Draft with the given pool order until the faction phase
    fn drafted(count: u64) -> Match {
        let mut m = launched(count, 7);
        while m.status() == MatchStatus::Picking {
            let team = TeamId::BOTH
                .into_iter()
                .find(|t| m.teams().unwrap()[t.index()].turn())
                .unwrap();
            let next = pool_ids(&m)[0];
            m.pick(team, next).unwrap();
        }
        m
    }

    fn at_waiting(count: u64) -> Match {
        let mut m = drafted(count);
        m.pick_faction(TeamId::Second, Faction::Vanu).unwrap();
        m.pick_faction(TeamId::First, Faction::TerranRepublic).unwrap();
        m.select_map(TeamId::First, "chac").unwrap().unwrap();
        m.confirm_map(TeamId::Second).unwrap();
        let needing = m.begin_preparation().unwrap();
        let assignments = needing
            .into_iter()
            .map(|id| {
                (
                    id,
                    AccountAssignment {
                        account_id: id as u32,
                        username: format!("acc{}", id),
                        validated: true,
                    },
                )
            })
            .collect();
        m.assign_accounts(assignments).unwrap();
        m
    }

    #[test]
    fn test_launch_draws_captains() {
        let m = launched(6, 1);
        assert_eq!(m.status(), MatchStatus::Picking);
        assert_eq!(m.pool_len(), 4);

        let teams = m.teams().unwrap();
        assert_eq!(teams[0].len(), 1);
        assert_eq!(teams[1].len(), 1);
        assert!(teams[0].turn());
        assert!(!teams[1].turn());
        assert_eq!(m.round_no(), 0);
    }

    #[test]
    fn test_launch_rejects_busy_slot() {
        let mut m = launched(4, 1);
        let mut rng = StdRng::seed_from_u64(2);
        assert!(m.launch(players(4), maps().create(1), &mut rng).is_err());
    }

    #[test]
    fn test_draft_scenario_auto_picks_last_player() {
        let mut m = launched(6, 3);
        let pool = pool_ids(&m);
        let (a, b, c, d) = (pool[0], pool[1], pool[2], pool[3]);

        assert!(m.pick(TeamId::Second, a).is_err(), "second team is not on turn");

        let report = m.pick(TeamId::First, a).unwrap();
        assert_eq!(report.progress, DraftProgress::Continue { next: TeamId::Second });
        m.pick(TeamId::Second, b).unwrap();
        let report = m.pick(TeamId::First, c).unwrap();

        let (team, last) = report.auto_picked.unwrap();
        assert_eq!(team, TeamId::Second);
        assert_eq!(last.id, d);
        assert_eq!(report.progress, DraftProgress::Complete);
        assert_eq!(m.status(), MatchStatus::Faction);
        assert_eq!(m.pool_len(), 0);

        let teams = m.teams().unwrap();
        assert_eq!(teams[1].slot_of(d), Some(2));
        assert!(teams[1].turn(), "second team proposes a faction first");
        assert!(!teams[0].turn());
    }

    #[test]
    fn test_pick_unknown_player_is_rejected() {
        let mut m = launched(6, 3);
        assert!(m.pick(TeamId::First, 999).is_err());
        assert_eq!(m.pool_len(), 4);
        assert!(m.teams().unwrap()[0].turn());
    }

    #[test]
    fn test_faction_pick_rejects_taken_faction() {
        let mut m = drafted(4);
        assert!(m.pick_faction(TeamId::First, Faction::Vanu).is_err());

        assert_eq!(
            m.pick_faction(TeamId::Second, Faction::Vanu).unwrap(),
            FactionOutcome::OpponentTurn { next: TeamId::First }
        );
        assert_eq!(
            m.pick_faction(TeamId::First, Faction::Vanu).unwrap(),
            FactionOutcome::Rejected { held_by: TeamId::Second }
        );
        let teams = m.teams().unwrap();
        assert_eq!(teams[0].faction(), None);
        assert!(teams[0].turn());

        assert_eq!(
            m.pick_faction(TeamId::First, Faction::NewConglomerate).unwrap(),
            FactionOutcome::Complete
        );
        assert_eq!(m.status(), MatchStatus::Mapping);
        let teams = m.teams().unwrap();
        assert!(teams[0].turn() && teams[1].turn());
    }

    #[test]
    fn test_map_handshake() {
        let mut m = drafted(4);
        m.pick_faction(TeamId::Second, Faction::Vanu).unwrap();
        m.pick_faction(TeamId::First, Faction::TerranRepublic).unwrap();

        assert!(m.confirm_map(TeamId::First).is_err(), "nothing selected yet");
        assert!(m.select_map(TeamId::First, "lab").unwrap().is_none(), "ambiguous");
        assert!(m.teams().unwrap()[0].turn());

        m.select_map(TeamId::First, "acan").unwrap().unwrap();
        assert!(m.confirm_map(TeamId::First).is_err(), "cannot confirm own proposal");

        let map = m.confirm_map(TeamId::Second).unwrap();
        assert_eq!(map.facility_id, 100);
        assert!(m.map_confirmed());
        assert_eq!(m.map().unwrap().id, 1);
    }

    #[test]
    fn test_preparation_lists_players_without_accounts() {
        let mut m = Match::new(1, &settings());
        let mut rng = StdRng::seed_from_u64(5);
        let mut roster = players(4);
        roster[0] = roster[0].clone().with_own_account();
        roster[1] = roster[1].clone().with_own_account();
        let single = MapPool::new(vec![GameMap {
            id: 9,
            name: "Nott".to_string(),
            facility_id: 900,
        }]);
        m.launch(roster, single.create(1), &mut rng).unwrap();
        while m.status() == MatchStatus::Picking {
            let team = TeamId::BOTH
                .into_iter()
                .find(|t| m.teams().unwrap()[t.index()].turn())
                .unwrap();
            let next = pool_ids(&m)[0];
            m.pick(team, next).unwrap();
        }
        m.pick_faction(TeamId::Second, Faction::Vanu).unwrap();
        m.pick_faction(TeamId::First, Faction::NewConglomerate).unwrap();
        assert!(m.map_confirmed(), "single map pool is confirmed");

        let mut needing = m.begin_preparation().unwrap();
        needing.sort_unstable();
        assert_eq!(needing, vec![3, 4]);
        assert_eq!(m.status(), MatchStatus::Starting);
    }

    #[test]
    fn test_ready_check_requires_both_captains_and_validated_accounts() {
        let mut m = drafted(4);
        m.pick_faction(TeamId::Second, Faction::Vanu).unwrap();
        m.pick_faction(TeamId::First, Faction::TerranRepublic).unwrap();
        m.select_map(TeamId::Second, "2").unwrap();
        m.confirm_map(TeamId::First).unwrap();
        let needing = m.begin_preparation().unwrap();
        let assignments: Vec<_> = needing
            .iter()
            .map(|&id| {
                (
                    id,
                    AccountAssignment {
                        account_id: id as u32,
                        username: format!("acc{}", id),
                        validated: false,
                    },
                )
            })
            .collect();
        m.assign_accounts(assignments).unwrap();
        assert_eq!(m.status(), MatchStatus::Waiting);
        assert_eq!(m.round_no(), 1);

        let outcome = m.team_ready(TeamId::First).unwrap();
        assert!(matches!(outcome, ReadyOutcome::NotReady(ref names) if names.len() == 2));

        for id in needing {
            m.validate_account(id).unwrap();
        }
        assert_eq!(m.team_ready(TeamId::First).unwrap(), ReadyOutcome::WaitingForOpponent);
        assert!(m.team_ready(TeamId::First).is_err(), "already confirmed");
        assert_eq!(m.team_ready(TeamId::Second).unwrap(), ReadyOutcome::Countdown);
        assert_eq!(m.status(), MatchStatus::Starting);
    }

    #[test]
    fn test_two_rounds_then_over() {
        let mut m = at_waiting(4);
        m.team_ready(TeamId::First).unwrap();
        m.team_ready(TeamId::Second).unwrap();

        assert_eq!(m.start_round(1_000).unwrap(), 1);
        assert_eq!(m.current_round_window(), Some(RoundWindow::new(1_000, 1_600)));
        let ctx = m.round_context().unwrap();
        assert_eq!(ctx.facility_id, Some(200));

        assert_eq!(m.end_round().unwrap(), RoundEnd::NextRound { next: 2 });
        assert_eq!(m.status(), MatchStatus::Waiting);
        assert_eq!(m.round_no(), 2);
        let teams = m.teams().unwrap();
        assert!(teams[0].turn() && teams[1].turn());

        m.team_ready(TeamId::Second).unwrap();
        m.team_ready(TeamId::First).unwrap();
        assert_eq!(m.start_round(2_000).unwrap(), 2);
        assert_eq!(m.end_round().unwrap(), RoundEnd::MatchOver);
    }

    #[test]
    fn test_resign_only_when_alone() {
        let mut m = launched(6, 11);
        let mut rng = StdRng::seed_from_u64(4);
        let old_captain = m.teams().unwrap()[0].captain().unwrap().player().id;

        let new_captain = m.resign(TeamId::First, &mut rng).unwrap().unwrap();
        let teams = m.teams().unwrap();
        assert_eq!(teams[0].captain().unwrap().player().id, new_captain.id);
        assert!(teams[0].turn(), "turn is inherited");
        assert!(m.pool().any(|p| p.id == old_captain));
        assert_eq!(m.pool_len(), 4);

        let pick = pool_ids(&m)[0];
        m.pick(TeamId::First, pick).unwrap();
        assert_eq!(m.resign(TeamId::First, &mut rng).unwrap(), None);
    }

    #[test]
    fn test_substitute_keeps_captain_turn() {
        let mut m = launched(6, 2);
        let captain = m.teams().unwrap()[0].captain().unwrap().player().id;

        let report = m.substitute(captain, Player::new(50, "sub", 500), None).unwrap();
        assert_eq!(report.replaced.id, captain);
        assert_eq!(report.team, Some(TeamId::First));
        assert!(report.account.is_none(), "team is not ready yet");
        assert_eq!(m.captain_team(50), Some(TeamId::First));
        assert!(m.teams().unwrap()[0].turn());

        let pooled = pool_ids(&m)[0];
        let report = m.substitute(pooled, Player::new(51, "sub2", 510), None).unwrap();
        assert_eq!(report.team, None);
        assert!(m.contains_player(51));
        assert!(!m.contains_player(pooled));

        assert!(m.substitute(51, Player::new(50, "dup", 500), None).is_err());
        assert!(m.substitute(99, Player::new(52, "nobody", 520), None).is_err());
    }

    #[test]
    fn test_substitute_into_ready_team_needs_account() {
        let mut m = at_waiting(4);
        let regular = m.teams().unwrap()[1].entry(1).unwrap().player().id;
        let owner = Player::new(59, "owner", 590).with_own_account();
        let report = m.substitute(regular, owner, None).unwrap();
        assert!(report.account.is_none());

        // The owner never borrowed, so there is nothing to pass on
        let late = Player::new(60, "late", 600);
        assert!(m.substitute_needs_account(59, &late).unwrap());

        let lent = AccountAssignment {
            account_id: 3,
            username: "pool3".to_string(),
            validated: false,
        };
        let report = m.substitute(59, late, Some(lent.clone())).unwrap();
        assert_eq!(report.account, Some(lent));
        assert!(m.teams().unwrap()[1].score().unwrap().player(60).is_some());
        assert_eq!(m.teams().unwrap()[1].unvalidated_players()[0].id, 60);

        m.validate_account(60).unwrap();
        assert!(m.teams().unwrap()[1].unvalidated_players().is_empty());
    }

    #[test]
    fn test_substitute_passes_lent_account_on() {
        let mut m = at_waiting(4);
        let regular = m.teams().unwrap()[1].entry(1).unwrap().player().id;
        let lent = AccountAssignment {
            account_id: 8,
            username: "pool8".to_string(),
            validated: true,
        };
        m.give_account(regular, lent).unwrap();

        let late = Player::new(61, "late", 610);
        assert!(!m.substitute_needs_account(regular, &late).unwrap());
        let report = m.substitute(regular, late, None).unwrap();

        let account = report.account.unwrap();
        assert_eq!(account.account_id, 8);
        assert!(!account.validated);
        assert_eq!(m.teams().unwrap()[1].unvalidated_players()[0].id, 61);
    }

    #[test]
    fn test_swap_across_teams() {
        let mut m = drafted(6);
        let a = m.teams().unwrap()[0].entry(1).unwrap().player().id;
        let b = m.teams().unwrap()[1].entry(2).unwrap().player().id;
        let captain = m.teams().unwrap()[1].captain().unwrap().player().id;

        assert!(m.swap_players(a, captain).is_err());
        m.swap_players(a, b).unwrap();

        let teams = m.teams().unwrap();
        assert_eq!(teams[0].slot_of(b), Some(1));
        assert_eq!(teams[1].slot_of(a), Some(2));
    }

    #[test]
    fn test_clear_releases_everyone() {
        let mut m = launched(6, 9);
        let first_pick = pool_ids(&m)[0];
        m.pick(TeamId::First, first_pick).unwrap();

        let report = m.clear().unwrap();
        assert_eq!(report.released.len(), 6);
        assert!(!report.was_playing);
        assert!(report.summaries.is_empty());
        assert_eq!(m.status(), MatchStatus::Free);
        assert!(m.teams().is_none());
        assert_eq!(m.pool_len(), 0);
        assert!(m.clear().is_err());
    }

    #[test]
    fn test_free_marker_follows_status() {
        let mut m = Match::new(1, &settings());
        let marker = m.free_marker();
        assert!(marker.load(Ordering::Acquire));

        let mut rng = StdRng::seed_from_u64(3);
        m.launch(players(4), maps().create(1), &mut rng).unwrap();
        assert!(!marker.load(Ordering::Acquire));

        m.clear().unwrap();
        assert!(marker.load(Ordering::Acquire));
    }

    #[test]
    fn test_clear_mid_round_summarises() {
        let mut m = at_waiting(4);
        m.team_ready(TeamId::First).unwrap();
        m.team_ready(TeamId::Second).unwrap();
        m.start_round(1_000).unwrap();

        let report = m.clear().unwrap();
        assert!(report.was_playing);
        assert_eq!(report.round_no, 1);
        assert_eq!(report.summaries.len(), 2);
        assert_eq!(m.round_no(), 0);
    }

    #[test]
    fn test_snapshot_serialises() {
        let m = drafted(4);
        let snapshot = m.snapshot();
        assert_eq!(snapshot.status, MatchStatus::Faction);
        assert_eq!(snapshot.teams.len(), 2);
        assert_eq!(snapshot.map_status, Some(MapStatus::Unconfirmed));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "FACTION");
        assert_eq!(json["teams"][0]["roster"][0]["role"]["role"], "captain");
    }

    proptest! {
        #[test]
        fn prop_draft_conserves_players(count in 3u64..13, seed in any::<u64>(), choices in prop::collection::vec(any::<prop::sample::Index>(), 12)) {
            let mut m = launched(count, seed);
            let total = count as usize;
            let mut choices = choices.into_iter();

            while m.status() == MatchStatus::Picking {
                let team = TeamId::BOTH
                    .into_iter()
                    .find(|t| m.teams().unwrap()[t.index()].turn())
                    .unwrap();
                let pool = pool_ids(&m);
                let index = choices.next().map(|i| i.index(pool.len())).unwrap_or(0);
                let before = pool.len();

                let report = m.pick(team, pool[index]).unwrap();

                let teams = m.teams().unwrap();
                prop_assert_eq!(m.pool_len() + teams[0].len() + teams[1].len(), total);
                prop_assert_eq!(report.auto_picked.is_some(), before == 2);
            }
            prop_assert_eq!(m.status(), MatchStatus::Faction);
        }
    }
}
