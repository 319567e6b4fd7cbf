//! Match manager orchestrating the lobby and the match slots
//!
//! The manager owns the lobby queue and the match registry, routes human
//! decisions to the right match, drives the timers (auto-ping, countdown,
//! round over) and talks to the collaborators: notifier, account allocator,
//! map selectors and the score processor.

use crate::accounts::AccountAllocator;
use crate::amqp::Notifier;
use crate::config::{MatchmakingSettings, ScoringSettings};
use crate::error::{MatchmakingError, Result};
use crate::lobby::{LobbyEvent, LobbyQueue};
use crate::maps::MapSelectorFactory;
use crate::matches::instance::{
    DraftProgress, FactionOutcome, Match, MatchSnapshot, ReadyOutcome, RoundEnd, TeamSummary,
};
use crate::matches::registry::MatchRegistry;
use crate::matches::state::MatchStatus;
use crate::metrics::MetricsCollector;
use crate::score::{ScoreProcessor, WeaponCatalog};
use crate::telemetry::TelemetryClient;
use crate::timer::TimerState;
use crate::types::{
    Faction, GameMap, MatchId, Notice, NoticeKey, NoticeTarget, Player, PlayerId, TeamId,
};
use crate::utils::unix_now;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Announcements made before a round starts
const COUNTDOWN_ANNOUNCEMENTS: u32 = 3;

/// Statistics about match manager operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchManagerStats {
    /// Total number of matches launched from the lobby
    pub matches_started: u64,
    /// Matches that played every round
    pub matches_completed: u64,
    /// Matches cleared before the end (manual clear or account shortage)
    pub matches_aborted: u64,
    pub rounds_played: u64,
    /// Total number of lobby joins
    pub players_queued: u64,
    /// Current number of players in the lobby
    pub players_waiting: usize,
    pub active_matches: usize,
    pub free_slots: usize,
    pub lobby_stuck: bool,
}

/// External services the manager depends on
#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn Notifier>,
    pub accounts: Arc<dyn AccountAllocator>,
    pub maps: Arc<dyn MapSelectorFactory>,
    pub telemetry: Arc<dyn TelemetryClient>,
    pub weapons: Arc<WeaponCatalog>,
}

/// Why a match went back to FREE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClearReason {
    Completed,
    AccountShortage,
    Manual,
}

impl ClearReason {
    fn label(self) -> &'static str {
        match self {
            ClearReason::Completed => "completed",
            ClearReason::AccountShortage => "accounts",
            ClearReason::Manual => "cleared",
        }
    }
}

/// The main match manager
#[derive(Clone)]
pub struct MatchManager {
    settings: Arc<MatchmakingSettings>,
    lobby: Arc<Mutex<LobbyQueue>>,
    registry: MatchRegistry,
    /// Players currently held by a match
    engaged: Arc<RwLock<HashMap<PlayerId, MatchId>>>,
    notifier: Arc<dyn Notifier>,
    accounts: Arc<dyn AccountAllocator>,
    maps: Arc<dyn MapSelectorFactory>,
    processor: Arc<ScoreProcessor>,
    stats: Arc<RwLock<MatchManagerStats>>,
    metrics_collector: Option<Arc<MetricsCollector>>,
}

impl MatchManager {
    /// Create a new match manager
    pub fn new(
        settings: MatchmakingSettings,
        scoring: ScoringSettings,
        collaborators: Collaborators,
    ) -> Self {
        Self::build(settings, scoring, collaborators, None)
    }

    /// Create a new match manager with metrics collector
    pub fn with_metrics(
        settings: MatchmakingSettings,
        scoring: ScoringSettings,
        collaborators: Collaborators,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self::build(settings, scoring, collaborators, Some(metrics_collector))
    }

    fn build(
        settings: MatchmakingSettings,
        scoring: ScoringSettings,
        collaborators: Collaborators,
        metrics_collector: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let mut processor = ScoreProcessor::new(
            collaborators.telemetry,
            collaborators.weapons,
            collaborators.notifier.clone(),
            scoring,
        );
        if let Some(metrics) = &metrics_collector {
            processor = processor.with_metrics(metrics.clone());
        }

        let lobby = LobbyQueue::new(
            settings.lobby_size,
            settings.auto_ping_threshold(),
            settings.auto_ping_timer(),
        );
        info!(
            "Match manager created - lobby_size: {}, ping_threshold: {}, match_ids: {:?}",
            settings.lobby_size,
            settings.auto_ping_threshold(),
            settings.match_ids
        );

        Self {
            registry: MatchRegistry::new(&settings),
            settings: Arc::new(settings),
            lobby: Arc::new(Mutex::new(lobby)),
            engaged: Arc::new(RwLock::new(HashMap::new())),
            notifier: collaborators.notifier,
            accounts: collaborators.accounts,
            maps: collaborators.maps,
            processor: Arc::new(processor),
            stats: Arc::new(RwLock::new(MatchManagerStats::default())),
            metrics_collector,
        }
    }

    pub fn registry(&self) -> &MatchRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &MatchmakingSettings {
        &self.settings
    }

    /// Best-effort delivery; failures are logged and dropped
    async fn notify(&self, notice: Notice) {
        let key = notice.key;
        if let Err(e) = self.notifier.deliver(notice).await {
            warn!("Failed to deliver notice {:?}: {}", key, e);
        }
    }

    fn update_stats(&self, update: impl FnOnce(&mut MatchManagerStats)) {
        match self.stats.write() {
            Ok(mut stats) => update(&mut stats),
            Err(_) => error!("Failed to acquire stats lock"),
        }
    }

    fn engaged_in(&self, player_id: PlayerId) -> Result<Option<MatchId>> {
        let engaged = self
            .engaged
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire engaged players lock".to_string(),
            })?;
        Ok(engaged.get(&player_id).copied())
    }

    fn update_engaged(&self, update: impl FnOnce(&mut HashMap<PlayerId, MatchId>)) -> Result<()> {
        let mut engaged = self
            .engaged
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire engaged players lock".to_string(),
            })?;
        update(&mut engaged);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lobby
    // ------------------------------------------------------------------

    /// Queue a player in the lobby
    pub async fn join(&self, player: Player) -> Result<LobbyEvent> {
        info!(
            "Processing join - player: '{}', id: {}",
            player.name, player.id
        );

        if let Some(match_id) = self.engaged_in(player.id)? {
            return Err(MatchmakingError::invalid_action(format!(
                "{} is already playing in match {}",
                player.name, match_id
            ))
            .into());
        }

        let mut lobby = self.lobby.lock().await;
        let event = lobby.add(player.clone())?;
        let waiting = lobby.len();

        self.notify(
            Notice::new(NoticeKey::LobbyJoined, NoticeTarget::Lobby)
                .arg(&player.name)
                .arg(waiting)
                .arg(lobby.capacity()),
        )
        .await;

        self.update_stats(|stats| stats.players_queued += 1);
        if let Some(metrics) = &self.metrics_collector {
            metrics.record_player_joined(waiting);
        }

        match event {
            LobbyEvent::Queued => {}
            LobbyEvent::PingThresholdReached => {
                let manager = self.clone();
                let scheduled = lobby.schedule_auto_ping(move |iteration| {
                    let manager = manager.clone();
                    async move { manager.on_auto_ping(iteration).await }
                });
                info!(
                    "Lobby above ping threshold ({}) - auto-ping scheduled: {}",
                    lobby.ping_threshold(),
                    scheduled
                );
            }
            LobbyEvent::Full => {
                let manager = self.clone();
                lobby.schedule_match_start(move |_| {
                    let manager = manager.clone();
                    async move { manager.on_lobby_full().await }
                });
                info!("Lobby full - match start scheduled");
            }
        }

        Ok(event)
    }

    /// Remove a player from the lobby
    pub async fn leave(&self, player_id: PlayerId) -> Result<Player> {
        let mut lobby = self.lobby.lock().await;
        let player = lobby.remove(player_id).ok_or_else(|| {
            MatchmakingError::invalid_action(format!("Player {} is not in the lobby", player_id))
        })?;
        let waiting = lobby.len();

        self.notify(
            Notice::new(NoticeKey::LobbyLeft, NoticeTarget::Lobby)
                .arg(&player.name)
                .arg(waiting)
                .arg(lobby.capacity()),
        )
        .await;

        if let Some(metrics) = &self.metrics_collector {
            metrics.record_player_left(waiting);
            metrics.record_lobby_stuck(false);
        }
        Ok(player)
    }

    /// Empty the lobby. `None` when there was nobody to remove.
    pub async fn clear_lobby(&self) -> Option<Vec<Player>> {
        let mut lobby = self.lobby.lock().await;
        let removed = lobby.clear()?;

        info!("Lobby cleared - removed players: {}", removed.len());
        self.notify(
            Notice::new(NoticeKey::LobbyCleared, NoticeTarget::Lobby)
                .args(removed.iter().map(|p| &p.name)),
        )
        .await;

        if let Some(metrics) = &self.metrics_collector {
            metrics.record_player_left(0);
            metrics.record_lobby_stuck(false);
        }
        Some(removed)
    }

    pub async fn lobby_players(&self) -> Vec<Player> {
        self.lobby.lock().await.players().to_vec()
    }

    pub async fn auto_ping_state(&self) -> TimerState {
        self.lobby.lock().await.auto_ping_state()
    }

    fn has_free_slot(&self) -> bool {
        self.registry.has_free()
    }

    async fn on_auto_ping(&self, iteration: u32) {
        if !self.has_free_slot() {
            debug!("Auto-ping {} skipped - no free match slot", iteration);
            return;
        }

        let lobby = self.lobby.lock().await;
        if lobby.is_empty() || lobby.is_full() {
            debug!("Auto-ping {} skipped - lobby size: {}", iteration, lobby.len());
            return;
        }

        info!(
            "Auto-ping {} - lobby: {}/{}",
            iteration,
            lobby.len(),
            lobby.capacity()
        );
        self.notify(
            Notice::new(NoticeKey::LobbyNotify, NoticeTarget::Lobby)
                .arg(lobby.len())
                .arg(lobby.capacity()),
        )
        .await;
        if let Some(metrics) = &self.metrics_collector {
            metrics.record_auto_ping();
        }
    }

    async fn on_lobby_full(&self) {
        let mut lobby = self.lobby.lock().await;
        if let Err(e) = self.launch_from_lobby(&mut lobby).await {
            error!("Failed to start match from lobby: {}", e);
        }
    }

    /// A slot went back to FREE: drain a waiting full lobby into it
    async fn on_match_free(&self) {
        let mut lobby = self.lobby.lock().await;
        lobby.mark_slot_freed();
        if !lobby.is_full() {
            return;
        }
        if let Err(e) = self.launch_from_lobby(&mut lobby).await {
            error!("Failed to start match from lobby: {}", e);
        }
    }

    /// Move a full lobby into the first FREE slot, or flag it stuck
    async fn launch_from_lobby(&self, lobby: &mut LobbyQueue) -> Result<Option<MatchId>> {
        if !lobby.is_full() {
            debug!("Lobby no longer full ({}), not starting", lobby.len());
            return Ok(None);
        }

        let Some(mut slot) = self.registry.find_free().await else {
            if !lobby.is_stuck() {
                warn!("Lobby full but no free match slot - lobby stuck");
                lobby.set_stuck(true);
                self.notify(Notice::new(NoticeKey::LobbyStuck, NoticeTarget::Lobby))
                    .await;
                if let Some(metrics) = &self.metrics_collector {
                    metrics.record_lobby_stuck(true);
                }
            }
            return Ok(None);
        };

        let start_time = Instant::now();
        let match_id = slot.id();
        let players = lobby.drain_for_match();
        let player_ids: Vec<PlayerId> = players.iter().map(|p| p.id).collect();

        let captains = {
            let mut rng = StdRng::from_entropy();
            slot.launch(players, self.maps.create(match_id), &mut rng)?
        };
        self.update_engaged(|engaged| {
            for id in &player_ids {
                engaged.insert(*id, match_id);
            }
        })?;

        self.notify(
            Notice::new(NoticeKey::LobbyMatchStarting, NoticeTarget::Lobby).arg(match_id),
        )
        .await;

        let teams = slot
            .teams()
            .ok_or_else(|| MatchmakingError::invariant("launched match without teams"))?;
        let mut init = Notice::new(NoticeKey::MatchInit, NoticeTarget::Match(match_id));
        for team in teams {
            init = init.arg(team.captain().map(|c| c.player().name.clone()).unwrap_or_default());
        }
        self.notify(init.args(slot.pool().map(|p| &p.name))).await;
        if slot.status() == MatchStatus::Faction {
            self.announce_faction_turn(&slot, TeamId::Second).await;
        }

        self.update_stats(|stats| stats.matches_started += 1);
        if let Some(metrics) = &self.metrics_collector {
            metrics.record_match_started();
            metrics.record_match_operation("launch", start_time.elapsed());
        }

        info!(
            "Match {} started - players: {}, captains: {:?}",
            match_id,
            player_ids.len(),
            captains
        );
        Ok(Some(match_id))
    }

    // ------------------------------------------------------------------
    // Draft
    // ------------------------------------------------------------------

    fn captain_of(m: &Match, captain_id: PlayerId) -> Result<TeamId> {
        m.captain_team(captain_id).ok_or_else(|| {
            MatchmakingError::invalid_action(format!(
                "Player {} is not a captain in match {}",
                captain_id,
                m.id()
            ))
            .into()
        })
    }

    fn team_name(m: &Match, team: TeamId) -> String {
        m.teams()
            .map(|teams| teams[team.index()].name().to_string())
            .unwrap_or_else(|| team.to_string())
    }

    fn player_name(m: &Match, player_id: PlayerId) -> String {
        m.teams()
            .and_then(|teams| {
                teams.iter().find_map(|t| {
                    t.slot_of(player_id)
                        .and_then(|slot| t.entry(slot))
                        .map(|e| e.player().name.clone())
                })
            })
            .unwrap_or_else(|| player_id.to_string())
    }

    async fn announce_faction_turn(&self, m: &Match, team: TeamId) {
        self.notify(
            Notice::new(NoticeKey::PickFactionTurn, NoticeTarget::Match(m.id()))
                .arg(Self::team_name(m, team)),
        )
        .await;
    }

    /// A captain picks a pool player
    pub async fn pick(
        &self,
        match_id: MatchId,
        captain_id: PlayerId,
        player_id: PlayerId,
    ) -> Result<()> {
        let slot = self.registry.get(match_id)?;
        let mut m = slot.lock().await;
        let team = Self::captain_of(&m, captain_id)?;

        let report = m.pick(team, player_id)?;
        let target = NoticeTarget::Match(match_id);

        self.notify(
            Notice::new(NoticeKey::PickOk, target)
                .arg(Self::team_name(&m, report.team))
                .arg(&report.picked.name),
        )
        .await;
        if let Some((auto_team, player)) = &report.auto_picked {
            self.notify(
                Notice::new(NoticeKey::PickAuto, target)
                    .arg(Self::team_name(&m, *auto_team))
                    .arg(&player.name),
            )
            .await;
        }

        match report.progress {
            DraftProgress::Continue { next } => {
                debug!("Match {} - {} picks next", match_id, next);
            }
            DraftProgress::Complete => {
                info!("Match {} draft complete", match_id);
                self.announce_faction_turn(&m, TeamId::Second).await;
            }
        }
        Ok(())
    }

    /// A captain picks the faction their team plays
    pub async fn pick_faction(
        &self,
        match_id: MatchId,
        captain_id: PlayerId,
        faction: Faction,
    ) -> Result<FactionOutcome> {
        let slot = self.registry.get(match_id)?;
        let freed = {
            let mut m = slot.lock().await;
            let team = Self::captain_of(&m, captain_id)?;
            let outcome = m.pick_faction(team, faction)?;
            let target = NoticeTarget::Match(match_id);

            match outcome {
                FactionOutcome::Rejected { held_by } => {
                    self.notify(
                        Notice::new(NoticeKey::FactionTaken, target)
                            .arg(faction)
                            .arg(Self::team_name(&m, held_by)),
                    )
                    .await;
                    return Ok(outcome);
                }
                FactionOutcome::OpponentTurn { next } => {
                    self.notify(
                        Notice::new(NoticeKey::FactionPicked, target)
                            .arg(Self::team_name(&m, team))
                            .arg(faction),
                    )
                    .await;
                    self.announce_faction_turn(&m, next).await;
                    return Ok(outcome);
                }
                FactionOutcome::Complete => {
                    self.notify(
                        Notice::new(NoticeKey::FactionPicked, target)
                            .arg(Self::team_name(&m, team))
                            .arg(faction),
                    )
                    .await;
                }
            }

            if let Some(map) = m.map().cloned() {
                info!("Match {} map preset to {}", match_id, map.name);
                self.notify(Notice::new(NoticeKey::MapConfirmed, target).arg(&map.name))
                    .await;
                self.prepare(&mut m).await?
            } else {
                self.notify(Notice::new(NoticeKey::MapTurn, target)).await;
                false
            }
        };

        if freed {
            self.on_match_free().await;
        }
        Ok(FactionOutcome::Complete)
    }

    /// A captain proposes a map
    pub async fn select_map(
        &self,
        match_id: MatchId,
        captain_id: PlayerId,
        query: &str,
    ) -> Result<GameMap> {
        let slot = self.registry.get(match_id)?;
        let mut m = slot.lock().await;
        let team = Self::captain_of(&m, captain_id)?;

        let map = m.select_map(team, query)?.ok_or_else(|| {
            MatchmakingError::invalid_action(format!("No single map matches '{}'", query))
        })?;

        let target = NoticeTarget::Match(match_id);
        self.notify(
            Notice::new(NoticeKey::MapSelected, target)
                .arg(Self::team_name(&m, team))
                .arg(&map.name),
        )
        .await;
        self.notify(
            Notice::new(NoticeKey::MapTurn, target).arg(Self::team_name(&m, team.opponent())),
        )
        .await;
        Ok(map)
    }

    /// A captain accepts the proposed map; account lending follows
    pub async fn confirm_map(&self, match_id: MatchId, captain_id: PlayerId) -> Result<GameMap> {
        let slot = self.registry.get(match_id)?;
        let (map, freed) = {
            let mut m = slot.lock().await;
            let team = Self::captain_of(&m, captain_id)?;
            let map = m.confirm_map(team)?;

            self.notify(
                Notice::new(NoticeKey::MapConfirmed, NoticeTarget::Match(match_id)).arg(&map.name),
            )
            .await;
            let freed = self.prepare(&mut m).await?;
            (map, freed)
        };

        if freed {
            self.on_match_free().await;
        }
        Ok(map)
    }

    /// Lend accounts and open the ready-check. Returns true when the match
    /// had to be cleared for lack of accounts.
    async fn prepare(&self, m: &mut Match) -> Result<bool> {
        let match_id = m.id();
        let needing = m.begin_preparation()?;
        let requested = needing.len();

        let assignments = match self.accounts.give_accounts(match_id, needing).await {
            Ok(assignments) => assignments,
            Err(e) => {
                if let Some(MatchmakingError::ResourceExhausted { needed, available }) =
                    e.downcast_ref::<MatchmakingError>()
                {
                    warn!(
                        "Match {} aborted - accounts needed: {}, available: {}",
                        match_id, needed, available
                    );
                    if let Some(metrics) = &self.metrics_collector {
                        metrics.record_account_shortage();
                    }
                } else {
                    error!("Match {} account lending failed: {}", match_id, e);
                }
                self.notify(
                    Notice::new(NoticeKey::AccountsNotEnough, NoticeTarget::Match(match_id))
                        .arg(requested),
                )
                .await;
                self.clear_locked(m, ClearReason::AccountShortage).await?;
                return Ok(true);
            }
        };

        for (player_id, account) in &assignments {
            self.notify(
                Notice::new(NoticeKey::AccountsGiven, NoticeTarget::Player(*player_id))
                    .arg(match_id)
                    .arg(&account.username),
            )
            .await;
        }
        m.assign_accounts(assignments)?;

        self.notify(
            Notice::new(NoticeKey::MatchConfirm, NoticeTarget::Match(match_id)).arg(m.round_no()),
        )
        .await;
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Rounds
    // ------------------------------------------------------------------

    /// A player confirms they are logged into their lent account
    pub async fn validate_account(&self, match_id: MatchId, player_id: PlayerId) -> Result<()> {
        let slot = self.registry.get(match_id)?;
        let mut m = slot.lock().await;
        m.validate_account(player_id)?;
        debug!("Match {} - player {} validated their account", match_id, player_id);
        Ok(())
    }

    /// A captain confirms their team is ready; the second confirmation starts
    /// the countdown
    pub async fn ready(&self, match_id: MatchId, captain_id: PlayerId) -> Result<ReadyOutcome> {
        let slot = self.registry.get(match_id)?;
        let mut m = slot.lock().await;
        let team = Self::captain_of(&m, captain_id)?;
        let outcome = m.team_ready(team)?;
        let target = NoticeTarget::Match(match_id);

        match &outcome {
            ReadyOutcome::NotReady(names) => {
                self.notify(
                    Notice::new(NoticeKey::MatchNotReady, target)
                        .arg(Self::team_name(&m, team))
                        .args(names),
                )
                .await;
            }
            ReadyOutcome::WaitingForOpponent => {
                self.notify(
                    Notice::new(NoticeKey::MatchReady, target).arg(Self::team_name(&m, team)),
                )
                .await;
            }
            ReadyOutcome::Countdown => {
                self.notify(
                    Notice::new(NoticeKey::MatchReady, target).arg(Self::team_name(&m, team)),
                )
                .await;

                let round = m.round_no();
                let manager = self.clone();
                m.start_countdown(move |step| {
                    let manager = manager.clone();
                    async move { manager.on_countdown_step(match_id, round, step).await }
                });
                info!("Match {} countdown started for round {}", match_id, round);
            }
        }
        Ok(outcome)
    }

    async fn on_countdown_step(&self, match_id: MatchId, round: u32, step: u32) {
        if let Err(e) = self.countdown_step(match_id, round, step).await {
            error!("Match {} countdown step {} failed: {}", match_id, step, e);
        }
    }

    async fn countdown_step(&self, match_id: MatchId, round: u32, step: u32) -> Result<()> {
        let slot = self.registry.get(match_id)?;
        let mut m = slot.lock().await;
        if m.status() != MatchStatus::Starting || m.round_no() != round {
            debug!(
                "Match {} stale countdown step {} ignored - status: {}",
                match_id,
                step,
                m.status()
            );
            return Ok(());
        }

        let target = NoticeTarget::Match(match_id);
        if step < COUNTDOWN_ANNOUNCEMENTS {
            let remaining =
                u64::from(COUNTDOWN_ANNOUNCEMENTS - step) * self.settings.countdown_step_seconds;
            self.notify(Notice::new(NoticeKey::MatchStarting, target).arg(remaining))
                .await;
            return Ok(());
        }

        let round = m.start_round(unix_now())?;
        self.notify(Notice::new(NoticeKey::MatchStarted, target).arg(round))
            .await;

        let manager = self.clone();
        m.schedule_round_over(move |_| {
            let manager = manager.clone();
            async move { manager.on_round_over(match_id, round).await }
        });
        info!("Match {} round {} started", match_id, round);
        Ok(())
    }

    async fn on_round_over(&self, match_id: MatchId, round: u32) {
        match self.finish_round(match_id, round).await {
            Ok(true) => self.on_match_free().await,
            Ok(false) => {}
            Err(e) => error!("Match {} round {} completion failed: {}", match_id, round, e),
        }
    }

    /// Score the round that just ended. Returns true when the match is over
    /// and its slot was freed.
    async fn finish_round(&self, match_id: MatchId, round: u32) -> Result<bool> {
        let slot = self.registry.get(match_id)?;
        let mut m = slot.lock().await;
        if m.status() != MatchStatus::Playing || m.round_no() != round {
            debug!("Match {} stale round-over for round {} ignored", match_id, round);
            return Ok(false);
        }

        let start_time = Instant::now();
        let ctx = m.round_context()?;
        let report = self.processor.process_round(ctx, m.teams_mut()?).await;
        info!(
            "Match {} round {} scored - players: {}, skipped: {}, illegal weapons: {}",
            match_id,
            round,
            report.players_scored,
            report.players_skipped,
            report.illegal_weapons.len()
        );

        let target = NoticeTarget::Match(match_id);
        let summaries = m.team_summaries();
        self.notify(
            Notice::new(NoticeKey::RoundOver, target)
                .arg(round)
                .args(summary_args(&summaries)),
        )
        .await;

        self.update_stats(|stats| stats.rounds_played += 1);
        if let Some(metrics) = &self.metrics_collector {
            metrics.record_round_played();
            metrics.record_match_operation("round_over", start_time.elapsed());
        }

        match m.end_round()? {
            RoundEnd::NextRound { next } => {
                self.notify(Notice::new(NoticeKey::MatchSwap, target).arg(next))
                    .await;
                self.notify(Notice::new(NoticeKey::MatchConfirm, target).arg(next))
                    .await;
                Ok(false)
            }
            RoundEnd::MatchOver => {
                self.notify(
                    Notice::new(NoticeKey::MatchOver, target)
                        .arg(winner(&summaries))
                        .args(summary_args(&summaries)),
                )
                .await;
                self.clear_locked(&mut m, ClearReason::Completed).await?;
                Ok(true)
            }
        }
    }

    // ------------------------------------------------------------------
    // Roster changes
    // ------------------------------------------------------------------

    /// A captain alone on their team hands over the captaincy. Returns false
    /// when the team already has members.
    pub async fn resign(&self, match_id: MatchId, captain_id: PlayerId) -> Result<bool> {
        let slot = self.registry.get(match_id)?;
        let mut m = slot.lock().await;
        let team = Self::captain_of(&m, captain_id)?;

        let replacement = {
            let mut rng = StdRng::from_entropy();
            m.resign(team, &mut rng)?
        };
        let Some(captain) = replacement else {
            debug!("Match {} - captain {} cannot resign", match_id, captain_id);
            return Ok(false);
        };

        self.notify(
            Notice::new(NoticeKey::CaptainResigned, NoticeTarget::Match(match_id))
                .arg(Self::team_name(&m, team))
                .arg(captain_id)
                .arg(&captain.name),
        )
        .await;
        Ok(true)
    }

    /// Replace a pool or roster player with an idle player
    pub async fn substitute(
        &self,
        match_id: MatchId,
        player_id: PlayerId,
        replacement: Player,
    ) -> Result<()> {
        if self.lobby.lock().await.contains(replacement.id) {
            return Err(MatchmakingError::invalid_action(format!(
                "{} is queued in the lobby",
                replacement.name
            ))
            .into());
        }
        if let Some(engaged) = self.engaged_in(replacement.id)? {
            return Err(MatchmakingError::invalid_action(format!(
                "{} is already playing in match {}",
                replacement.name, engaged
            ))
            .into());
        }

        let slot = self.registry.get(match_id)?;
        let mut m = slot.lock().await;
        let newcomer_id = replacement.id;
        let newcomer_name = replacement.name.clone();
        let target = NoticeTarget::Match(match_id);

        let lent = if m.substitute_needs_account(player_id, &replacement)? {
            match self.accounts.give_accounts(match_id, vec![newcomer_id]).await {
                Ok(assignments) => assignments.into_iter().next().map(|(_, account)| account),
                Err(e) => {
                    warn!(
                        "Match {} - no account for substitute {}: {}",
                        match_id, newcomer_name, e
                    );
                    self.notify(Notice::new(NoticeKey::AccountsNotEnough, target).arg(1))
                        .await;
                    if let Some(metrics) = &self.metrics_collector {
                        metrics.record_account_shortage();
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };
        let report = m.substitute(player_id, replacement, lent)?;

        self.update_engaged(|engaged| {
            engaged.remove(&report.replaced.id);
            engaged.insert(newcomer_id, match_id);
        })?;

        self.notify(
            Notice::new(NoticeKey::PlayerSubstituted, target)
                .arg(&report.replaced.name)
                .arg(&newcomer_name),
        )
        .await;

        if let Some(account) = &report.account {
            self.notify(
                Notice::new(NoticeKey::AccountsGiven, NoticeTarget::Player(newcomer_id))
                    .arg(match_id)
                    .arg(&account.username),
            )
            .await;
        }
        Ok(())
    }

    /// Exchange two regular players
    pub async fn swap(&self, match_id: MatchId, first: PlayerId, second: PlayerId) -> Result<()> {
        let slot = self.registry.get(match_id)?;
        let mut m = slot.lock().await;
        m.swap_players(first, second)?;

        self.notify(
            Notice::new(NoticeKey::PlayersSwapped, NoticeTarget::Match(match_id))
                .arg(Self::player_name(&m, first))
                .arg(Self::player_name(&m, second)),
        )
        .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Clearing
    // ------------------------------------------------------------------

    /// Abort a match and offer its slot to the lobby
    pub async fn clear_match(&self, match_id: MatchId) -> Result<()> {
        let slot = self.registry.get(match_id)?;
        {
            let mut m = slot.lock().await;
            if m.status().is_free() {
                return Err(MatchmakingError::invalid_action(format!(
                    "Match {} is not running",
                    match_id
                ))
                .into());
            }
            self.clear_locked(&mut m, ClearReason::Manual).await?;
        }
        self.on_match_free().await;
        Ok(())
    }

    /// Clear a match whose lock is held. The caller offers the slot to the
    /// lobby once the lock is released.
    async fn clear_locked(&self, m: &mut Match, reason: ClearReason) -> Result<()> {
        let match_id = m.id();
        let report = m.clear()?;
        let target = NoticeTarget::Match(match_id);

        if report.was_playing {
            self.notify(
                Notice::new(NoticeKey::RoundOver, target)
                    .arg(report.round_no)
                    .args(summary_args(&report.summaries)),
            )
            .await;
            self.notify(
                Notice::new(NoticeKey::MatchOver, target)
                    .arg(winner(&report.summaries))
                    .args(summary_args(&report.summaries)),
            )
            .await;
        }

        if let Err(e) = self.accounts.do_update(match_id).await {
            error!("Match {} account update failed: {}", match_id, e);
        }

        self.update_engaged(|engaged| {
            for player in &report.released {
                engaged.remove(&player.id);
            }
        })?;

        self.notify(Notice::new(NoticeKey::MatchCleared, target).arg(match_id))
            .await;

        self.update_stats(|stats| match reason {
            ClearReason::Completed => stats.matches_completed += 1,
            _ => stats.matches_aborted += 1,
        });
        if let Some(metrics) = &self.metrics_collector {
            metrics.record_match_cleared(reason.label());
        }

        info!(
            "Match {} cleared - reason: {}, released: {}",
            match_id,
            reason.label(),
            report.released.len()
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn snapshot(&self, match_id: MatchId) -> Result<MatchSnapshot> {
        let slot = self.registry.get(match_id)?;
        let m = slot.lock().await;
        Ok(m.snapshot())
    }

    pub async fn status(&self, match_id: MatchId) -> Result<MatchStatus> {
        let slot = self.registry.get(match_id)?;
        let m = slot.lock().await;
        Ok(m.status())
    }

    /// Match the player is engaged in, if any
    pub fn engaged_match(&self, player_id: PlayerId) -> Option<MatchId> {
        self.engaged_in(player_id).ok().flatten()
    }

    /// Get current manager statistics
    pub async fn get_stats(&self) -> Result<MatchManagerStats> {
        let (players_waiting, lobby_stuck) = {
            let lobby = self.lobby.lock().await;
            (lobby.len(), lobby.is_stuck())
        };

        let mut active_matches = 0;
        for slot in self.registry.slots() {
            if !slot.lock().await.status().is_free() {
                active_matches += 1;
            }
        }

        let mut stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?
            .clone();
        stats.players_waiting = players_waiting;
        stats.lobby_stuck = lobby_stuck;
        stats.active_matches = active_matches;
        stats.free_slots = self.registry.len() - active_matches;
        Ok(stats)
    }
}

fn summary_args(summaries: &[TeamSummary]) -> Vec<String> {
    summaries
        .iter()
        .flat_map(|s| [s.name.clone(), s.net.to_string()])
        .collect()
}

fn winner(summaries: &[TeamSummary]) -> String {
    match summaries {
        [a, b] if a.net > b.net => a.name.clone(),
        [a, b] if b.net > a.net => b.name.clone(),
        _ => "draw".to_string(),
    }
}
