//! Round scoring: turns telemetry into loadout tallies and capture points

use crate::amqp::publisher::Notifier;
use crate::config::ScoringSettings;
use crate::metrics::MetricsCollector;
use crate::score::stats::LoadoutStat;
use crate::score::weapons::WeaponCatalog;
use crate::team::Team;
use crate::telemetry::{CaptureEvent, KillEvent, TelemetryClient};
use crate::types::{
    Faction, FacilityId, LoadoutId, MatchId, Notice, NoticeKey, NoticeTarget, PlayerId,
    RoundWindow, TeamId, TelemetryId, WeaponId,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Telemetry id → (team, player) for everyone on both rosters
pub type RosterIndex = HashMap<TelemetryId, (TeamId, PlayerId)>;

/// What a scoring pass needs to know about the round
#[derive(Debug, Clone, Copy)]
pub struct RoundContext {
    pub match_id: MatchId,
    pub window: RoundWindow,
    /// Facility of the match map; captures are skipped when unknown
    pub facility_id: Option<FacilityId>,
}

/// Capture scoring outcome, indexed by `TeamId::index`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureSummary {
    pub captures: [u32; 2],
    pub recaptures: [u32; 2],
    pub owner: Option<TeamId>,
}

/// Kills made with one banned weapon by one player during a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IllegalWeaponReport {
    pub player_id: PlayerId,
    pub player_name: String,
    pub weapon_id: WeaponId,
    pub weapon_name: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoundScoreReport {
    pub players_scored: usize,
    /// Players whose telemetry was unreachable or empty
    pub players_skipped: usize,
    pub illegal_weapons: Vec<IllegalWeaponReport>,
    /// `None` when captures could not be fetched
    pub captures: Option<CaptureSummary>,
}

/// Map every rostered player's telemetry id to their team
pub fn roster_index(teams: &[Team; 2]) -> RosterIndex {
    let mut index = RosterIndex::new();
    for team in teams {
        for player in team.players() {
            index.insert(player.telemetry_id, (team.id(), player.id));
        }
    }
    index
}

fn loadout_mut<'a>(
    teams: &'a mut [Team; 2],
    team: TeamId,
    player: PlayerId,
    loadout: LoadoutId,
) -> Option<&'a mut LoadoutStat> {
    let stat = teams[team.index()]
        .score_mut()
        .and_then(|score| score.player_mut(player))
        .map(|score| score.loadout_mut(loadout));
    if stat.is_none() {
        error!(
            "Invariant violated: no score entry for player {} of {}",
            player, team
        );
    }
    stat
}

/// Apply the kills made by `attacker` and return banned-weapon use by weapon id.
///
/// Classification order is suicide, team-kill, banned weapon, regular kill.
/// Events where `attacker` is not the killer, or whose victim is not on
/// either roster, are ignored.
pub fn tally_kills(
    teams: &mut [Team; 2],
    index: &RosterIndex,
    weapons: &WeaponCatalog,
    attacker: TelemetryId,
    events: &[KillEvent],
) -> BTreeMap<WeaponId, u32> {
    let mut illegal = BTreeMap::new();
    let Some(&(attacker_team, attacker_id)) = index.get(&attacker) else {
        return illegal;
    };

    for event in events.iter().filter(|e| e.attacker == attacker) {
        let Some(&(victim_team, victim_id)) = index.get(&event.victim) else {
            continue;
        };

        if victim_id == attacker_id {
            if let Some(stat) = loadout_mut(teams, attacker_team, attacker_id, event.attacker_loadout) {
                stat.add_suicide();
            }
        } else if victim_team == attacker_team {
            if let Some(stat) = loadout_mut(teams, attacker_team, attacker_id, event.attacker_loadout) {
                stat.add_team_kill();
            }
            if let Some(stat) = loadout_mut(teams, victim_team, victim_id, event.victim_loadout) {
                stat.add_death(0);
            }
        } else {
            let weapon = weapons.get_or_unknown(event.weapon);
            if weapon.banned {
                if let Some(stat) = loadout_mut(teams, attacker_team, attacker_id, event.attacker_loadout) {
                    stat.add_illegal_weapon(weapon.id);
                }
                *illegal.entry(weapon.id).or_insert(0) += 1;
            } else {
                if let Some(stat) = loadout_mut(teams, attacker_team, attacker_id, event.attacker_loadout) {
                    stat.add_kill(weapon.points);
                }
                if let Some(stat) = loadout_mut(teams, victim_team, victim_id, event.victim_loadout) {
                    stat.add_death(weapon.points);
                }
            }
        }
    }

    illegal
}

/// Credit facility captures in chronological order.
///
/// The first capture by a match faction scores `capture_points`; a capture by
/// a faction other than the current owner scores `recapture_points`.
pub fn tally_captures(
    teams: &mut [Team; 2],
    facility: FacilityId,
    events: &[CaptureEvent],
    scoring: ScoringSettings,
) -> CaptureSummary {
    let factions: HashMap<Faction, TeamId> = teams
        .iter()
        .filter_map(|team| team.faction().map(|f| (f, team.id())))
        .collect();

    let mut ordered: Vec<&CaptureEvent> = events
        .iter()
        .filter(|e| e.facility_id == facility)
        .collect();
    ordered.sort_by_key(|e| e.timestamp);

    let mut summary = CaptureSummary::default();
    for event in ordered {
        let Some(&capper) = factions.get(&event.faction) else {
            continue;
        };

        let points = match summary.owner {
            None => {
                summary.captures[capper.index()] += 1;
                scoring.capture_points
            }
            Some(owner) if owner != capper => {
                summary.recaptures[capper.index()] += 1;
                scoring.recapture_points
            }
            Some(_) => continue,
        };

        match teams[capper.index()].score_mut() {
            Some(score) => score.add_capture(points),
            None => error!("Invariant violated: {} has no score while capturing", capper),
        }
        summary.owner = Some(capper);
    }

    summary
}

/// Runs the scoring pass at the end of each round
pub struct ScoreProcessor {
    telemetry: Arc<dyn TelemetryClient>,
    weapons: Arc<WeaponCatalog>,
    notifier: Arc<dyn Notifier>,
    scoring: ScoringSettings,
    metrics_collector: Option<Arc<MetricsCollector>>,
}

impl ScoreProcessor {
    pub fn new(
        telemetry: Arc<dyn TelemetryClient>,
        weapons: Arc<WeaponCatalog>,
        notifier: Arc<dyn Notifier>,
        scoring: ScoringSettings,
    ) -> Self {
        Self {
            telemetry,
            weapons,
            notifier,
            scoring,
            metrics_collector: None,
        }
    }

    pub fn with_metrics(mut self, metrics_collector: Arc<MetricsCollector>) -> Self {
        self.metrics_collector = Some(metrics_collector);
        self
    }

    pub fn weapons(&self) -> &WeaponCatalog {
        &self.weapons
    }

    /// Score one round into the teams' aggregators. Telemetry failures only
    /// skip the player (or the capture batch) they concern.
    pub async fn process_round(&self, ctx: RoundContext, teams: &mut [Team; 2]) -> RoundScoreReport {
        let started = Instant::now();
        let index = roster_index(teams);
        let mut report = RoundScoreReport::default();

        info!(
            "Scoring round of match {} - window: [{}, {}), players: {}",
            ctx.match_id,
            ctx.window.start,
            ctx.window.end,
            index.len()
        );

        // Deterministic order keeps reports stable
        let mut attackers: Vec<TelemetryId> = index.keys().copied().collect();
        attackers.sort_unstable();

        for attacker in attackers {
            let events = match self.telemetry.kill_events(attacker, ctx.window).await {
                Ok(events) => {
                    self.record_request("kills", true);
                    events
                }
                Err(e) => {
                    self.record_request("kills", false);
                    warn!(
                        "Skipping character {} of match {}: {}",
                        attacker, ctx.match_id, e
                    );
                    report.players_skipped += 1;
                    continue;
                }
            };

            if events.is_empty() {
                debug!(
                    "No kill found for character {} in match {}",
                    attacker, ctx.match_id
                );
                report.players_skipped += 1;
                continue;
            }

            let illegal = tally_kills(teams, &index, &self.weapons, attacker, &events);
            report.players_scored += 1;

            if !illegal.is_empty() {
                self.report_illegal(&ctx, teams, &index, attacker, illegal, &mut report)
                    .await;
            }
        }

        report.captures = self.score_captures(&ctx, teams).await;

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics_collector {
            metrics.record_scoring_duration(elapsed);
        }
        info!(
            "Round scored for match {} - scored: {}, skipped: {}, illegal reports: {}, time: {:.2}ms",
            ctx.match_id,
            report.players_scored,
            report.players_skipped,
            report.illegal_weapons.len(),
            elapsed.as_secs_f64() * 1000.0
        );

        report
    }

    async fn report_illegal(
        &self,
        ctx: &RoundContext,
        teams: &[Team; 2],
        index: &RosterIndex,
        attacker: TelemetryId,
        illegal: BTreeMap<WeaponId, u32>,
        report: &mut RoundScoreReport,
    ) {
        let Some(&(team, player_id)) = index.get(&attacker) else {
            return;
        };
        let player_name = teams[team.index()]
            .slot_of(player_id)
            .and_then(|slot| teams[team.index()].entry(slot))
            .map(|entry| entry.player().name.clone())
            .unwrap_or_else(|| player_id.to_string());

        for (weapon_id, count) in illegal {
            let weapon_name = self.weapons.get_or_unknown(weapon_id).name;
            warn!(
                "Illegal weapon use in match {} - player: '{}', weapon: '{}', kills: {}",
                ctx.match_id, player_name, weapon_name, count
            );
            if let Some(metrics) = &self.metrics_collector {
                metrics.record_illegal_weapon_kills(count as u64);
            }

            for target in [NoticeTarget::Match(ctx.match_id), NoticeTarget::Staff] {
                let notice = Notice::new(NoticeKey::IllegalWeapon, target)
                    .arg(player_id)
                    .arg(&player_name)
                    .arg(&weapon_name)
                    .arg(ctx.match_id)
                    .arg(count);
                if let Err(e) = self.notifier.deliver(notice).await {
                    error!("Failed to report illegal weapon to {:?}: {}", target, e);
                }
            }

            report.illegal_weapons.push(IllegalWeaponReport {
                player_id,
                player_name: player_name.clone(),
                weapon_id,
                weapon_name,
                count,
            });
        }
    }

    async fn score_captures(&self, ctx: &RoundContext, teams: &mut [Team; 2]) -> Option<CaptureSummary> {
        let Some(facility) = ctx.facility_id else {
            warn!("Match {} has no facility, skipping captures", ctx.match_id);
            return None;
        };

        let events = match self.telemetry.capture_events(ctx.window).await {
            Ok(events) => {
                self.record_request("captures", true);
                events
            }
            Err(e) => {
                self.record_request("captures", false);
                warn!("Skipping captures of match {}: {}", ctx.match_id, e);
                return None;
            }
        };

        if events.is_empty() {
            warn!("No capture event found for match {}", ctx.match_id);
        }

        let summary = tally_captures(teams, facility, &events, self.scoring);
        debug!(
            "Captures of match {} - captures: {:?}, recaptures: {:?}, owner: {:?}",
            ctx.match_id, summary.captures, summary.recaptures, summary.owner
        );
        Some(summary)
    }

    fn record_request(&self, kind: &str, success: bool) {
        if let Some(metrics) = &self.metrics_collector {
            metrics.record_telemetry_request(kind, success);
        }
    }
}
