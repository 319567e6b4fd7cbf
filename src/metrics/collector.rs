//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the draft-room service:
//! service plumbing, lobby admission, match lifecycle and score processing.

use crate::matches::MatchManagerStats;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the draft-room service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Lobby admission metrics
    lobby_metrics: LobbyMetrics,

    /// Match lifecycle metrics
    match_metrics: MatchMetrics,

    /// Scoring metrics
    score_metrics: ScoreMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP commands processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP command processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Lobby admission metrics
#[derive(Clone)]
pub struct LobbyMetrics {
    /// Players currently queued
    pub players_waiting: IntGauge,

    /// 1 while a full lobby waits for a free match slot
    pub lobby_stuck: IntGauge,

    pub players_joined_total: IntCounter,

    pub players_left_total: IntCounter,

    /// Lobby notifications sent by the auto-ping timer
    pub auto_pings_total: IntCounter,

    /// Full lobbies drained into a match
    pub matches_started_total: IntCounter,
}

/// Match lifecycle metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Match slots currently not FREE
    pub active_matches: IntGauge,

    /// Matches returned to FREE, by reason
    pub matches_cleared_total: IntCounterVec,

    pub rounds_played_total: IntCounter,

    /// Launches aborted for lack of game accounts
    pub account_shortages_total: IntCounter,

    /// Duration of match operations
    pub operation_duration: HistogramVec,
}

/// Scoring metrics
#[derive(Clone)]
pub struct ScoreMetrics {
    /// Telemetry requests by kind and outcome
    pub telemetry_requests_total: IntCounterVec,

    /// Kills made with banned weapons
    pub illegal_weapon_kills_total: IntCounter,

    /// Duration of a full round scoring pass
    pub scoring_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let lobby_metrics = LobbyMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let score_metrics = ScoreMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            lobby_metrics,
            match_metrics,
            score_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn lobby(&self) -> &LobbyMetrics {
        &self.lobby_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn score(&self) -> &ScoreMetrics {
        &self.score_metrics
    }

    /// Refresh gauges from manager stats
    pub fn update_from_manager_stats(&self, stats: &MatchManagerStats) {
        self.lobby_metrics
            .players_waiting
            .set(stats.players_waiting as i64);
        self.lobby_metrics
            .lobby_stuck
            .set(if stats.lobby_stuck { 1 } else { 0 });
        self.match_metrics
            .active_matches
            .set(stats.active_matches as i64);
    }

    /// Record a command received over AMQP
    pub fn record_command(&self, command: &str, success: bool) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[command, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[command])
                .inc();
        }
    }

    pub fn record_player_joined(&self, waiting: usize) {
        self.lobby_metrics.players_joined_total.inc();
        self.lobby_metrics.players_waiting.set(waiting as i64);
    }

    pub fn record_player_left(&self, waiting: usize) {
        self.lobby_metrics.players_left_total.inc();
        self.lobby_metrics.players_waiting.set(waiting as i64);
    }

    pub fn record_auto_ping(&self) {
        self.lobby_metrics.auto_pings_total.inc();
    }

    pub fn record_lobby_stuck(&self, stuck: bool) {
        self.lobby_metrics.lobby_stuck.set(if stuck { 1 } else { 0 });
    }

    /// Record a full lobby launching a match
    pub fn record_match_started(&self) {
        self.lobby_metrics.matches_started_total.inc();
        self.lobby_metrics.players_waiting.set(0);
        self.lobby_metrics.lobby_stuck.set(0);
        self.match_metrics.active_matches.inc();
    }

    /// Record a match returning to FREE (`completed`, `aborted`, `cleared`)
    pub fn record_match_cleared(&self, reason: &str) {
        self.match_metrics
            .matches_cleared_total
            .with_label_values(&[reason])
            .inc();
        self.match_metrics.active_matches.dec();
    }

    pub fn record_round_played(&self) {
        self.match_metrics.rounds_played_total.inc();
    }

    pub fn record_account_shortage(&self) {
        self.match_metrics.account_shortages_total.inc();
    }

    pub fn record_match_operation(&self, operation: &str, duration: Duration) {
        self.match_metrics
            .operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Record a telemetry request (`kills` or `captures`)
    pub fn record_telemetry_request(&self, kind: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.score_metrics
            .telemetry_requests_total
            .with_label_values(&[kind, status])
            .inc();
    }

    pub fn record_illegal_weapon_kills(&self, count: u64) {
        self.score_metrics.illegal_weapon_kills_total.inc_by(count);
    }

    pub fn record_scoring_duration(&self, duration: Duration) {
        self.score_metrics
            .scoring_duration
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("draft_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "draft_room_amqp_messages_total",
                "Total AMQP commands processed",
            ),
            &["command", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("draft_room_amqp_errors_total", "Total AMQP command errors"),
            &["command"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "draft_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("draft_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl LobbyMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let players_waiting =
            IntGauge::new("draft_room_players_waiting", "Players currently queued")?;
        registry.register(Box::new(players_waiting.clone()))?;

        let lobby_stuck = IntGauge::new(
            "draft_room_lobby_stuck",
            "Full lobby waiting for a free match slot",
        )?;
        registry.register(Box::new(lobby_stuck.clone()))?;

        let players_joined_total =
            IntCounter::new("draft_room_players_joined_total", "Players joined")?;
        registry.register(Box::new(players_joined_total.clone()))?;

        let players_left_total =
            IntCounter::new("draft_room_players_left_total", "Players left the lobby")?;
        registry.register(Box::new(players_left_total.clone()))?;

        let auto_pings_total =
            IntCounter::new("draft_room_auto_pings_total", "Lobby auto-pings sent")?;
        registry.register(Box::new(auto_pings_total.clone()))?;

        let matches_started_total =
            IntCounter::new("draft_room_matches_started_total", "Matches launched")?;
        registry.register(Box::new(matches_started_total.clone()))?;

        Ok(Self {
            players_waiting,
            lobby_stuck,
            players_joined_total,
            players_left_total,
            auto_pings_total,
            matches_started_total,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_matches =
            IntGauge::new("draft_room_active_matches", "Match slots currently in use")?;
        registry.register(Box::new(active_matches.clone()))?;

        let matches_cleared_total = IntCounterVec::new(
            Opts::new("draft_room_matches_cleared_total", "Matches returned to FREE"),
            &["reason"],
        )?;
        registry.register(Box::new(matches_cleared_total.clone()))?;

        let rounds_played_total =
            IntCounter::new("draft_room_rounds_played_total", "Rounds played")?;
        registry.register(Box::new(rounds_played_total.clone()))?;

        let account_shortages_total = IntCounter::new(
            "draft_room_account_shortages_total",
            "Matches aborted for lack of game accounts",
        )?;
        registry.register(Box::new(account_shortages_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "draft_room_match_operation_duration_seconds",
                "Match operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            active_matches,
            matches_cleared_total,
            rounds_played_total,
            account_shortages_total,
            operation_duration,
        })
    }
}

impl ScoreMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let telemetry_requests_total = IntCounterVec::new(
            Opts::new(
                "draft_room_telemetry_requests_total",
                "Telemetry requests by kind and status",
            ),
            &["kind", "status"],
        )?;
        registry.register(Box::new(telemetry_requests_total.clone()))?;

        let illegal_weapon_kills_total = IntCounter::new(
            "draft_room_illegal_weapon_kills_total",
            "Kills made with banned weapons",
        )?;
        registry.register(Box::new(illegal_weapon_kills_total.clone()))?;

        let scoring_duration = Histogram::with_opts(
            HistogramOpts::new(
                "draft_room_scoring_duration_seconds",
                "Round scoring duration",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(scoring_duration.clone()))?;

        Ok(Self {
            telemetry_requests_total,
            illegal_weapon_kills_total,
            scoring_duration,
        })
    }
}
