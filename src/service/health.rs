//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the draft-room
//! service, including readiness and liveness probes.

use crate::amqp::AmqpConnection;
use crate::matches::{MatchManager, MatchManagerStats};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Upper bound on how long a component probe may wait for a lock
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported to Prometheus (0=unhealthy, 1=degraded, 2=healthy)
    pub fn gauge_value(self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    /// Keep the worse of the two
    fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.gauge_value() < self.gauge_value() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Everything the probes look at
#[derive(Clone)]
pub struct HealthContext {
    pub service_name: String,
    pub match_manager: MatchManager,
    /// Absent when running without a broker (dry runs and tests)
    pub amqp_connection: Option<Arc<AmqpConnection>>,
    pub is_running: Arc<RwLock<bool>>,
    pub started_at: Instant,
}

impl HealthContext {
    pub fn new(
        service_name: impl Into<String>,
        match_manager: MatchManager,
        amqp_connection: Option<Arc<AmqpConnection>>,
        is_running: Arc<RwLock<bool>>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            match_manager,
            amqp_connection,
            is_running,
            started_at: Instant::now(),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Set when the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub players_waiting: usize,
    pub lobby_stuck: bool,
    pub active_matches: usize,
    pub free_slots: usize,
    pub matches_started: u64,
    pub matches_completed: u64,
    pub matches_aborted: u64,
    pub rounds_played: u64,
    pub uptime_seconds: u64,
}

impl ServiceStats {
    fn from_manager(stats: &MatchManagerStats, uptime: Duration) -> Self {
        Self {
            players_waiting: stats.players_waiting,
            lobby_stuck: stats.lobby_stuck,
            active_matches: stats.active_matches,
            free_slots: stats.free_slots,
            matches_started: stats.matches_started,
            matches_completed: stats.matches_completed,
            matches_aborted: stats.matches_aborted,
            rounds_played: stats.rounds_played,
            uptime_seconds: uptime.as_secs(),
        }
    }
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(ctx: &HealthContext) -> Result<Self> {
        let mut checks = Vec::new();

        let service_check = Self::check_service_running(ctx).await;
        let mut overall_status = service_check.status;
        checks.push(service_check);

        let (manager_check, manager_stats) = Self::check_match_manager(ctx).await;
        overall_status = overall_status.worst(manager_check.status);
        checks.push(manager_check);

        let amqp_check = Self::check_amqp_health(ctx);
        overall_status = overall_status.worst(amqp_check.status);
        checks.push(amqp_check);

        let uptime = ctx.started_at.elapsed();
        let stats = manager_stats
            .map(|s| ServiceStats::from_manager(&s, uptime))
            .unwrap_or_else(|| ServiceStats {
                uptime_seconds: uptime.as_secs(),
                ..ServiceStats::default()
            });

        Ok(HealthCheck {
            status: overall_status,
            service: ctx.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(ctx: &HealthContext) -> Result<HealthStatus> {
        if ctx.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - the service is running and commands can reach the manager
    pub async fn readiness_check(ctx: &HealthContext) -> Result<HealthStatus> {
        if !ctx.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let (manager_check, _) = Self::check_match_manager(ctx).await;
        Ok(manager_check.status.worst(Self::check_amqp_health(ctx).status))
    }

    async fn check_service_running(ctx: &HealthContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if ctx.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// A stuck lobby degrades the service; an unreachable manager fails it
    async fn check_match_manager(
        ctx: &HealthContext,
    ) -> (ComponentCheck, Option<MatchManagerStats>) {
        let start = Instant::now();

        let (status, message, stats) =
            match tokio::time::timeout(PROBE_TIMEOUT, ctx.match_manager.get_stats()).await {
                Ok(Ok(stats)) if stats.lobby_stuck => (
                    HealthStatus::Degraded,
                    Some("Lobby is full and no match slot is free".to_string()),
                    Some(stats),
                ),
                Ok(Ok(stats)) => (HealthStatus::Healthy, None, Some(stats)),
                Ok(Err(e)) => {
                    error!("Match manager stats check failed: {}", e);
                    (
                        HealthStatus::Degraded,
                        Some(format!("Stats check failed: {}", e)),
                        None,
                    )
                }
                Err(_) => (
                    HealthStatus::Unhealthy,
                    Some("Timed out waiting for the match manager".to_string()),
                    None,
                ),
            };

        let check = ComponentCheck {
            name: "match_manager".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        (check, stats)
    }

    fn check_amqp_health(ctx: &HealthContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match &ctx.amqp_connection {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            ),
            None => {
                debug!("No AMQP connection configured");
                (
                    HealthStatus::Degraded,
                    Some("Running without an AMQP connection".to_string()),
                )
            }
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
