//! Metrics and monitoring for the draft-room service
//!
//! Prometheus collectors for lobby, match and scoring activity, plus the
//! HTTP health and metrics endpoints.

pub mod collector;
pub mod health;

pub use collector::{
    LobbyMetrics, MatchMetrics, MetricsCollector, MetricsTimer, ScoreMetrics, ServiceMetrics,
};
pub use health::{HealthEndpoints, HealthServer};

use std::sync::Arc;

/// Unified metrics service that combines all monitoring capabilities
#[derive(Clone)]
pub struct MetricsService {
    collector: Arc<MetricsCollector>,
    health_server: Arc<HealthServer>,
}

impl MetricsService {
    pub fn new(collector: Arc<MetricsCollector>, health_server: Arc<HealthServer>) -> Self {
        Self {
            collector,
            health_server,
        }
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn health_server(&self) -> Arc<HealthServer> {
        self.health_server.clone()
    }

    /// Serve the health endpoints until stopped
    pub async fn start(&self) -> anyhow::Result<()> {
        self.health_server.start().await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.health_server.stop().await
    }
}
