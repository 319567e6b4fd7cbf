//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the match manager
//! to the broker, the telemetry API and the monitoring endpoints, and runs
//! the background tasks.

use crate::accounts::{AccountAllocator, AccountPool};
use crate::amqp::{
    AmqpConfig, AmqpConnection, AmqpNotifier, CommandConsumer, CommandHandler, Notifier,
    PublisherConfig,
};
use crate::config::AppConfig;
use crate::error::{MatchmakingError, Result as MatchmakingResult};
use crate::maps::{MapPool, MapSelectorFactory};
use crate::matches::{Collaborators, FactionOutcome, MatchManager, ReadyOutcome};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::score::WeaponCatalog;
use crate::service::health::{HealthCheck, HealthContext, HealthStatus};
use crate::telemetry::{CensusClient, TelemetryClient};
use crate::types::{Command, Notice, NoticeKey, NoticeTarget};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Command handler that applies decisions to the match manager
pub struct ProductionCommandHandler {
    match_manager: MatchManager,
    notifier: Arc<dyn Notifier>,
    metrics_collector: Arc<MetricsCollector>,
}

impl ProductionCommandHandler {
    pub fn new(
        match_manager: MatchManager,
        notifier: Arc<dyn Notifier>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            match_manager,
            notifier,
            metrics_collector,
        }
    }

    async fn dispatch(&self, command: Command) -> MatchmakingResult<()> {
        let manager = &self.match_manager;
        match command {
            Command::Join { player } => {
                let event = manager.join(player).await?;
                debug!("Join processed - lobby event: {:?}", event);
            }
            Command::Leave { player_id } => {
                manager.leave(player_id).await?;
            }
            Command::ClearLobby => {
                if manager.clear_lobby().await.is_none() {
                    debug!("Lobby clear requested on an empty lobby");
                }
            }
            Command::Pick {
                match_id,
                captain_id,
                player_id,
            } => {
                manager.pick(match_id, captain_id, player_id).await?;
            }
            Command::PickFaction {
                match_id,
                captain_id,
                faction,
            } => {
                if let FactionOutcome::Rejected { held_by } =
                    manager.pick_faction(match_id, captain_id, faction).await?
                {
                    debug!(
                        "Faction {:?} already held by {:?} in match {}",
                        faction, held_by, match_id
                    );
                }
            }
            Command::SelectMap {
                match_id,
                captain_id,
                query,
            } => {
                manager.select_map(match_id, captain_id, &query).await?;
            }
            Command::ConfirmMap {
                match_id,
                captain_id,
            } => {
                manager.confirm_map(match_id, captain_id).await?;
            }
            Command::ValidateAccount {
                match_id,
                player_id,
            } => {
                manager.validate_account(match_id, player_id).await?;
            }
            Command::Ready {
                match_id,
                captain_id,
            } => {
                if let ReadyOutcome::NotReady(missing) = manager.ready(match_id, captain_id).await?
                {
                    debug!(
                        "Match {} not ready - waiting on accounts of {:?}",
                        match_id, missing
                    );
                }
            }
            Command::Resign {
                match_id,
                captain_id,
            } => {
                manager.resign(match_id, captain_id).await?;
            }
            Command::Substitute {
                match_id,
                player_id,
                replacement,
            } => {
                manager.substitute(match_id, player_id, replacement).await?;
            }
            Command::Swap {
                match_id,
                first,
                second,
            } => {
                manager.swap(match_id, first, second).await?;
            }
            Command::ClearMatch { match_id } => {
                manager.clear_match(match_id).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for ProductionCommandHandler {
    async fn handle_command(&self, command: Command) -> MatchmakingResult<()> {
        let name = command.name();
        let target = command
            .issuer()
            .map(NoticeTarget::Player)
            .unwrap_or(NoticeTarget::Staff);

        let timer = self.metrics_collector.start_timer();
        let result = self.dispatch(command).await;
        self.metrics_collector
            .record_match_operation(name, timer.stop());
        self.metrics_collector.record_command(name, result.is_ok());

        if let Err(e) = &result {
            let notice = Notice::new(NoticeKey::CommandRejected, target)
                .arg(name)
                .arg(e);
            if let Err(deliver_err) = self.notifier.deliver(notice).await {
                warn!(
                    "Failed to deliver rejection of {} command: {}",
                    name, deliver_err
                );
            }
        }

        result
    }

    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]) {
        error!(
            "Command handler error - type: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            debug!("Message preview: {:?}", preview);
        }
    }
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    match_manager: MatchManager,

    amqp_connection: Arc<AmqpConnection>,

    notifier: Arc<dyn Notifier>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    background_tasks: Vec<JoinHandle<()>>,

    command_consumer: Option<CommandConsumer>,

    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing draft-room service");
        info!(
            "Configuration: service={}, amqp_url={}, match_ids={:?}",
            config.service.name, config.amqp.url, config.matchmaking.match_ids
        );

        let amqp_connection = Self::initialize_amqp(&config).await?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let (match_manager, notifier) = Self::initialize_match_system(
            &config,
            amqp_connection.clone(),
            metrics_collector.clone(),
        )
        .await?;

        let is_running = Arc::new(RwLock::new(false));
        let health = HealthContext::new(
            config.service.name.clone(),
            match_manager.clone(),
            Some(amqp_connection.clone()),
            is_running.clone(),
        );
        let metrics_service = Self::initialize_metrics(&config, metrics_collector, health);

        Ok(Self {
            config,
            match_manager,
            amqp_connection,
            notifier,
            metrics_service,
            background_tasks: Vec::new(),
            command_consumer: None,
            is_running,
        })
    }

    /// Start all background services and command consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting draft-room service");

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;
        self.start_amqp_consumption().await?;
        self.start_background_tasks();

        info!("Draft-room service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of draft-room service");

        *self.is_running.write().await = false;

        if let Some(consumer) = &self.command_consumer {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("AMQP command consumption stopped");
            }
        }

        self.stop_background_tasks().await;

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }

        let final_stats =
            self.match_manager
                .get_stats()
                .await
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("Draft-room service shutdown completed");

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn match_manager(&self) -> MatchManager {
        self.match_manager.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub fn amqp_connection(&self) -> Arc<AmqpConnection> {
        self.amqp_connection.clone()
    }

    /// Components inspected by the health probes
    pub fn health_context(&self) -> HealthContext {
        HealthContext::new(
            self.config.service.name.clone(),
            self.match_manager.clone(),
            Some(self.amqp_connection.clone()),
            self.is_running.clone(),
        )
    }

    /// Full health report
    pub async fn health(&self) -> anyhow::Result<HealthCheck> {
        HealthCheck::check(&self.health_context()).await
    }

    fn initialize_metrics(
        config: &AppConfig,
        metrics_collector: Arc<MetricsCollector>,
        health: HealthContext,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };

        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone())
                .with_health_context(health),
        );
        Arc::new(MetricsService::new(metrics_collector, health_server))
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("Metrics service started on port {}", port);
        Ok(())
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    /// Load the static data pools, falling back to empty pools when no file is configured
    fn load_data(
        config: &AppConfig,
    ) -> Result<(Arc<AccountPool>, Arc<MapPool>, Arc<WeaponCatalog>), ServiceError> {
        let load_error = |what: &str, e: anyhow::Error| ServiceError::Initialization {
            message: format!("Failed to load {}: {:#}", what, e),
        };

        let accounts = match &config.data.accounts_file {
            Some(path) => AccountPool::load(path).map_err(|e| load_error("accounts", e))?,
            None => {
                warn!("No accounts file configured - every player must bring their own account");
                AccountPool::default()
            }
        };
        let maps = match &config.data.maps_file {
            Some(path) => MapPool::load(path).map_err(|e| load_error("maps", e))?,
            None => {
                warn!("No maps file configured - map selection will find nothing");
                MapPool::default()
            }
        };
        let weapons = match &config.data.weapons_file {
            Some(path) => WeaponCatalog::load(path).map_err(|e| load_error("weapons", e))?,
            None => {
                warn!("No weapons file configured - every kill scores as an unknown weapon");
                WeaponCatalog::default()
            }
        };

        info!(
            "Static data loaded - maps: {}, weapons: {}",
            maps.maps().len(),
            weapons.len()
        );
        Ok((Arc::new(accounts), Arc::new(maps), Arc::new(weapons)))
    }

    async fn initialize_match_system(
        config: &AppConfig,
        amqp_connection: Arc<AmqpConnection>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<(MatchManager, Arc<dyn Notifier>), ServiceError> {
        info!("Initializing match system components");

        let (accounts, maps, weapons) = Self::load_data(config)?;

        let telemetry = CensusClient::new(config.telemetry.clone()).map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create telemetry client: {}", e),
            }
        })?;

        let channel = amqp_connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open AMQP channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.exchange_name.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };
        let notifier: Arc<dyn Notifier> = Arc::new(
            AmqpNotifier::new(channel, publisher_config)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to initialize notice publisher: {}", e),
                })?,
        );

        let collaborators = Collaborators {
            notifier: notifier.clone(),
            accounts: accounts as Arc<dyn AccountAllocator>,
            maps: maps as Arc<dyn MapSelectorFactory>,
            telemetry: Arc::new(telemetry) as Arc<dyn TelemetryClient>,
            weapons,
        };

        let match_manager = MatchManager::with_metrics(
            config.matchmaking.clone(),
            config.scoring,
            collaborators,
            metrics_collector,
        );

        Ok((match_manager, notifier))
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let queue_name = self.config.amqp.queue_name.clone();
        info!("Starting AMQP command consumption on '{}'", queue_name);

        let channel = self
            .amqp_connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let queue_declare_args = amqprs::channel::QueueDeclareArguments::new(&queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();

        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;

        debug!("Queue '{}' declared", queue_name);

        let handler = Arc::new(ProductionCommandHandler::new(
            self.match_manager.clone(),
            self.notifier.clone(),
            self.metrics_service.collector(),
        ));
        let consumer = CommandConsumer::new(handler, channel);

        consumer
            .start_consuming(&queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming commands: {}", e),
            })?;

        self.command_consumer = Some(consumer);

        info!("Listening for commands on queue '{}'", queue_name);
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        info!("Starting background maintenance tasks...");

        let stats_task = {
            let match_manager = self.match_manager.clone();
            let metrics_collector = self.metrics_service.collector();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));

                while *is_running.read().await {
                    interval.tick().await;

                    match match_manager.get_stats().await {
                        Ok(stats) => {
                            debug!(
                                "Updating metrics - waiting: {}, active matches: {}, rounds: {}",
                                stats.players_waiting, stats.active_matches, stats.rounds_played
                            );
                            metrics_collector.update_from_manager_stats(&stats);
                        }
                        Err(e) => {
                            warn!("Failed to get manager stats for metrics update: {}", e);
                        }
                    }
                }

                info!("Metrics update task stopped");
            })
        };

        let health_metrics_task = {
            let health = self.health_context();
            let metrics_collector = self.metrics_service.collector();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));

                while health.is_running().await {
                    interval.tick().await;

                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(health.started_at.elapsed().as_secs() as i64);

                    match HealthCheck::check(&health).await {
                        Ok(report) => {
                            metrics_collector.update_health_status(report.status.gauge_value());
                            for check in &report.checks {
                                metrics_collector.update_component_health(
                                    &check.name,
                                    check.status != HealthStatus::Unhealthy,
                                );
                            }
                        }
                        Err(e) => warn!("Health metrics update failed: {}", e),
                    }
                }

                info!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(stats_task);
        self.background_tasks.push(health_metrics_task);

        info!("Background maintenance tasks started");
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for task in self.background_tasks.drain(..) {
            task.abort();
        }

        tokio::time::sleep(Duration::from_millis(500)).await;

        info!("All {} background tasks stopped", task_count);
    }
}
