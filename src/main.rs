//! Main entry point for the draft-room service
//!
//! Loads the configuration, wires the match system to the broker and runs
//! until SIGINT or SIGTERM, then shuts down gracefully.

use anyhow::Result;
use clap::Parser;
use draft_room::config::{validate_config, AppConfig};
use draft_room::service::{AppState, HealthCheck, HealthContext, HealthStatus};
use std::path::PathBuf;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Draft Room - captain-drafted team match lifecycle service
#[derive(Parser)]
#[command(
    name = "draft-room",
    version,
    about = "Match lifecycle service for captain-drafted team matches",
    long_about = "Draft Room queues players in a lobby, drafts two captain-led teams, \
                 negotiates factions and maps, lends game accounts, times two rounds \
                 and scores them from gameplay telemetry. Commands arrive over AMQP \
                 and notices are published back to a topic exchange."
)]
struct Args {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    #[arg(long, value_name = "N", help = "Override the number of players per match")]
    lobby_size: Option<usize>,

    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Connect, probe every component once and exit with the result
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = AppState::new(config).await?;

    match app_state.health().await {
        Ok(health) => {
            println!("Health Check: {}", health.status);
            for check in &health.checks {
                println!(
                    "  {}: {}{}",
                    check.name,
                    check.status,
                    check
                        .message
                        .as_deref()
                        .map(|m| format!(" ({})", m))
                        .unwrap_or_default()
                );
            }
            println!("  Players Waiting: {}", health.stats.players_waiting);
            println!("  Free Match Slots: {}", health.stats.free_slots);

            // The service is not started here, so only a dead component fails the probe
            let healthy = health
                .checks
                .iter()
                .filter(|c| c.name != "service_running")
                .all(|c| c.status != HealthStatus::Unhealthy);
            std::process::exit(if healthy { 0 } else { 1 });
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Log a health summary every 30 seconds
async fn health_check_task(health: HealthContext) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while health.is_running().await {
        interval.tick().await;

        match HealthCheck::check(&health).await {
            Ok(report) => {
                info!(
                    "Health check: {} - {} waiting, {} active matches, {} rounds played",
                    report.status,
                    report.stats.players_waiting,
                    report.stats.active_matches,
                    report.stats.rounds_played
                );
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
            }
        }
    }
}

fn display_startup_banner(config: &AppConfig) {
    info!("Draft Room Match Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   AMQP: {}", config.amqp.url);
    info!("   Lobby size: {}", config.matchmaking.lobby_size);
    info!("   Match slots: {:?}", config.matchmaking.match_ids);
    info!(
        "   Round length: {} min",
        config.matchmaking.round_length_minutes
    );
}

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading configuration from: {}", config_path.display());
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    if let Some(lobby_size) = args.lobby_size {
        config.matchmaking.lobby_size = lobby_size;
    }

    // Overrides can break what the loader already checked
    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    let mut app_state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let health_task = tokio::spawn(health_check_task(app_state.health_context()));

    info!("Draft Room service is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, beginning graceful shutdown...");
    health_task.abort();

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("Graceful shutdown completed successfully"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    info!("Draft Room service stopped");
    Ok(())
}
