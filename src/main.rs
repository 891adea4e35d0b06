//! Main entry point for the scrim-room matchmaking service
//!
//! Loads configuration, initializes logging, recovers open matches and runs
//! until SIGINT or SIGTERM.

use anyhow::Result;
use clap::Parser;
use scrim_room::config::AppConfig;
use scrim_room::service::{AppState, HealthCheck, HealthStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Scrim Room matchmaking service
#[derive(Parser)]
#[command(
    name = "scrim-room",
    version,
    about = "Competitive matchmaking: lobby slots, confirmation, captain draft, map veto and settlement",
    long_about = "Scrim Room seats players into per-mode lobby slots, confirms filled slots, \
                 runs captain selection, the draft and the map veto under turn timers, and \
                 settles ratings once an administrator decides the winner. Requests and \
                 prompts travel over AMQP."
)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", help = "Path to configuration file (TOML format)")]
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

    #[arg(long, value_name = "ID", help = "Add an administrator that receives result evidence")]
    admin: Vec<String>,

    #[arg(long, help = "Run without AMQP; prompts are kept in memory")]
    offline: bool,

    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    #[arg(long, help = "Validate configuration and exit without starting service")]
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

async fn build_state(config: AppConfig, offline: bool) -> Result<Arc<AppState>> {
    let state = if offline {
        AppState::offline(config)?
    } else {
        AppState::new(config).await?
    };
    Ok(Arc::new(state))
}

/// Perform health check and exit with its status
async fn perform_health_check(config: AppConfig, offline: bool) -> Result<()> {
    info!("Performing health check...");
    let app_state = build_state(config, offline).await?;
    app_state.start().await?;

    let health = HealthCheck::check(&app_state).await;
    app_state.shutdown().await?;

    match health {
        Ok(health) => {
            println!("Health Check: {}", health.status);
            println!("  Pending matches: {}", health.stats.pending_matches);
            println!("  Active matches: {}", health.stats.active_matches);
            println!("  Players waiting: {}", health.stats.registry.players_waiting);
            println!("  Clans queued: {}", health.stats.registry.clans_queued);
            for check in &health.checks {
                println!("  {}: {}", check.name, check.status);
            }
            std::process::exit(if health.status == HealthStatus::Unhealthy { 1 } else { 0 });
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for SIGINT or SIGTERM
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
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C) signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}

/// Log a health summary every 30 seconds
async fn health_check_task(app_state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while app_state.is_running().await {
        interval.tick().await;

        match HealthCheck::check(&app_state).await {
            Ok(health) => {
                app_state
                    .metrics()
                    .update_health_status(health.status.as_gauge());
                info!(
                    "Health check: {} - {} pending, {} active matches, {} players waiting",
                    health.status,
                    health.stats.pending_matches,
                    health.stats.active_matches,
                    health.stats.registry.players_waiting
                );
            }
            Err(e) => warn!("Health check failed: {}", e),
        }
    }
}

fn display_startup_banner(config: &AppConfig, offline: bool) {
    info!("Scrim Room Matchmaking Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    if offline {
        info!("   AMQP: disabled");
    } else {
        info!("   AMQP: {}", config.amqp.url);
    }
    info!(
        "   Confirmation: {}s, turns: {}s",
        config.matchmaking.confirm_timeout_seconds, config.matchmaking.turn_timeout_seconds
    );
    info!(
        "   No-show ban after {} warnings, {} minutes",
        config.matchmaking.warning_threshold, config.matchmaking.ban_minutes
    );
    info!("   Administrators: {}", config.matchmaking.admins.len());
}

/// Merge the config file or environment with CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
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
    if let Some(port) = args.health_port {
        config.service.health_port = port;
    }
    for admin in &args.admin {
        if !config.matchmaking.is_admin(admin) {
            config.matchmaking.admins.push(admin.clone());
        }
    }

    scrim_room::config::validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config, args.offline).await;
    }

    display_startup_banner(&config, args.offline);
    if args.dry_run {
        info!("Configuration valid, dry run complete");
        return Ok(());
    }

    let app_state = match build_state(config.clone(), args.offline).await {
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

    let health_task = tokio::spawn(health_check_task(app_state.clone()));

    info!("Scrim Room is running, press Ctrl+C to stop");
    wait_for_shutdown_signal().await;
    info!("Shutdown signal received, beginning graceful shutdown");
    health_task.abort();

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("Graceful shutdown completed"),
        Ok(Err(e)) => warn!("Shutdown finished with an error: {}", e),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    Ok(())
}
