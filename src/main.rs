//! Main entry point for the mmr-matchmaker service
//!
//! Runs the matchmaking service with its health server and reconciliation
//! scheduler, or a one-shot season recalculation.

use anyhow::{Context, Result};
use clap::Parser;
use mmr_matchmaker::config::{validate_config, AppConfig, EngineKind};
use mmr_matchmaker::service::AppState;
use mmr_matchmaker::{MatchId, SeasonId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// mmr-matchmaker - 2v2 matchmaking and skill rating service
#[derive(Parser)]
#[command(
    name = "mmr-matchmaker",
    version,
    about = "A 2v2 matchmaking coordinator and skill-rating pipeline",
    long_about = "mmr-matchmaker groups queued players four at a time into pending matches, \
                 promotes unanimously accepted matches to active matches, and rates submitted \
                 results with a Weng-Lin (OpenSkill) rating engine, either in-process or over HTTP."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(
        long,
        help = "Query the readiness endpoint of a running instance and exit with its status"
    )]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    /// Rating engine override
    #[arg(long, value_name = "ENGINE", help = "Rating engine to use (local, http)")]
    rating_engine: Option<EngineKind>,

    /// Rating service URL override
    #[arg(long, value_name = "URL", help = "Base URL of the remote rating service")]
    rating_url: Option<String>,

    /// Data file override
    #[arg(
        long,
        value_name = "FILE",
        help = "JSON snapshot of players, seasons, matches and ratings"
    )]
    data_file: Option<PathBuf>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,

    /// Recalculate a season and exit
    #[arg(
        long,
        value_name = "SEASON_ID",
        help = "Recalculate ratings of the given (latest) season and exit"
    )]
    recalculate_season: Option<SeasonId>,

    /// First match of the recalculation
    #[arg(
        long,
        value_name = "MATCH_ID",
        requires = "recalculate_season",
        help = "Only recalculate matches from this match id onwards"
    )]
    from_match: Option<MatchId>,
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

/// Ask a running instance whether it is ready
async fn perform_health_check(config: &AppConfig) -> Result<bool> {
    let url = format!("http://127.0.0.1:{}/ready", config.service.health_port);
    info!("Performing health check against {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("Failed to build health check client")?;

    match client.get(&url).send().await {
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            println!("Health Check: {} {}", status.as_u16(), body);
            Ok(status.is_success())
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            Ok(false)
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
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("🚀 mmr-matchmaker");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    match &config.service.data_file {
        Some(path) => info!("   Data file: {}", path.display()),
        None => info!("   Data file: none (in-memory only)"),
    }
    info!(
        "   Acceptance window: {}s",
        config.matchmaking.acceptance_window_seconds
    );
    info!(
        "   Sweep interval: {}ms busy / {}ms idle",
        config.matchmaking.busy_poll_interval_ms, config.matchmaking.idle_poll_interval_ms
    );
    match config.rating.engine {
        EngineKind::Local => info!("   Rating engine: local Weng-Lin"),
        EngineKind::Http => info!("   Rating engine: {}", config.rating.base_url),
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load configuration, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
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

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    if let Some(engine) = args.rating_engine {
        config.rating.engine = engine;
    }

    if let Some(data_file) = &args.data_file {
        config.service.data_file = Some(data_file.clone());
    }

    if let Some(rating_url) = &args.rating_url {
        config.rating.base_url = rating_url.clone();
    }

    // Overrides bypass the checks done while loading
    validate_config(&config)?;
    Ok(config)
}

/// Recalculate one season, stopping between batches on a shutdown signal
async fn run_recalculation(
    config: AppConfig,
    season_id: SeasonId,
    from_match_id: Option<MatchId>,
) -> Result<()> {
    if config.service.data_file.is_none() {
        anyhow::bail!("Season recalculation needs a data file (--data-file or DATA_FILE)");
    }

    let app_state = AppState::new(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_task = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let result = app_state
        .recalculate_season(season_id, from_match_id, shutdown_rx)
        .await;
    signal_task.abort();

    let summary = result?;
    info!(
        "Recalculated season {}: {} matches in {} batches ({} abandoned){}",
        season_id,
        summary.matches,
        summary.batches,
        summary.abandoned_batches,
        if summary.cancelled { ", cancelled" } else { "" }
    );
    Ok(())
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
        let healthy = perform_health_check(&config).await?;
        std::process::exit(if healthy { 0 } else { 1 });
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    if let Some(season_id) = args.recalculate_season {
        if let Err(e) = run_recalculation(config, season_id, args.from_match).await {
            error!("Season recalculation failed: {:#}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Initializing service components...");
    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    info!("✅ mmr-matchmaker is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("✅ Graceful shutdown completed successfully"),
        Ok(Err(e)) => warn!("Shutdown completed with errors: {}", e),
        Err(_) => warn!("⚠️  Shutdown timeout exceeded, forcing exit"),
    }

    info!("🛑 mmr-matchmaker stopped");
    Ok(())
}
