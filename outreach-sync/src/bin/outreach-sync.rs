//! Outreach sync daemon
//!
//! Usage:
//!   outreach-sync [--config outreach-sync.toml] run
//!   outreach-sync login --username dana
//!   outreach-sync metrics

use anyhow::Context;
use clap::{Parser, Subcommand};
use outreach_sync::{ConnectivityState, SyncConfig, SyncEngine, SyncEvent};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{
    fmt, fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Parser, Debug)]
#[command(name = "outreach-sync")]
#[command(about = "Keep the local outreach cache in sync with the remote store")]
struct Args {
    /// Configuration file path (defaults to ./outreach-sync.* if present)
    #[arg(short, long, env = "OUTREACH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap and keep syncing until interrupted
    Run,
    /// Authenticate against the remote store and pull its state
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "OUTREACH_PASSWORD")]
        password: String,
    },
    /// Print engagement metrics for the local cache
    Metrics,
    /// Clear the signed-in user
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = SyncConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(args.verbose, config.json_logs);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        primary = %config.primary_base,
        fallback = %config.fallback_base,
        db_path = %config.db_path,
        "Starting outreach sync"
    );

    let engine = SyncEngine::open(config).await.context("Failed to open sync engine")?;
    let _events = engine.on_sync_event(|event| {
        if let SyncEvent::CacheCorrupted { key } = event {
            warn!(key = %key, "Local cache key was unreadable and has been reset");
        }
    });
    engine.bootstrap().await.context("Bootstrap failed")?;

    match args.command {
        Command::Run => run(&engine).await?,
        Command::Login { username, password } => {
            let user = engine.authenticate(&username, &password).await?;
            info!(username = %user.username, admin = user.is_admin(), "Logged in");
        }
        Command::Metrics => {
            let metrics = engine.metrics().await;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Command::Logout => {
            engine.logout().await?;
            info!("Logged out");
        }
    }

    Ok(())
}

async fn run(engine: &SyncEngine) -> anyhow::Result<()> {
    if let Some(user) = engine.current_user().await? {
        info!(username = %user.username, "Restored session");
    }

    let _status = engine.on_status_change(|available| {
        tracing::debug!(available = *available, "Connectivity probed");
    });
    let _data = engine.on_data_change(|()| info!("Local data replaced from remote"));

    // Heartbeats push local writes once the remote answers again
    engine.start();
    info!(
        online = engine.connectivity() == ConnectivityState::Available,
        base = %engine.api_base(),
        "Sync running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;

    engine.dispose();
    info!("Shutting down");
    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("outreach_sync={level},sqlx=warn,reqwest=info").into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_timer(ChronoUtc::rfc_3339()))
            .init();
    }
}
