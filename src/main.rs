//! Bingo Hall server binary
//!
//! Opens the store, refunds rounds a previous run left behind, starts the
//! automatic round cycle and serves the HTTP/WebSocket API.

use bingo_hall::api::ApiServer;
use bingo_hall::common::types::Player;
use bingo_hall::games::{CycleSupervisor, EventBus, LogAnnouncer, RoundEngine};
use bingo_hall::metrics::GameMetrics;
use bingo_hall::store::GameStore;
use bingo_hall::BingoConfig;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "bingo-hall")]
#[command(about = "Live bingo round server", long_about = None)]
struct Args {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(long)]
    config: Option<String>,

    /// API server host
    #[arg(long)]
    host: Option<String>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,

    /// Database directory
    #[arg(long)]
    db_path: Option<String>,

    /// Keep everything in memory (nothing survives a restart)
    #[arg(long)]
    in_memory: bool,

    /// Do not open rounds automatically
    #[arg(long)]
    no_cycle: bool,

    /// Seed N demo players (ids 1..=N, token "demo-<id>") into an in-memory store
    #[arg(long, default_value = "0")]
    demo_players: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BingoConfig::from_toml_file(path)?,
        None => BingoConfig::default(),
    };
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.storage.data_directory = db_path;
    }
    if args.in_memory {
        config.storage.in_memory = true;
    }
    if args.no_cycle {
        config.cycle.enabled = false;
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_filter.clone().into()),
        )
        .init();

    info!("🚀 Starting Bingo Hall");

    let store = Arc::new(open_store(&config)?);
    if args.demo_players > 0 {
        if config.storage.in_memory {
            for id in 1..=args.demo_players {
                store.upsert_player(Player::new(id, format!("player{}", id), 1_000, format!("demo-{}", id)))?;
            }
            info!(players = args.demo_players, "seeded demo players");
        } else {
            warn!("--demo-players only applies to in-memory runs, ignoring");
        }
    }

    let metrics = Arc::new(GameMetrics::new()?);
    let events = EventBus::new(config.api.event_buffer);
    let engine = Arc::new(RoundEngine::new(
        config.game.clone(),
        store,
        events,
        Arc::new(LogAnnouncer),
        metrics.clone(),
    ));

    let supervisor = Arc::new(CycleSupervisor::new(engine.clone(), config.cycle.clone()));
    let report = supervisor.recover()?;
    if !report.rounds.is_empty() {
        warn!(
            rounds = ?report.rounds,
            players = report.players_refunded,
            amount = report.amount_refunded,
            "🔧 refunded rounds left open by the previous run"
        );
    }

    if config.cycle.enabled {
        let _cycle = supervisor.spawn();
    } else {
        info!("automatic round cycle disabled");
    }

    ApiServer::new(config.api.clone(), engine, metrics)
        .with_metrics_endpoint(config.monitoring.enable_metrics)
        .run()
        .await
}

#[cfg(feature = "persistent")]
fn open_store(config: &BingoConfig) -> Result<GameStore, Box<dyn std::error::Error>> {
    use bingo_hall::store::RocksPersistence;

    if config.storage.in_memory {
        info!("📂 Using in-memory storage");
        return Ok(GameStore::in_memory());
    }
    info!("📂 Opening database: {}", config.storage.data_directory);
    let backend = RocksPersistence::open(&config.storage.data_directory)?;
    Ok(GameStore::open(Box::new(backend))?)
}

#[cfg(not(feature = "persistent"))]
fn open_store(config: &BingoConfig) -> Result<GameStore, Box<dyn std::error::Error>> {
    if !config.storage.in_memory {
        warn!("built without the `persistent` feature, falling back to in-memory storage");
    }
    Ok(GameStore::in_memory())
}
