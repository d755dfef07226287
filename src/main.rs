mod config;
mod game;
mod matchmaking;
mod metrics;
mod net;
mod replay;
mod session;
mod util;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, Level};

use crate::config::ServerConfig;
use crate::matchmaking::MatchmakingQueue;
use crate::metrics::Metrics;
use crate::net::gateway::{self, GatewayState};
use crate::net::http_api::{self, ApiState};
use crate::replay::ReplayStore;
use crate::session::{RunnerDeps, SessionRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Stronghold Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ServerConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: {}:{}, tick_rate={} Hz, max_sessions={}",
        config.bind_address, config.port, config.tick_rate, config.max_sessions
    );

    // Shared services
    let metrics = Arc::new(Metrics::new());
    let replays = Arc::new(ReplayStore::new());
    let registry = Arc::new(SessionRegistry::new(
        config.max_sessions,
        RunnerDeps {
            metrics: metrics.clone(),
            replays: replays.clone(),
            tick_duration: config.tick_duration(),
            empty_grace: Duration::from_secs(config.empty_grace_secs),
        },
    ));
    let matchmaking = Arc::new(Mutex::new(MatchmakingQueue::new(
        Duration::from_secs(config.matchmaking_timeout_secs),
        config.default_max_players,
    )));

    // Metrics endpoint
    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    // REST API
    let api_state = ApiState {
        registry: registry.clone(),
        replays: replays.clone(),
        matchmaking: matchmaking.clone(),
        metrics: metrics.clone(),
        default_max_players: config.default_max_players,
        default_map_size: 128,
        snapshot_interval_ticks: config.snapshot_interval_ticks,
    };
    let api_addr = SocketAddr::new(config.bind_address, config.http_port);
    tokio::spawn(async move {
        if let Err(e) = http_api::run(api_addr, api_state).await {
            error!("REST API error: {}", e);
        }
    });

    // Janitor: drop handles of sessions whose task already finished
    let janitor_registry = registry.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            let removed = janitor_registry.remove_ended();
            if removed > 0 {
                info!("Reaped {} ended session(s)", removed);
            }
        }
    });

    // Gateway
    let gateway_state = GatewayState {
        registry: registry.clone(),
        metrics: metrics.clone(),
    };
    let gateway_addr = SocketAddr::new(config.bind_address, config.port);
    info!(
        "Server ready on ws://{} (REST on port {})",
        gateway_addr, config.http_port
    );

    // Shutdown signal handler
    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received");
    };

    // Run gateway with graceful shutdown
    tokio::select! {
        result = gateway::run(gateway_addr, gateway_state) => {
            if let Err(e) = result {
                error!("Gateway error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    info!("Server stopped");
    Ok(())
}
