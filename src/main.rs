//! Runevale Game Server
//!
//! Thin entry point: load configuration, build the server context, start
//! the engine and the tick pump, accept connections, and tear everything
//! down in order on shutdown.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use runevale_server::config::ServerConfig;
use runevale_server::game::npc::NpcSpawn;
use runevale_server::game::world;
use runevale_server::net::transport;
use runevale_server::state::ServerContext;
use runevale_server::{REVISION, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Runevale Game Server v{} (revision {})", VERSION, REVISION);

    let config = ServerConfig::load().await?;
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    let ctx = ServerContext::new(config)?;
    ctx.start_engine();

    load_npc_spawns(&ctx);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Tick pump: one composite tick task per interval
    let pump_ctx = ctx.clone();
    let mut pump_shutdown_rx = shutdown_tx.subscribe();
    let pump_handle = tokio::spawn(async move {
        world::run_tick_pump(pump_ctx, &mut pump_shutdown_rx).await;
    });

    // Game listener
    let listener_ctx = ctx.clone();
    let mut listener_shutdown_rx = shutdown_tx.subscribe();
    let listener_handle = tokio::spawn(async move {
        if let Err(e) = transport::run_listener(listener_ctx, &mut listener_shutdown_rx).await {
            error!(error = %e, "Game listener failed");
        }
    });

    info!(
        world_id = ctx.world.settings.world_id,
        port = ctx.config.game_port,
        "Server startup complete"
    );

    wait_for_shutdown().await;
    info!("Shutting down server...");
    let _ = shutdown_tx.send(());

    let _ = pump_handle.await;
    let _ = listener_handle.await;

    // Teardown order: stop feeding the engine, drain it, then save while
    // the world is quiescent
    ctx.sessions.close_all();
    ctx.engine.stop();

    let players = ctx.world.players();
    info!(players = players.len(), "Saving connected players");
    for player in players {
        ctx.auth.save_player(&player);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,runevale_server=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Populate the world from the NPC spawn file, if one exists
fn load_npc_spawns(ctx: &Arc<ServerContext>) {
    let path = ctx.config.data_path.join("npc_spawns.json");
    let spawns = match read_spawn_file(&path) {
        Ok(Some(spawns)) => spawns,
        Ok(None) => {
            info!(path = %path.display(), "No NPC spawn file; world starts empty");
            return;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to load NPC spawns");
            return;
        }
    };

    let mut placed = 0usize;
    for spawn in &spawns {
        if ctx.world.register_npc(spawn).is_some() {
            placed += 1;
        } else {
            warn!(npc_id = spawn.npc_id, "NPC registry full; spawn dropped");
            break;
        }
    }
    info!(placed, total = spawns.len(), "NPC spawns loaded");
}

fn read_spawn_file(path: &Path) -> Result<Option<Vec<NpcSpawn>>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
