//! dissforge-gen - Diss track generation service
//!
//! Scrapes a Reddit post, writes lyrics with a local LLM, synthesizes vocals,
//! locks them to a beat and serves the mastered mix over HTTP + SSE.

use anyhow::{Context, Result};
use clap::Parser;
use dissforge_common::config::{resolve_root_folder, RootFolderInitializer, TomlConfig, ROOT_FOLDER_ENV_VAR};
use dissforge_common::events::EventBus;
use dissforge_gen::adapters::Adapters;
use dissforge_gen::config::GeneratorConfig;
use dissforge_gen::db::{artifacts::ArtifactDb, init_database_pool};
use dissforge_gen::pipeline::{ArtifactStore, Orchestrator};
use dissforge_gen::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Interval between database prune passes
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Parser)]
#[command(name = "dissforge-gen", version, about = "Diss track generation service")]
struct Args {
    /// Root folder holding the database and beat library
    #[arg(long, env = "DISSFORGE_ROOT_FOLDER")]
    root_folder: Option<String>,

    /// Listen address, overrides `[generator.server] bind_address`
    #[arg(long)]
    bind: Option<String>,

    /// Explicit TOML config file
    #[arg(long, env = "DISSFORGE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml = TomlConfig::load_or_default(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // RUST_LOG wins over the TOML level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&toml.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting dissforge-gen");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = GeneratorConfig::from_toml(&toml)
        .map_err(|e| anyhow::anyhow!("Invalid generator configuration: {}", e))?;
    let config = Arc::new(config);

    // Root folder: CLI, then environment, then TOML, then platform default
    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV_VAR,
        toml.root_folder.as_deref(),
    );
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Root folder: {}", initializer.root().display());

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let pool = init_database_pool(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;
    let db = ArtifactDb::new(pool, config.store.max_lock_wait_ms);

    let store = ArtifactStore::with_database(db, config.store.capacity, config.store.max_age());
    match store.prune_persisted().await {
        Ok(removed) => info!(removed, "Pruned expired artifacts"),
        Err(e) => warn!("Startup prune failed: {}", e),
    }
    spawn_prune_task(store.clone());

    let adapters = Adapters::from_config(&config, initializer.beats_path())
        .map_err(|e| anyhow::anyhow!("Failed to build adapters: {}", e))?;
    let event_bus = EventBus::new(config.server.event_capacity);

    let orchestrator = Orchestrator::new(Arc::clone(&config), adapters, store, event_bus)
        .map_err(|e| anyhow::anyhow!("Failed to build orchestrator: {}", e))?;
    let state = AppState::new(Arc::new(orchestrator));
    let app = dissforge_gen::build_router(state);

    let bind = args.bind.unwrap_or_else(|| config.server.bind_address.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_prune_task(store: ArtifactStore) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        // First tick completes immediately; startup already pruned
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.prune_persisted().await {
                Ok(removed) if removed > 0 => info!(removed, "Pruned expired artifacts"),
                Ok(_) => {}
                Err(e) => warn!("Periodic prune failed: {}", e),
            }
        }
    });
}
