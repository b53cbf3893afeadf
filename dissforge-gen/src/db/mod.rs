//! Database access for dissforge-gen
//!
//! One SQLite file in the root folder holds persisted stage artifacts so a
//! restarted service resumes from completed stages.

pub mod artifacts;
pub mod retry;

pub use artifacts::ArtifactDb;
pub use retry::retry_on_lock;

use dissforge_common::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{debug, info};

/// Open (creating if needed) the database and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new().max_connections(8).connect(&db_url).await?;

    // WAL lets readers proceed while a stage publishes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 2000").execute(&pool).await?;

    init_tables(&pool).await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }
    Ok(pool)
}

/// In-memory database with the same schema, for tests and ephemeral runs
pub async fn init_memory_pool() -> Result<SqlitePool> {
    // A single connection: every new in-memory connection is a fresh database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stage_artifacts (
            fingerprint TEXT PRIMARY KEY,
            stage TEXT NOT NULL,
            payload TEXT NOT NULL,
            upstream TEXT NOT NULL,
            produced_at TEXT NOT NULL,
            payload_bytes INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_stage_artifacts_produced_at ON stage_artifacts(produced_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
