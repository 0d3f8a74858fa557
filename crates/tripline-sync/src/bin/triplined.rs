//! Tripline sync daemon.
//!
//! Loads config, opens the database, and runs the periodic sync +
//! reconciliation loop until Ctrl-C.
//!
//! ```text
//! TRIPLINE_VENDOR_API_KEY=... triplined [config.toml]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tripline_db::{Database, DbConfig};
use tripline_sync::{
    HttpVendorClient, ReconcileEngine, Scheduler, SyncConfig, SyncOrchestrator,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SyncConfig::load(config_path)?;

    // Fail fast on a missing key rather than on the first vendor call
    config.api_key()?;

    let db = Database::new(DbConfig::new(&config.database.path)).await?;
    let vendor = Arc::new(HttpVendorClient::new(&config.vendor)?);

    let orchestrator = Arc::new(SyncOrchestrator::new(db.clone(), vendor, config.clone()));
    let reconcile = Arc::new(ReconcileEngine::new(db.clone(), config.clone()));

    let handle = Scheduler::new(db.clone(), orchestrator, reconcile, config).spawn();
    info!("Tripline daemon running, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;
    db.close().await;

    Ok(())
}
