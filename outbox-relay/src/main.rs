// Outbox Relay - guaranteed publish for deletion events
// ============================================================================
//
// The user service deletes the account row and writes the deletion event
// into the outbox table in one transaction. This process drains the table:
// each row is published to the broker and marked published only after the
// broker accepted it, so a committed user delete always reaches the cascade
// worker eventually, even across broker outages. Crash between publish and
// mark produces a duplicate, which the idempotent cascade absorbs.
//
// ============================================================================

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chirp_broker::connect_publisher;
use chirp_config::Config;
use chirp_db::{create_pool, init_schema, PgOutboxStore};
use chirp_pipeline::OutboxRelay;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Outbox Relay Starting ===");
    info!(broker = ?config.broker.kind, "Publishing deletion events");

    let pool = create_pool(&config.database_url, &config.db).await?;
    init_schema(&pool).await?;

    let publisher = connect_publisher(&config.broker)
        .await
        .context("Failed to connect broker publisher")?;

    let store = Arc::new(PgOutboxStore::new(pool));
    let relay = OutboxRelay::new(store, Arc::from(publisher), &config.worker);

    // Shutdown flag — set to true on SIGTERM/Ctrl-C
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("SIGTERM received, initiating graceful shutdown...");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("SIGINT received, initiating graceful shutdown...");
                }
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl-C received, initiating graceful shutdown...");
        }
        shutdown_signal.store(true, Ordering::SeqCst);
    });

    relay.run(shutdown).await
}
