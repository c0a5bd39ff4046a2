// Cascade Worker - deletion-event consumer
// ============================================================================
//
// Consumes user-deletion events from the configured broker and cascades the
// delete across tweets, likes, and replies.
//
// Key principle: the broker is the source of truth until the cascade lands.
// - The message is acknowledged ONLY after every delete succeeded
// - On storage failure the message is requeued and redelivered
// - After the retry budget is spent the message moves to the dead-letter
//   channel, with the failure reason attached, and is acknowledged
// - Redelivery is harmless: deleting rows that are already gone is a no-op
//
// ============================================================================

mod health;

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chirp_broker::connect_consumer;
use chirp_config::{BrokerKind, Config};
use chirp_db::{create_pool, init_schema, PgCascadeStore};
use chirp_pipeline::CascadeWorker;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Cascade Worker Starting ===");
    match config.broker.kind {
        BrokerKind::Rabbitmq => {
            info!(
                host = %config.broker.rabbitmq.host,
                queue = %config.broker.rabbitmq.queue,
                "Broker: RabbitMQ"
            );
        }
        BrokerKind::Kafka => {
            info!(
                brokers = %config.broker.kafka.brokers,
                topic = %config.broker.kafka.topic,
                group = %config.broker.kafka.consumer_group,
                "Broker: Kafka"
            );
        }
    }

    let pool = create_pool(&config.database_url, &config.db).await?;
    init_schema(&pool).await?;

    let consumer = connect_consumer(&config.broker)
        .await
        .context("Failed to connect broker consumer")?;

    let store = Arc::new(PgCascadeStore::new(pool.clone()));
    let mut worker = CascadeWorker::new(consumer, store, &config.worker);

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

    // Health endpoint runs for the life of the process
    let health_state = health::HealthState {
        pool: pool.clone(),
        phase: worker.phase_handle(),
    };
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_state, health_port).await {
            error!(error = %e, "Health endpoint failed");
        }
    });

    let stats = worker.run(shutdown).await?;
    info!(
        completed = stats.completed,
        retried = stats.retried,
        dead_lettered = stats.dead_lettered,
        "Cascade worker exiting"
    );
    Ok(())
}
