// ============================================================================
// Chirp Config - Centralized configuration management
// ============================================================================
//
// Environment-driven configuration for the chirp delete-propagation services.
// Supports loading from environment variables with sensible defaults.
//
// ============================================================================

mod broker;
mod database;
mod worker;

pub use broker::{BrokerConfig, BrokerKind, KafkaConfig, RabbitmqConfig};
pub use database::DbConfig;
pub use worker::WorkerConfig;

use anyhow::Result;

const DEFAULT_HEALTH_PORT: u16 = 8081;

/// Main configuration structure for chirp services
#[derive(Clone, Debug)]
pub struct Config {
    /// PostgreSQL connection string (required)
    pub database_url: String,

    /// Port for the worker health endpoint
    pub health_port: u16,

    pub rust_log: String,

    // Sub-configurations
    pub broker: BrokerConfig,
    pub db: DbConfig,
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let broker = BrokerConfig::from_env()?;
        let db = DbConfig::from_env();
        let worker = WorkerConfig::from_env();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")?,

            health_port: std::env::var("HEALTH_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_HEALTH_PORT),

            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),

            broker,
            db,
            worker,
        })
    }
}
