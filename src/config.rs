//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Redis connection URL backing the distributed lock
    pub redis_url: String,

    /// Kafka bootstrap servers for the message bus publisher
    pub kafka_brokers: String,

    /// Kafka client id
    pub kafka_client_id: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// TTL for idempotency records, in hours
    pub idempotency_ttl_hours: i64,

    /// Event count interval at which a fresh snapshot is written
    pub snapshot_threshold: i64,

    /// Number of snapshots retained per aggregate
    pub snapshot_keep_last: i64,

    /// Distributed lock acquisition timeout
    pub lock_ttl: Duration,

    /// Max lock acquisition retries before surfacing LockAcquisitionTimeout
    pub lock_max_retries: u32,

    /// Outbox claim batch size for projectors and the bus publisher
    pub outbox_batch_size: i64,

    /// Poll interval for projector workers
    pub projector_poll_interval: Duration,

    /// Whether projector workers are started automatically at boot
    pub projectors_auto_start: bool,

    /// Poll interval for the message bus publisher
    pub bus_poll_interval: Duration,

    /// Recovery job interval
    pub recovery_interval: Duration,

    /// Directory for best-effort-failure JSONL debug captures
    pub debug_capture_dir: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_env("DATABASE_MAX_CONNECTIONS", "10")?;

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let kafka_brokers =
            env::var("KAFKA_BROKERS").unwrap_or_else(|_| "127.0.0.1:9092".to_string());
        let kafka_client_id =
            env::var("KAFKA_CLIENT_ID").unwrap_or_else(|_| "wallet-ledger".to_string());

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_env("PORT", "3000")?;
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let idempotency_ttl_hours = parse_env("IDEMPOTENCY_TTL_HOURS", "24")?;
        let snapshot_threshold = parse_env("SNAPSHOT_THRESHOLD", "100")?;
        let snapshot_keep_last = parse_env("SNAPSHOT_KEEP_LAST", "3")?;

        let lock_ttl_ms: u64 = parse_env("LOCK_TTL_MS", "5000")?;
        let lock_max_retries = parse_env("LOCK_MAX_RETRIES", "20")?;

        let outbox_batch_size = parse_env("OUTBOX_BATCH_SIZE", "100")?;
        let projector_poll_interval_ms: u64 = parse_env("PROJECTOR_POLL_INTERVAL_MS", "500")?;
        let projectors_auto_start = parse_env::<String>("PROJECTORS_AUTO_START", "true")?
            .eq_ignore_ascii_case("true");

        let bus_poll_interval_ms: u64 = parse_env("BUS_POLL_INTERVAL_MS", "5000")?;
        let recovery_interval_secs: u64 = parse_env("RECOVERY_INTERVAL_SECS", "300")?;

        let debug_capture_dir =
            env::var("DEBUG_CAPTURE_DIR").unwrap_or_else(|_| "./debug-captures".to_string());

        Ok(Self {
            database_url,
            database_max_connections,
            redis_url,
            kafka_brokers,
            kafka_client_id,
            host,
            port,
            environment,
            idempotency_ttl_hours,
            snapshot_threshold,
            snapshot_keep_last,
            lock_ttl: Duration::from_millis(lock_ttl_ms),
            lock_max_retries,
            outbox_batch_size,
            projector_poll_interval: Duration::from_millis(projector_poll_interval_ms),
            projectors_auto_start,
            bus_poll_interval: Duration::from_millis(bus_poll_interval_ms),
            recovery_interval: Duration::from_secs(recovery_interval_secs),
            debug_capture_dir,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
