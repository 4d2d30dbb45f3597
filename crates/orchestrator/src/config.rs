//! Application configuration loaded from environment variables.

use std::time::Duration;

use messaging::ProcessorConfig;
use saga::UpdateQueueConfig;

/// Orchestrator configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: HTTP bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `FLOW_DEFINITION_PATH`: flow document (default `flows/order-processing.yaml`)
/// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`: PostgreSQL store; in-memory when unset
/// - `KAFKA_BOOTSTRAP_SERVERS`, `KAFKA_GROUP_ID`: Kafka bus; in-process when unset
/// - `UPDATE_MAX_ATTEMPTS`, `UPDATE_BACKOFF_MS`: optimistic concurrency retries
/// - `POLL_TIMEOUT_MS`, `CONSUMER_ERROR_BACKOFF_MS`: consumer loop timing
/// - `SHUTDOWN_TIMEOUT_SECS`: bound on draining saga updates at shutdown
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub flow_definition_path: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub kafka_bootstrap_servers: Option<String>,
    pub kafka_group_id: String,
    pub update_max_attempts: u32,
    pub update_backoff: Duration,
    pub poll_timeout: Duration,
    pub consumer_error_backoff: Duration,
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            flow_definition_path: non_empty("FLOW_DEFINITION_PATH")
                .unwrap_or(defaults.flow_definition_path),
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            kafka_bootstrap_servers: non_empty("KAFKA_BOOTSTRAP_SERVERS"),
            kafka_group_id: non_empty("KAFKA_GROUP_ID").unwrap_or(defaults.kafka_group_id),
            update_max_attempts: lookup("UPDATE_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .filter(|attempts| *attempts > 0)
                .unwrap_or(defaults.update_max_attempts),
            update_backoff: parsed("UPDATE_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.update_backoff),
            poll_timeout: parsed("POLL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_timeout),
            consumer_error_backoff: parsed("CONSUMER_ERROR_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.consumer_error_backoff),
            shutdown_timeout: parsed("SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn update_queue(&self) -> UpdateQueueConfig {
        UpdateQueueConfig {
            max_attempts: self.update_max_attempts,
            base_backoff: self.update_backoff,
        }
    }

    pub fn processor(&self) -> ProcessorConfig {
        ProcessorConfig {
            poll_timeout: self.poll_timeout,
            error_backoff: self.consumer_error_backoff,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            flow_definition_path: "flows/order-processing.yaml".to_string(),
            database_url: None,
            database_max_connections: 10,
            kafka_bootstrap_servers: None,
            kafka_group_id: "saga-orchestrator".to_string(),
            update_max_attempts: 3,
            update_backoff: Duration::from_millis(100),
            poll_timeout: Duration::from_millis(1000),
            consumer_error_backoff: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}
