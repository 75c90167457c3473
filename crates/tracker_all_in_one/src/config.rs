use common::postgres::PostgresConfig;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracker_ingester::WriteQueueConfig;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Namespace scoping tracker tables and the device registry
    #[serde(default = "default_namespace_id")]
    pub namespace_id: i64,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream carrying uplink envelopes
    #[serde(default = "default_nats_uplink_stream")]
    pub nats_uplink_stream: String,

    /// Subject pattern for the uplink consumer filter
    #[serde(default = "default_nats_uplink_subject")]
    pub nats_uplink_subject: String,

    /// Durable consumer name
    #[serde(default = "default_nats_consumer_name")]
    pub nats_consumer_name: String,

    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    /// Max wait time for batches in seconds
    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    // Write queue configuration
    /// Idle flush interval in milliseconds
    #[serde(default = "default_write_queue_idle_ms")]
    pub write_queue_idle_ms: u64,

    /// Time allowed for queues to drain on shutdown
    #[serde(default = "default_write_queue_stop_grace_secs")]
    pub write_queue_stop_grace_secs: u64,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // OpenTelemetry configuration
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_namespace_id() -> i64 {
    1
}

// PostgreSQL defaults
fn default_postgres_host() -> String {
    PostgresConfig::default().host
}

fn default_postgres_port() -> u16 {
    PostgresConfig::default().port
}

fn default_postgres_database() -> String {
    PostgresConfig::default().database
}

fn default_postgres_username() -> String {
    PostgresConfig::default().username
}

fn default_postgres_password() -> String {
    PostgresConfig::default().password
}

fn default_postgres_max_pool_size() -> usize {
    PostgresConfig::default().max_pool_size
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_uplink_stream() -> String {
    "tracker_uplinks".to_string()
}

fn default_nats_uplink_subject() -> String {
    "tracker_uplinks.>".to_string()
}

fn default_nats_consumer_name() -> String {
    "tracker-registry".to_string()
}

fn default_nats_batch_size() -> usize {
    100
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

// Write queue defaults
fn default_write_queue_idle_ms() -> u64 {
    1000
}

fn default_write_queue_stop_grace_secs() -> u64 {
    5
}

fn default_startup_timeout_secs() -> u64 {
    30
}

// OpenTelemetry defaults
fn default_otel_enabled() -> bool {
    false
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "tracker-all-in-one".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("TRACKER"))
            .build()?
            .try_deserialize()
    }

    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }

    pub fn write_queue(&self) -> WriteQueueConfig {
        WriteQueueConfig {
            idle_interval: Duration::from_millis(self.write_queue_idle_ms),
            stop_grace: Duration::from_secs(self.write_queue_stop_grace_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests mutate process-wide env vars
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    const VARS: [&str; 4] = [
        "TRACKER_LOG_LEVEL",
        "TRACKER_NAMESPACE_ID",
        "TRACKER_POSTGRES_PORT",
        "TRACKER_WRITE_QUEUE_IDLE_MS",
    ];

    fn clear_env() {
        for var in VARS {
            // SAFETY: callers hold TEST_LOCK
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        let config = ServiceConfig::from_env().unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.namespace_id, 1);
        assert_eq!(config.postgres().port, 5432);
        assert_eq!(config.write_queue(), WriteQueueConfig::default());
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        // SAFETY: test holds TEST_LOCK
        unsafe {
            std::env::set_var("TRACKER_LOG_LEVEL", "debug");
            std::env::set_var("TRACKER_NAMESPACE_ID", "42");
            std::env::set_var("TRACKER_POSTGRES_PORT", "6543");
            std::env::set_var("TRACKER_WRITE_QUEUE_IDLE_MS", "250");
        }

        let config = ServiceConfig::from_env().unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.namespace_id, 42);
        assert_eq!(config.postgres().port, 6543);
        assert_eq!(
            config.write_queue().idle_interval,
            Duration::from_millis(250)
        );

        clear_env();
    }
}
