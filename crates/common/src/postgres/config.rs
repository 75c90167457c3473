use serde::{Deserialize, Serialize};

/// PostgreSQL connection and pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_pool_size: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "trackers".to_string(),
            username: "trackers".to_string(),
            password: "trackers".to_string(),
            max_pool_size: 10,
        }
    }
}
