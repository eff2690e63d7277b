//! Database configuration types.

use serde::Deserialize;

/// Database type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// PostgreSQL (production).
    #[default]
    Postgres,
    /// SQLite (standalone runs and tests).
    Sqlite,
}

/// Database configuration.
///
/// `url` wins when set; otherwise a PostgreSQL URL is assembled from the
/// individual components.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database type discriminator.
    #[serde(rename = "type")]
    pub database_type: DatabaseType,
    /// Full connection URL.
    pub url: Option<String>,
    /// Database host.
    pub endpoint: String,
    /// Database port.
    pub port: u16,
    /// Database user.
    pub username: String,
    /// Database password.
    pub password: String,
    /// Database name.
    pub database: String,
    /// SQLite file path (used when `type` is sqlite and `url` is unset).
    pub sqlite_path: String,
    /// Maximum pool connections.
    pub max_connections: u32,
    /// Connection attempts before giving up.
    pub connect_retries: usize,
    /// Run embedded migrations on startup.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_type: DatabaseType::Postgres,
            url: None,
            endpoint: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            sqlite_path: "data/dbrelay.db".to_string(),
            max_connections: 10,
            connect_retries: 5,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the connection URL for the configured database type.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match self.database_type {
            DatabaseType::Postgres => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.username, self.password, self.endpoint, self.port, self.database
            ),
            DatabaseType::Sqlite => format!("sqlite://{}?mode=rwc", self.sqlite_path),
        }
    }
}

/// Ledger behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Mark the ledger row `failed` when an apply fails. Otherwise it stays `pending`.
    pub mark_failed: bool,
}
