//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

use serde::Deserialize;

mod messaging;
mod server;
mod storage;

pub use messaging::KafkaConfig;
pub use server::{ServerConfig, StartupConfig};
pub use storage::{DatabaseConfig, DatabaseType, LedgerConfig};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "DBRELAY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "DBRELAY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "DBRELAY_LOG";
/// Environment variable selecting the log output format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "DBRELAY_LOG_FORMAT";

/// Deployment environment variables honoured as overrides, mapped to config keys.
pub const LEGACY_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("KAFKA_BROKER_LIST", "kafka.bootstrap_servers"),
    ("KAFKA_WRITING_DB_TOPIC", "kafka.topic"),
    ("KAFKA_GROUP_ID", "kafka.group_id"),
    ("KAFKA_APP_NAME", "kafka.client_id"),
    ("DATABASE_URL", "database.url"),
    ("DB_ENDPOINT", "database.endpoint"),
    ("DB_PORT", "database.port"),
    ("DB_USER", "database.username"),
    ("DB_PASSWORD", "database.password"),
    ("DB_DATABASE", "database.database"),
    ("SERVER_PORT", "server.port"),
];

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Kafka configuration.
    pub kafka: KafkaConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Status server configuration.
    pub server: ServerConfig,
    /// Ledger behaviour.
    pub ledger: LedgerConfig,
    /// Startup and shutdown behaviour.
    pub startup: StartupConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. Deployment variables listed in `LEGACY_ENV_OVERRIDES`
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Load configuration, resolving environment variables through `lookup`.
    ///
    /// Prefixed `DBRELAY__*` variables are always read from the process environment.
    pub fn load_with<F>(path: Option<&str>, lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Some(config_path) = lookup(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ENV_OVERRIDES {
            builder = builder.set_override_option(*key, lookup(var))?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            database: DatabaseConfig {
                database_type: DatabaseType::Sqlite,
                url: Some("sqlite::memory:".to_string()),
                ..DatabaseConfig::default()
            },
            ..Self::default()
        }
    }
}
