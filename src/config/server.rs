//! Server and process lifecycle configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Status server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port for the status HTTP server.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4100,
        }
    }
}

impl ServerConfig {
    /// `host:port` bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Startup and shutdown behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Treat broker admin, consumer creation and database connection failures
    /// as fatal. When false the status server keeps running without a consumer.
    pub fail_fast: bool,
    /// Seconds to wait for partition queues to drain on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            fail_fast: true,
            shutdown_grace_secs: 10,
        }
    }
}

impl StartupConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
