//! Bootstrap utilities for dbrelay binaries.
//!
//! Tracing setup, connection retry and shutdown signal handling.

use std::future::Future;
use std::time::Duration;

use backon::Retryable;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::retry::connection_backoff;
use crate::config::{LOG_ENV_VAR, LOG_FORMAT_ENV_VAR};

/// Initialize tracing with the DBRELAY_LOG environment variable.
///
/// Defaults to "info" level if DBRELAY_LOG is not set. Set
/// DBRELAY_LOG_FORMAT=json for JSON lines output.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Config file path from `--config <path>`, `-c <path>` or `--config=<path>`.
pub fn parse_config_path() -> Option<String> {
    config_path_from_args(std::env::args().skip(1))
}

fn config_path_from_args<I>(args: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

/// Connect to a backing service with exponential backoff retry.
///
/// # Arguments
/// * `service_name` - Human-readable name for logging (e.g., "postgres")
/// * `max_retries` - Retries after the first attempt
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connection on success, or the last error after max retries.
pub async fn connect_with_retry<T, E, F, Fut>(
    service_name: &str,
    max_retries: usize,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let result = connect
        .retry(connection_backoff(max_retries))
        .notify(|err: &E, dur: Duration| {
            warn!(service = %service_name, error = %err, delay = ?dur, "Connection failed, retrying");
        })
        .await;

    match &result {
        Ok(_) => info!(service = %service_name, "Connected"),
        Err(e) => error!(
            service = %service_name,
            attempts = max_retries + 1,
            error = %e,
            "Giving up on connection"
        ),
    }
    result
}

/// Resolve when the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_path_from_args() {
        assert_eq!(
            config_path_from_args(args(&["--config", "relay.yaml"])),
            Some("relay.yaml".to_string())
        );
        assert_eq!(
            config_path_from_args(args(&["-c", "a.yaml"])),
            Some("a.yaml".to_string())
        );
        assert_eq!(
            config_path_from_args(args(&["--config=b.yaml"])),
            Some("b.yaml".to_string())
        );
        assert_eq!(config_path_from_args(args(&["--verbose"])), None);
        assert_eq!(config_path_from_args(args(&["--config"])), None);
    }

    #[tokio::test]
    async fn test_connect_with_retry_recovers() {
        let attempts = AtomicUsize::new(0);

        let result: Result<&str, String> = connect_with_retry("test", 5, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(format!("attempt {} refused", attempt))
                } else {
                    Ok("connected")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_with_retry_gives_up() {
        let attempts = AtomicUsize::new(0);

        let result: Result<(), String> = connect_with_retry("test", 2, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("refused".to_string()) }
        })
        .await;

        assert_eq!(result.unwrap_err(), "refused");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
