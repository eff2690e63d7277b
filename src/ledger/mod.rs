//! Dedup ledger for applied mutations.
//!
//! One `db_change_log` row per distinct message key records whether that
//! mutation has been applied. The ledger primary key is the only concurrency
//! control: a `success` row is never applied again, so redelivered messages
//! are skipped.
//!
//! Status transitions: `(absent) -> pending -> success`, plus `failed` when
//! failed applies are marked.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::config::{DatabaseConfig, DatabaseType};
use crate::message::{MutationMessage, Statement};

pub use crate::config::LedgerConfig;
#[cfg(any(feature = "postgres", feature = "sqlite"))]
use crate::utils::bootstrap::connect_with_retry;

#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub mod schema;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PostgresLedgerStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLedgerStore;

// ============================================================================
// Types
// ============================================================================

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A row with this id already exists. Raised by `insert` only.
    #[error("Ledger key already exists: {id}")]
    DuplicateKey { id: String },

    #[error("Ledger record not found: {id}")]
    NotFound { id: String },

    #[error("Invalid ledger key: {0}")]
    InvalidKey(String),

    #[error("Invalid ledger status: {0}")]
    InvalidStatus(String),

    /// The mutation statement itself failed; the transaction was rolled back.
    #[error("Statement execution failed: {0}")]
    Mutation(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(any(feature = "postgres", feature = "sqlite"))]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(any(feature = "postgres", feature = "sqlite"))]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Apply status of a ledger row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Pending => "pending",
            LedgerStatus::Success => "success",
            LedgerStatus::Failed => "failed",
        }
    }

    /// Whether the mutation has been applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, LedgerStatus::Success)
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(LedgerStatus::Pending),
            "success" => Ok(LedgerStatus::Success),
            "failed" => Ok(LedgerStatus::Failed),
            other => Err(LedgerError::InvalidStatus(other.to_string())),
        }
    }
}

/// A stored ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRecord {
    pub id: String,
    pub topic: String,
    pub ingression_ts: i64,
    pub headers: Value,
    pub message: Value,
    pub status: LedgerStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// A ledger row to insert. Status starts as `pending`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerRecord {
    pub id: String,
    pub topic: String,
    pub ingression_ts: i64,
    pub headers: Value,
    pub message: Value,
}

impl NewLedgerRecord {
    /// Snapshot a validated message.
    pub fn from_message(message: &MutationMessage) -> Self {
        let headers = message
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        Self {
            id: message.key.clone(),
            topic: message.topic.clone(),
            ingression_ts: message.ingression_ts,
            headers: Value::Object(headers),
            message: message.payload.clone(),
        }
    }
}

// ============================================================================
// Trait
// ============================================================================

/// Interface for ledger persistence.
///
/// Implementations:
/// - `PostgresLedgerStore`: PostgreSQL (uuid ids, json columns, update trigger)
/// - `SqliteLedgerStore`: SQLite (text ids and json)
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Look up a row by its full identity.
    async fn find(&self, id: &str, topic: &str, ingression_ts: i64)
        -> Result<Option<LedgerRecord>>;

    /// Look up a row by id alone.
    async fn get(&self, id: &str) -> Result<Option<LedgerRecord>>;

    /// Insert a `pending` row.
    ///
    /// Fails with `LedgerError::DuplicateKey` when the id is already present.
    async fn insert(&self, record: &NewLedgerRecord) -> Result<()>;

    /// Execute `statement` and mark `id` as `success` in one transaction.
    ///
    /// Both commit or neither does. Returns the rows affected by the statement.
    /// Statement errors surface as `LedgerError::Mutation`.
    async fn apply(&self, id: &str, statement: &Statement) -> Result<u64>;

    /// Set the status of an existing row.
    async fn set_status(&self, id: &str, status: LedgerStatus) -> Result<()>;
}

/// Translate an insert failure, surfacing primary key conflicts as `DuplicateKey`.
#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub(crate) fn map_insert_error(id: &str, e: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return LedgerError::DuplicateKey { id: id.to_string() };
        }
    }
    LedgerError::Database(e)
}

// ============================================================================
// Initialization
// ============================================================================

/// Connect to the configured database and return the ledger store.
///
/// Connection attempts are retried with backoff. Migrations run when
/// `run_migrations` is set.
pub async fn init_ledger(
    config: &DatabaseConfig,
) -> std::result::Result<Arc<dyn LedgerStore>, Box<dyn std::error::Error>> {
    info!(
        database_type = ?config.database_type,
        max_connections = config.max_connections,
        "Initializing ledger store"
    );

    match config.database_type {
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            let url = config.connection_url();
            let pool = connect_with_retry("postgres", config.connect_retries, || {
                sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect(&url)
            })
            .await?;

            let store = PostgresLedgerStore::new(pool);
            if config.run_migrations {
                store.migrate().await?;
            }
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        DatabaseType::Postgres => {
            Err("PostgreSQL ledger requested but 'postgres' feature is not enabled".into())
        }
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => {
            if config.url.is_none() {
                if let Some(parent) = std::path::Path::new(&config.sqlite_path).parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let url = config.connection_url();
            let pool = connect_with_retry("sqlite", config.connect_retries, || {
                sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .connect(&url)
            })
            .await?;

            let store = SqliteLedgerStore::new(pool);
            if config.run_migrations {
                store.migrate().await?;
            }
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        DatabaseType::Sqlite => {
            Err("SQLite ledger requested but 'sqlite' feature is not enabled".into())
        }
    }
}
