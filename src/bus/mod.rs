//! Message bus for the mutation pipeline.
//!
//! This module contains:
//! - `MessagePublisher` trait: record delivery to a topic
//! - `OffsetCommitter` trait: acknowledging consumed records
//! - `EnvelopeHandler` trait: per-record processing with an explicit outcome
//! - `PartitionDispatcher`: one sequential worker per partition
//! - Implementations: Kafka, Mock

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::message::BrokerEnvelope;

// Implementation modules
pub mod dispatch;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

// Re-exports
pub use dispatch::{Delivery, DispatchError, DispatchStatus, PartitionDispatcher};
#[cfg(feature = "kafka")]
pub use kafka::{
    KafkaBusConfig, KafkaMutationSource, KafkaOffsetCommitter, KafkaPublisher, KafkaTopicAdmin,
};
pub use mock::{MockOffsetCommitter, MockPublisher};

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Offset commit failed: {0}")]
    Commit(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A record to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// Record key (partition routing).
    pub key: String,
    /// Record value.
    pub payload: String,
    /// Record headers.
    pub headers: BTreeMap<String, String>,
}

impl OutboundMessage {
    /// Create a record without headers.
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload: payload.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Attach headers.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// Interface for publishing records to the broker.
///
/// Implementations:
/// - `KafkaPublisher`: Kafka via rdkafka
/// - `MockPublisher`: In-memory recorder for testing
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish a record, returning once the broker acknowledged it.
    async fn publish(&self, message: OutboundMessage) -> Result<()>;

    /// Wait for in-flight records to be delivered.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Acknowledges consumed records back to the broker.
///
/// Called by a partition worker only after the record's processing resolved,
/// so a crash before commit results in redelivery, never in loss.
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    /// Mark `offset` on `topic`/`partition` as fully processed.
    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;
}

/// How a delivered record was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The mutation was executed and the ledger marked `success`.
    Applied,
    /// The key was already applied; nothing was executed.
    Skipped,
    /// The record could not be applied and was sent to the dead-letter topic.
    DeadLettered,
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessOutcome::Applied => "applied",
            ProcessOutcome::Skipped => "skipped",
            ProcessOutcome::DeadLettered => "dead_lettered",
        }
    }
}

/// Processes one delivered record.
///
/// Every failure is contained in the returned outcome, so the caller can
/// always commit the record's offset afterwards.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: &BrokerEnvelope) -> ProcessOutcome;
}
