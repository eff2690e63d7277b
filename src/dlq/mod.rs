//! Dead Letter Queue (DLQ) infrastructure.
//!
//! Messages the consumer cannot apply are republished, untouched, to a
//! dead-letter topic for manual review and replay.
//!
//! ## Topic Naming
//!
//! DLQ topics follow the pattern: `{primary}-dlq`
//!
//! ## Message Format
//!
//! - Record key: fresh UUID (never the original key)
//! - Record value: JSON of the original [`BrokerEnvelope`]
//!   `{topic, key, headers, message, ingressionTs}`
//! - Record headers: rejection reason, failure time and any extra metadata
//!
//! Nothing consumes the dead-letter topic and no ledger row is written for
//! dead-letter publications.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{MessagePublisher, OutboundMessage};
use crate::message::BrokerEnvelope;

/// DLQ topic suffix. Full topic: `{primary}{suffix}`
pub const DLQ_TOPIC_SUFFIX: &str = "-dlq";

/// Header carrying the rejection reason.
pub const REASON_HEADER: &str = "dlq-reason";
/// Header carrying the failure time (RFC 3339).
pub const OCCURRED_AT_HEADER: &str = "dlq-occurred-at";

/// Build the DLQ topic name for a primary topic.
pub fn dlq_topic_for(primary: &str) -> String {
    format!("{}{}", primary, DLQ_TOPIC_SUFFIX)
}

/// Errors that can occur during DLQ operations.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to publish to DLQ: {0}")]
    PublishFailed(String),
}

/// Dead letter queue entry for a message that could not be applied.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The original envelope, republished verbatim.
    pub envelope: BrokerEnvelope,
    /// Human-readable reason for rejection.
    pub rejection_reason: String,
    /// When the rejection occurred.
    pub occurred_at: DateTime<Utc>,
    /// Additional context, carried as record headers.
    pub metadata: BTreeMap<String, String>,
}

impl DeadLetter {
    /// Create a dead letter for an envelope.
    pub fn new(envelope: BrokerEnvelope, reason: impl Into<String>) -> Self {
        Self {
            envelope,
            rejection_reason: reason.into(),
            occurred_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Get the DLQ topic for this dead letter.
    pub fn topic(&self) -> String {
        dlq_topic_for(&self.envelope.topic)
    }

    /// Build the record to publish, under a freshly generated key.
    pub fn to_outbound(&self) -> Result<OutboundMessage, DlqError> {
        let payload = serde_json::to_string(&self.envelope)?;

        let mut headers = self.metadata.clone();
        headers.insert(REASON_HEADER.to_string(), self.rejection_reason.clone());
        headers.insert(
            OCCURRED_AT_HEADER.to_string(),
            self.occurred_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );

        Ok(
            OutboundMessage::new(self.topic(), Uuid::new_v4().to_string(), payload)
                .with_headers(headers),
        )
    }
}

/// Trait for publishing messages to a dead letter queue.
///
/// Implementations handle the actual transport (Kafka, in-memory, etc.).
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    /// Publish a dead letter to the queue.
    ///
    /// Returns Ok(()) on successful publish, Err on failure.
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError>;

    /// Check if the publisher is configured and ready.
    fn is_configured(&self) -> bool {
        true
    }
}

/// DLQ publisher that writes to the dead-letter topic through a message bus.
pub struct BusDeadLetterPublisher {
    publisher: Arc<dyn MessagePublisher>,
}

impl BusDeadLetterPublisher {
    pub fn new(publisher: Arc<dyn MessagePublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl DeadLetterPublisher for BusDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        let record = dead_letter.to_outbound()?;
        let topic = record.topic.clone();
        let key = record.key.clone();

        self.publisher
            .publish(record)
            .await
            .map_err(|e| DlqError::PublishFailed(e.to_string()))?;

        debug!(
            topic = %topic,
            key = %key,
            original_key = ?dead_letter.envelope.key,
            "Published dead letter"
        );
        Ok(())
    }
}

/// No-op DLQ publisher that logs but doesn't actually send anywhere.
///
/// Used when DLQ is not configured or for testing.
pub struct NoopDeadLetterPublisher;

#[async_trait]
impl DeadLetterPublisher for NoopDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        warn!(
            topic = %dead_letter.topic(),
            reason = %dead_letter.rejection_reason,
            original_key = ?dead_letter.envelope.key,
            "DLQ not configured, logging dead letter"
        );
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// In-memory DLQ publisher using a channel.
///
/// Useful for testing and for embedding the consumer in-process.
pub struct ChannelDeadLetterPublisher {
    sender: mpsc::UnboundedSender<DeadLetter>,
}

impl ChannelDeadLetterPublisher {
    /// Create a new channel publisher.
    ///
    /// Returns the publisher and a receiver for consuming dead letters.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeadLetter>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DeadLetterPublisher for ChannelDeadLetterPublisher {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), DlqError> {
        info!(
            topic = %dead_letter.topic(),
            reason = %dead_letter.rejection_reason,
            "Publishing to channel DLQ"
        );
        self.sender
            .send(dead_letter)
            .map_err(|e| DlqError::PublishFailed(e.to_string()))
    }
}
