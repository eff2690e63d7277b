//! Mutation consumer.
//!
//! Applies each delivered mutation at most once in effect:
//!
//! 1. Validate the record. Malformed records are dead-lettered without a
//!    ledger row.
//! 2. Look the key up in the ledger. A `success` row means the record is a
//!    redelivery and is skipped. A `pending` or `failed` row is re-attempted.
//!    A missing row is inserted as `pending`.
//! 3. Execute the statement and mark the row `success` in one transaction.
//! 4. Any failure dead-letters the original envelope under a fresh key. The
//!    consumer never stops for a single bad record.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, warn};

use crate::bus::EnvelopeHandler;
use crate::dlq::{DeadLetter, DeadLetterPublisher};
use crate::ledger::{LedgerConfig, LedgerError, LedgerStatus, LedgerStore, NewLedgerRecord};
use crate::message::{BrokerEnvelope, MessageError, MutationMessage};
use crate::metrics::ConsumerMetrics;

pub use crate::bus::ProcessOutcome;

/// Why a record could not be applied.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Malformed(#[from] MessageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ConsumerError {
    /// Short classification carried on the dead letter.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsumerError::Malformed(_) => "malformed",
            ConsumerError::Ledger(LedgerError::Mutation(_)) => "mutation",
            ConsumerError::Ledger(LedgerError::InvalidKey(_)) => "malformed",
            ConsumerError::Ledger(_) => "ledger",
        }
    }
}

/// Applies mutations against the ledger and routes failures to the DLQ.
pub struct MutationConsumer {
    ledger: Arc<dyn LedgerStore>,
    dead_letters: Arc<dyn DeadLetterPublisher>,
    metrics: Arc<ConsumerMetrics>,
    config: LedgerConfig,
}

impl MutationConsumer {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        dead_letters: Arc<dyn DeadLetterPublisher>,
        metrics: Arc<ConsumerMetrics>,
    ) -> Self {
        if !dead_letters.is_configured() {
            warn!("Dead-letter publishing disabled, rejected mutations are only logged");
        }
        Self {
            ledger,
            dead_letters,
            metrics,
            config: LedgerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(&self) -> &Arc<ConsumerMetrics> {
        &self.metrics
    }

    /// Process one delivered record. Never fails: errors become dead letters.
    pub async fn process(&self, envelope: &BrokerEnvelope) -> ProcessOutcome {
        #[cfg(feature = "otel")]
        let started = std::time::Instant::now();

        self.metrics.record_received();

        let outcome = match self.try_process(envelope).await {
            Ok(outcome) => {
                self.metrics.record_processed();
                outcome
            }
            Err(e) => {
                warn!(
                    topic = %envelope.topic,
                    key = ?envelope.key,
                    kind = e.kind(),
                    error = %e,
                    "Mutation failed, dead-lettering"
                );
                self.dead_letter(envelope, &e).await;
                self.metrics.record_error();
                ProcessOutcome::DeadLettered
            }
        };

        #[cfg(feature = "otel")]
        crate::utils::metrics::PROCESS_DURATION.record(
            started.elapsed().as_secs_f64(),
            &[
                crate::utils::metrics::topic_attr(&envelope.topic),
                crate::utils::metrics::outcome_attr(outcome.as_str()),
            ],
        );

        outcome
    }

    async fn try_process(&self, envelope: &BrokerEnvelope) -> Result<ProcessOutcome, ConsumerError> {
        let message = MutationMessage::parse(envelope, Utc::now().timestamp_millis())?;

        if !self.claim(&message).await? {
            debug!(key = %message.key, topic = %message.topic, "Duplicate mutation, skipping");
            return Ok(ProcessOutcome::Skipped);
        }

        match self.ledger.apply(&message.key, &message.statement).await {
            Ok(rows) => {
                debug!(key = %message.key, rows_affected = rows, "Mutation applied");
                Ok(ProcessOutcome::Applied)
            }
            Err(e) => {
                if self.config.mark_failed {
                    self.mark_failed(&message.key).await;
                }
                Err(e.into())
            }
        }
    }

    /// Ensure a ledger row exists for the message.
    ///
    /// Returns false when the key was already applied.
    async fn claim(&self, message: &MutationMessage) -> Result<bool, ConsumerError> {
        if let Some(record) = self
            .ledger
            .find(&message.key, &message.topic, message.ingression_ts)
            .await?
        {
            if !record.status.is_applied() {
                debug!(key = %message.key, status = %record.status, "Re-attempting mutation");
            }
            return Ok(!record.status.is_applied());
        }

        match self
            .ledger
            .insert(&NewLedgerRecord::from_message(message))
            .await
        {
            Ok(()) => Ok(true),
            Err(LedgerError::DuplicateKey { id }) => {
                let existing = self.ledger.get(&id).await?;
                let applied = existing
                    .as_ref()
                    .is_some_and(|record| record.status.is_applied());
                debug!(key = %id, applied, "Ledger key already present");
                Ok(!applied)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_failed(&self, key: &str) {
        if let Err(e) = self.ledger.set_status(key, LedgerStatus::Failed).await {
            error!(key = %key, error = %e, "Failed to mark ledger record failed");
        }
    }

    async fn dead_letter(&self, envelope: &BrokerEnvelope, error: &ConsumerError) {
        let dead_letter = DeadLetter::new(envelope.clone(), error.to_string())
            .with_metadata("error_kind", error.kind());

        if let Err(e) = self.dead_letters.publish(dead_letter).await {
            error!(
                topic = %envelope.topic,
                key = ?envelope.key,
                error = %e,
                "Failed to publish dead letter"
            );
        }
    }
}

#[async_trait]
impl EnvelopeHandler for MutationConsumer {
    async fn handle(&self, envelope: &BrokerEnvelope) -> ProcessOutcome {
        self.process(envelope).await
    }
}
