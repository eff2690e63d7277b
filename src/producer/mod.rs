//! Mutation producer.
//!
//! Defers a database write by publishing its statement to the primary topic
//! under a fresh UUID key. The key becomes the consumer's ledger id, so
//! retrying a publish with the same key is safe.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::bus::{MessagePublisher, OutboundMessage, Result};
use crate::message::Statement;

/// Publishes statements to the primary topic.
pub struct MutationProducer {
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
}

impl MutationProducer {
    pub fn new(publisher: Arc<dyn MessagePublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish a statement under a new key. Returns the key.
    pub async fn publish(&self, statement: &Statement) -> Result<String> {
        self.publish_with_headers(statement, BTreeMap::new()).await
    }

    /// Publish a statement with headers under a new key. Returns the key.
    pub async fn publish_with_headers(
        &self,
        statement: &Statement,
        headers: BTreeMap<String, String>,
    ) -> Result<String> {
        let key = Uuid::new_v4().to_string();
        self.publish_keyed(&key, statement, headers).await?;
        Ok(key)
    }

    /// Publish a statement under a caller-chosen key, e.g. when retrying a
    /// publish whose acknowledgement was lost.
    pub async fn publish_keyed(
        &self,
        key: &str,
        statement: &Statement,
        headers: BTreeMap<String, String>,
    ) -> Result<()> {
        let payload = serde_json::to_string(&statement.to_payload())?;
        let record = OutboundMessage::new(&self.topic, key, payload).with_headers(headers);

        self.publisher.publish(record).await?;
        debug!(topic = %self.topic, key = %key, "Mutation published");
        Ok(())
    }
}
