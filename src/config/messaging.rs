//! Kafka configuration types.

use serde::Deserialize;

use crate::dlq::dlq_topic_for;

/// Kafka connection and topic configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Client id reported to the broker.
    pub client_id: String,
    /// Consumer group id.
    pub group_id: String,
    /// Primary topic carrying mutations.
    pub topic: String,
    /// Partition count for the primary and dead-letter topics.
    pub partitions: i32,
    /// Replication factor for provisioned topics.
    pub replication_factor: i32,
    /// Producer delivery timeout in milliseconds.
    pub publish_timeout_ms: u64,
    /// Per-partition dispatch queue depth. A partition with a full queue is
    /// paused at the broker until it drains.
    pub queue_depth: usize,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "web-two-layer".to_string(),
            group_id: "web-two-layer-consumer-group".to_string(),
            topic: "writing_db_topic".to_string(),
            partitions: 3,
            replication_factor: 1,
            publish_timeout_ms: 5000,
            queue_depth: 64,
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }
}

impl KafkaConfig {
    /// Dead-letter topic paired with the primary topic.
    pub fn dlq_topic(&self) -> String {
        dlq_topic_for(&self.topic)
    }
}
