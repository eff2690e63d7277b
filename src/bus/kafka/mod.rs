//! Kafka bus implementation.
//!
//! - `KafkaPublisher`: producer for the primary and dead-letter topics
//! - `KafkaMutationSource`: stream consumer feeding the partition dispatcher
//! - `KafkaOffsetCommitter`: explicit per-record offset commits
//! - `KafkaTopicAdmin`: topic provisioning
//!
//! Auto-commit is disabled; offsets are committed by partition workers once a
//! record has been resolved.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message as KafkaMessage, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::dispatch::{Delivery, DispatchError, DispatchStatus, PartitionDispatcher};
use super::{BusError, MessagePublisher, OffsetCommitter, OutboundMessage, Result};
use crate::config::KafkaConfig;
use crate::message::BrokerEnvelope;

mod admin;

pub use admin::KafkaTopicAdmin;

/// How often backlogged partitions are offered to their workers again.
const BACKLOG_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for Kafka clients.
#[derive(Clone, Debug)]
pub struct KafkaBusConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Client id reported to the broker.
    pub client_id: String,
    /// Consumer group ID (required for subscribing).
    pub group_id: Option<String>,
    /// Topics to subscribe to (for consumers).
    pub topics: Vec<String>,
    /// Producer delivery timeout.
    pub publish_timeout: Duration,
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

impl KafkaBusConfig {
    /// Create config for publishing only.
    pub fn publisher(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            client_id: "dbrelay".to_string(),
            group_id: None,
            topics: Vec::new(),
            publish_timeout: Duration::from_secs(5),
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }

    /// Create config for subscribing to specific topics.
    pub fn subscriber(
        bootstrap_servers: impl Into<String>,
        group_id: impl Into<String>,
        topics: Vec<String>,
    ) -> Self {
        Self {
            group_id: Some(group_id.into()),
            topics,
            ..Self::publisher(bootstrap_servers)
        }
    }

    /// Build from application configuration, subscribing to the primary topic.
    pub fn from_config(config: &KafkaConfig) -> Self {
        let mut bus = Self::subscriber(
            config.bootstrap_servers.clone(),
            config.group_id.clone(),
            vec![config.topic.clone()],
        )
        .with_client_id(config.client_id.clone());
        bus.publish_timeout = Duration::from_millis(config.publish_timeout_ms);
        bus.sasl_username = config.sasl_username.clone();
        bus.sasl_password = config.sasl_password.clone();
        bus.sasl_mechanism = config.sasl_mechanism.clone();
        bus.security_protocol = config.security_protocol.clone();
        bus.ssl_ca_location = config.ssl_ca_location.clone();
        bus
    }

    /// Add SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    /// Set security protocol.
    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Set SSL CA certificate location.
    pub fn with_ssl_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(ca_location.into());
        self
    }

    /// Set client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Build a ClientConfig for producers.
    pub(crate) fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("client.id", &self.client_id);
        config.set(
            "message.timeout.ms",
            self.publish_timeout.as_millis().to_string(),
        );
        config.set("acks", "all");
        config.set("enable.idempotence", "true");

        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for consumers.
    pub(crate) fn build_consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("client.id", &self.client_id);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "earliest");

        if let Some(ref group_id) = self.group_id {
            config.set("group.id", group_id);
        }

        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for the admin client.
    pub(crate) fn build_admin_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("client.id", &self.client_id);

        self.apply_security_config(&mut config);
        config
    }

    /// Apply security settings to a ClientConfig.
    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }

        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }

        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }

        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }

        if let Some(ref ca_location) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
    }
}

// ============================================================================
// Publisher
// ============================================================================

/// Kafka publisher.
///
/// One producer serves both the primary and the dead-letter topic.
pub struct KafkaPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaPublisher {
    /// Create a new Kafka publisher.
    pub fn new(config: &KafkaBusConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            client_id = %config.client_id,
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            timeout: config.publish_timeout,
        })
    }
}

#[async_trait]
impl MessagePublisher for KafkaPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let headers = to_kafka_headers(&message.headers);
        let record = FutureRecord::to(&message.topic)
            .key(&message.key)
            .payload(&message.payload)
            .headers(headers);

        let (partition, offset) = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| BusError::Publish(format!("Failed to publish: {}", e)))?;

        debug!(
            topic = %message.topic,
            key = %message.key,
            partition,
            offset,
            "Published record to Kafka"
        );
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.producer
            .flush(self.timeout)
            .map_err(|e| BusError::Publish(format!("Failed to flush producer: {}", e)))?;
        info!("Kafka producer flushed");
        Ok(())
    }
}

fn to_kafka_headers(headers: &BTreeMap<String, String>) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            })
        })
}

// ============================================================================
// Consumer
// ============================================================================

/// Convert a consumed record into the consumer's envelope.
///
/// Keys and values are read as UTF-8 (lossy). Header values that are absent
/// become empty strings. Records without a timestamp leave `ingressionTs` unset.
///
/// Headers are a map: when a record repeats a header key, the last value wins
/// and the earlier ones are not carried into the ledger or the dead letter.
pub fn envelope_from_message<M: KafkaMessage>(message: &M) -> BrokerEnvelope {
    let key = message
        .key()
        .map(|k| String::from_utf8_lossy(k).into_owned());
    let value = message
        .payload()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .unwrap_or_default();

    let mut envelope = BrokerEnvelope::new(message.topic(), key, value);
    if let Some(millis) = message.timestamp().to_millis() {
        envelope = envelope.with_timestamp(millis);
    }
    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            let value = header
                .value
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default();
            envelope = envelope.with_header(header.key, value);
        }
    }
    envelope
}

/// Convert a consumed record into a dispatcher delivery.
pub fn delivery_from_message<M: KafkaMessage>(message: &M) -> Delivery {
    Delivery {
        envelope: envelope_from_message(message),
        partition: message.partition(),
        offset: message.offset(),
    }
}

/// Commits consumed offsets through a shared stream consumer.
pub struct KafkaOffsetCommitter {
    consumer: Arc<StreamConsumer>,
}

impl KafkaOffsetCommitter {
    pub fn new(consumer: Arc<StreamConsumer>) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl OffsetCommitter for KafkaOffsetCommitter {
    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| BusError::Commit(e.to_string()))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| BusError::Commit(e.to_string()))
    }
}

/// Kafka stream consumer feeding a [`PartitionDispatcher`].
pub struct KafkaMutationSource {
    consumer: Arc<StreamConsumer>,
    topics: Vec<String>,
}

impl KafkaMutationSource {
    /// Create the consumer. Requires `group_id`.
    pub fn new(config: &KafkaBusConfig) -> Result<Self> {
        if config.group_id.is_none() {
            return Err(BusError::Subscribe(
                "No consumer group configured. Use KafkaBusConfig::subscriber()".to_string(),
            ));
        }

        let consumer: StreamConsumer = config
            .build_consumer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            topics: config.topics.clone(),
        })
    }

    /// Offset committer sharing this source's consumer.
    pub fn committer(&self) -> Arc<KafkaOffsetCommitter> {
        Arc::new(KafkaOffsetCommitter::new(self.consumer.clone()))
    }

    /// Subscribe to the configured topics.
    pub fn subscribe(&self) -> Result<()> {
        let topic_refs: Vec<&str> = self.topics.iter().map(|s| s.as_str()).collect();
        self.consumer
            .subscribe(&topic_refs)
            .map_err(|e| BusError::Subscribe(format!("Failed to subscribe to topics: {}", e)))?;

        info!(topics = ?self.topics, "Subscribed to Kafka topics");
        Ok(())
    }

    /// Consume until `shutdown` resolves, the stream ends or a partition
    /// worker stops, then drain the dispatcher within `grace`.
    ///
    /// A partition whose queue fills up is paused at the broker and resumed
    /// once its backlog has moved into the queue, so a slow partition never
    /// holds up the others. A stopped worker ends consumption with an error;
    /// its uncommitted records are redelivered to the next consumer.
    pub async fn run<S>(
        self,
        mut dispatcher: PartitionDispatcher,
        shutdown: S,
        grace: Duration,
    ) -> std::result::Result<(), DispatchError>
    where
        S: Future<Output = ()> + Send,
    {
        let mut stream = self.consumer.stream();
        let mut backlog_tick = tokio::time::interval(BACKLOG_POLL_INTERVAL);
        backlog_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopping Kafka consumption");
                    break Ok(());
                }
                _ = backlog_tick.tick(), if dispatcher.has_backlog() => {
                    match dispatcher.drain_backlog() {
                        Ok(resumed) => {
                            for (topic, partition) in resumed {
                                self.set_paused(&topic, partition, false);
                            }
                        }
                        Err(e) => break Err(e),
                    }
                }
                next = stream.next() => match next {
                    Some(Ok(message)) => {
                        let delivery = delivery_from_message(&message);
                        drop(message);
                        let (topic, partition) =
                            (delivery.envelope.topic.clone(), delivery.partition);
                        match dispatcher.dispatch(delivery) {
                            Ok(DispatchStatus::Saturated) => {
                                self.set_paused(&topic, partition, true);
                            }
                            Ok(_) => {}
                            Err(e) => break Err(e),
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Kafka consumer error");
                    }
                    None => {
                        warn!("Kafka stream ended");
                        break Ok(());
                    }
                }
            }
        };

        if let Err(e) = &result {
            error!(error = %e, "Stopping consumption, uncommitted records will be redelivered");
        }
        drop(stream);
        dispatcher.shutdown(grace).await;
        self.consumer.unsubscribe();
        info!("Kafka consumer disconnected");
        result
    }

    fn set_paused(&self, topic: &str, partition: i32, paused: bool) {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(topic, partition);

        let outcome = if paused {
            self.consumer.pause(&tpl)
        } else {
            self.consumer.resume(&tpl)
        };
        match outcome {
            Ok(()) => debug!(topic = %topic, partition, paused, "Partition fetch state changed"),
            Err(e) => warn!(topic = %topic, partition, paused, error = %e, "Failed to change partition fetch state"),
        }
    }
}
