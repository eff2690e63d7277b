//! Topic provisioning.
//!
//! Ensures the primary and dead-letter topics exist before the consumer
//! subscribes. Creating a topic that already exists is not an error, so
//! provisioning is safe to run on every start.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::KafkaConfig;

/// Admin operation timeout.
pub const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur while provisioning topics.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Broker unreachable: {0}")]
    Connection(String),

    #[error("Failed to create topic {topic}: {reason}")]
    CreateFailed { topic: String, reason: String },
}

/// A topic to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, partitions: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor: 1,
        }
    }

    pub fn with_replication(mut self, replication_factor: i32) -> Self {
        self.replication_factor = replication_factor;
        self
    }
}

/// Primary and dead-letter topics for a Kafka configuration.
pub fn pipeline_topics(config: &KafkaConfig) -> Vec<TopicSpec> {
    [config.topic.clone(), config.dlq_topic()]
        .into_iter()
        .map(|name| {
            TopicSpec::new(name, config.partitions).with_replication(config.replication_factor)
        })
        .collect()
}

/// Result of creating one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicOutcome {
    Created,
    AlreadyExists,
}

/// Broker topic administration.
///
/// Implementations:
/// - `KafkaTopicAdmin`: rdkafka admin client
/// - `MockTopicAdmin`: In-memory topic registry for testing
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Create topics, reporting per topic whether it was created or already present.
    async fn create_topics(
        &self,
        specs: &[TopicSpec],
    ) -> Result<Vec<(String, TopicOutcome)>, AdminError>;
}

/// Idempotently create every topic in `specs`.
pub async fn ensure_topics(admin: &dyn TopicAdmin, specs: &[TopicSpec]) -> Result<(), AdminError> {
    for (topic, outcome) in admin.create_topics(specs).await? {
        match outcome {
            TopicOutcome::Created => info!(topic = %topic, "Topic created"),
            TopicOutcome::AlreadyExists => info!(topic = %topic, "Topic already exists"),
        }
    }
    Ok(())
}

/// In-memory topic admin for testing.
#[derive(Default)]
pub struct MockTopicAdmin {
    topics: RwLock<HashMap<String, TopicSpec>>,
    unreachable: RwLock<bool>,
}

impl MockTopicAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.write().await = unreachable;
    }

    pub async fn topic(&self, name: &str) -> Option<TopicSpec> {
        self.topics.read().await.get(name).cloned()
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }
}

#[async_trait]
impl TopicAdmin for MockTopicAdmin {
    async fn create_topics(
        &self,
        specs: &[TopicSpec],
    ) -> Result<Vec<(String, TopicOutcome)>, AdminError> {
        if *self.unreachable.read().await {
            return Err(AdminError::Connection("Mock broker unreachable".to_string()));
        }

        let mut topics = self.topics.write().await;
        Ok(specs
            .iter()
            .map(|spec| {
                let outcome = if topics.contains_key(&spec.name) {
                    TopicOutcome::AlreadyExists
                } else {
                    topics.insert(spec.name.clone(), spec.clone());
                    TopicOutcome::Created
                };
                (spec.name.clone(), outcome)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_topics() {
        let config = KafkaConfig::default();
        let topics = pipeline_topics(&config);

        assert_eq!(
            topics,
            vec![
                TopicSpec::new("writing_db_topic", 3),
                TopicSpec::new("writing_db_topic-dlq", 3),
            ]
        );
    }

    #[test]
    fn test_pipeline_topics_follow_config() {
        let config = KafkaConfig {
            topic: "orders".to_string(),
            partitions: 12,
            replication_factor: 3,
            ..KafkaConfig::default()
        };
        let topics = pipeline_topics(&config);

        assert_eq!(topics[1].name, "orders-dlq");
        assert!(topics
            .iter()
            .all(|t| t.partitions == 12 && t.replication_factor == 3));
    }

    #[tokio::test]
    async fn test_ensure_topics_creates_missing() {
        let admin = MockTopicAdmin::new();
        let specs = pipeline_topics(&KafkaConfig::default());

        ensure_topics(&admin, &specs).await.unwrap();

        assert_eq!(admin.topic_count().await, 2);
        assert_eq!(
            admin.topic("writing_db_topic-dlq").await.unwrap().partitions,
            3
        );
    }

    #[tokio::test]
    async fn test_ensure_topics_is_idempotent() {
        let admin = MockTopicAdmin::new();
        let specs = pipeline_topics(&KafkaConfig::default());

        ensure_topics(&admin, &specs).await.unwrap();
        ensure_topics(&admin, &specs).await.unwrap();

        let outcomes = admin.create_topics(&specs).await.unwrap();
        assert!(outcomes
            .iter()
            .all(|(_, outcome)| *outcome == TopicOutcome::AlreadyExists));
        assert_eq!(admin.topic_count().await, 2);
    }

    #[tokio::test]
    async fn test_ensure_topics_unreachable_broker() {
        let admin = MockTopicAdmin::new();
        admin.set_unreachable(true).await;

        let result = ensure_topics(&admin, &pipeline_topics(&KafkaConfig::default())).await;

        assert!(matches!(result, Err(AdminError::Connection(_))));
    }
}
