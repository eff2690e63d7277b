//! Kafka topic administration.

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::types::RDKafkaErrorCode;
use tracing::info;

use super::KafkaBusConfig;
use crate::provision::{AdminError, TopicAdmin, TopicOutcome, TopicSpec, ADMIN_TIMEOUT};

/// Topic admin backed by the rdkafka admin client.
pub struct KafkaTopicAdmin {
    client: AdminClient<DefaultClientContext>,
}

impl KafkaTopicAdmin {
    /// Create a new admin client.
    pub fn new(config: &KafkaBusConfig) -> Result<Self, AdminError> {
        let client: AdminClient<DefaultClientContext> = config
            .build_admin_config()
            .create()
            .map_err(|e| AdminError::Connection(format!("Failed to create admin client: {}", e)))?;

        info!(bootstrap_servers = %config.bootstrap_servers, "Kafka admin client created");
        Ok(Self { client })
    }
}

#[async_trait]
impl TopicAdmin for KafkaTopicAdmin {
    async fn create_topics(
        &self,
        specs: &[TopicSpec],
    ) -> Result<Vec<(String, TopicOutcome)>, AdminError> {
        let new_topics: Vec<NewTopic<'_>> = specs
            .iter()
            .map(|spec| {
                NewTopic::new(
                    &spec.name,
                    spec.partitions,
                    TopicReplication::Fixed(spec.replication_factor),
                )
            })
            .collect();

        let options = AdminOptions::new()
            .operation_timeout(Some(ADMIN_TIMEOUT))
            .request_timeout(Some(ADMIN_TIMEOUT));

        let results = self
            .client
            .create_topics(&new_topics, &options)
            .await
            .map_err(|e| AdminError::Connection(e.to_string()))?;

        results
            .into_iter()
            .map(|result| match result {
                Ok(topic) => Ok((topic, TopicOutcome::Created)),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    Ok((topic, TopicOutcome::AlreadyExists))
                }
                Err((topic, code)) => Err(AdminError::CreateFailed {
                    topic,
                    reason: code.to_string(),
                }),
            })
            .collect()
    }
}
