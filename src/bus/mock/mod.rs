//! Mock bus implementations for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, MessagePublisher, OffsetCommitter, OutboundMessage, Result};

/// Mock publisher that records every published message.
#[derive(Default)]
pub struct MockPublisher {
    published: RwLock<Vec<OutboundMessage>>,
    fail_on_publish: RwLock<bool>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl MessagePublisher for MockPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Connection("Mock publish failure".to_string()));
        }
        self.published.write().await.push(message);
        Ok(())
    }
}

/// Mock committer that records `(topic, partition, offset)` commits in order.
#[derive(Default)]
pub struct MockOffsetCommitter {
    commits: RwLock<Vec<(String, i32, i64)>>,
}

impl MockOffsetCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn commits(&self) -> Vec<(String, i32, i64)> {
        self.commits.read().await.clone()
    }

    /// Commits for one partition, in commit order.
    pub async fn offsets_for(&self, partition: i32) -> Vec<i64> {
        self.commits
            .read()
            .await
            .iter()
            .filter(|(_, p, _)| *p == partition)
            .map(|(_, _, offset)| *offset)
            .collect()
    }
}

#[async_trait]
impl OffsetCommitter for MockOffsetCommitter {
    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        self.commits
            .write()
            .await
            .push((topic.to_string(), partition, offset));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_publisher_publish() {
        let publisher = MockPublisher::new();
        publisher
            .publish(OutboundMessage::new("t", "k1", "{}"))
            .await
            .unwrap();

        assert_eq!(publisher.published_count().await, 1);
        let published = publisher.take_published().await;
        assert_eq!(published[0].key, "k1");
        assert_eq!(publisher.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_publisher_fail_on_publish() {
        let publisher = MockPublisher::new();
        publisher.set_fail_on_publish(true).await;

        let result = publisher.publish(OutboundMessage::new("t", "k1", "{}")).await;

        assert!(matches!(result, Err(BusError::Connection(_))));
        assert_eq!(publisher.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_committer_records_per_partition() {
        let committer = MockOffsetCommitter::new();
        committer.commit("t", 0, 1).await.unwrap();
        committer.commit("t", 1, 5).await.unwrap();
        committer.commit("t", 0, 2).await.unwrap();

        assert_eq!(committer.offsets_for(0).await, vec![1, 2]);
        assert_eq!(committer.offsets_for(1).await, vec![5]);
        assert_eq!(committer.commits().await.len(), 3);
    }
}
