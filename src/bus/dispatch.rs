//! Per-partition dispatch.
//!
//! Each `(topic, partition)` gets one worker task fed by a bounded queue.
//! Records of one partition are processed strictly in order; different
//! partitions run concurrently. A record's offset is committed only after its
//! handler resolved, so a crash mid-record leads to redelivery, never loss.
//!
//! `dispatch` never waits. When a partition's queue is full the record goes to
//! that partition's backlog and the caller is told to pause fetching for it;
//! `drain_backlog` moves backlogged records into the queue as space frees and
//! reports which partitions can be resumed.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{EnvelopeHandler, OffsetCommitter};
use crate::message::BrokerEnvelope;

/// Default per-partition queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// A record handed to the dispatcher, with its broker position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub envelope: BrokerEnvelope,
    pub partition: i32,
    pub offset: i64,
}

/// Where a dispatched record ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// Queued on the partition worker.
    Queued,
    /// The partition queue just filled up; the record was backlogged and
    /// fetching for this partition should pause.
    Saturated,
    /// The partition was already saturated; the record was backlogged behind
    /// earlier ones.
    Backlogged,
}

/// Errors raised while handing a record to a partition worker.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The worker stopped (its handler panicked). Records queued on it were
    /// never committed, so consumption must stop and let the broker redeliver
    /// them.
    #[error("Partition worker unavailable: {topic}/{partition}")]
    WorkerUnavailable { topic: String, partition: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PartitionKey {
    topic: String,
    partition: i32,
}

impl PartitionKey {
    fn unavailable(&self) -> DispatchError {
        DispatchError::WorkerUnavailable {
            topic: self.topic.clone(),
            partition: self.partition,
        }
    }
}

struct PartitionWorker {
    sender: mpsc::Sender<Delivery>,
    handle: JoinHandle<()>,
}

/// Routes deliveries to one sequential worker per partition.
pub struct PartitionDispatcher {
    handler: Arc<dyn EnvelopeHandler>,
    committer: Arc<dyn OffsetCommitter>,
    queue_depth: usize,
    workers: HashMap<PartitionKey, PartitionWorker>,
    backlog: HashMap<PartitionKey, VecDeque<Delivery>>,
}

impl PartitionDispatcher {
    pub fn new(handler: Arc<dyn EnvelopeHandler>, committer: Arc<dyn OffsetCommitter>) -> Self {
        Self {
            handler,
            committer,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            workers: HashMap::new(),
            backlog: HashMap::new(),
        }
    }

    /// Set the per-partition queue depth. Records beyond it are backlogged.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Number of partitions with a worker.
    pub fn active_partitions(&self) -> usize {
        self.workers.len()
    }

    /// Whether any partition holds backlogged records.
    pub fn has_backlog(&self) -> bool {
        !self.backlog.is_empty()
    }

    /// Hand a delivery to its partition's worker, starting one if needed.
    ///
    /// Never waits on a busy partition. A worker that stopped is not replaced:
    /// its queued records are lost to this process and only a redelivery
    /// recovers them.
    pub fn dispatch(&mut self, delivery: Delivery) -> Result<DispatchStatus, DispatchError> {
        let key = PartitionKey {
            topic: delivery.envelope.topic.clone(),
            partition: delivery.partition,
        };

        if let Some(pending) = self.backlog.get_mut(&key) {
            pending.push_back(delivery);
            return Ok(DispatchStatus::Backlogged);
        }

        match self.sender_for(&key).try_send(delivery) {
            Ok(()) => Ok(DispatchStatus::Queued),
            Err(TrySendError::Full(delivery)) => {
                debug!(
                    topic = %key.topic,
                    partition = key.partition,
                    "Partition queue full, backlogging"
                );
                self.backlog.entry(key).or_default().push_back(delivery);
                Ok(DispatchStatus::Saturated)
            }
            Err(TrySendError::Closed(_)) => {
                error!(topic = %key.topic, partition = key.partition, "Partition worker stopped");
                Err(key.unavailable())
            }
        }
    }

    /// Move backlogged records into queues with free space.
    ///
    /// Returns the partitions whose backlog emptied, which can be resumed.
    pub fn drain_backlog(&mut self) -> Result<Vec<(String, i32)>, DispatchError> {
        let mut resumed = Vec::new();

        for (key, pending) in self.backlog.iter_mut() {
            let Some(worker) = self.workers.get(key) else {
                return Err(key.unavailable());
            };
            while let Some(delivery) = pending.pop_front() {
                match worker.sender.try_send(delivery) {
                    Ok(()) => {}
                    Err(TrySendError::Full(delivery)) => {
                        pending.push_front(delivery);
                        break;
                    }
                    Err(TrySendError::Closed(_)) => return Err(key.unavailable()),
                }
            }
            if pending.is_empty() {
                resumed.push((key.topic.clone(), key.partition));
            }
        }

        self.backlog.retain(|_, pending| !pending.is_empty());
        Ok(resumed)
    }

    /// Close all partition queues and wait up to `grace` for them to drain.
    ///
    /// Backlogged records are dropped uncommitted.
    pub async fn shutdown(mut self, grace: Duration) {
        let backlogged: usize = self.backlog.values().map(VecDeque::len).sum();
        if backlogged > 0 {
            warn!(records = backlogged, "Dropping backlogged records, they will be redelivered");
        }

        let handles: Vec<JoinHandle<()>> = self
            .workers
            .drain()
            .map(|(_, worker)| {
                drop(worker.sender);
                worker.handle
            })
            .collect();

        if handles.is_empty() {
            return;
        }

        info!(
            partitions = handles.len(),
            grace_ms = grace.as_millis() as u64,
            "Draining partition queues"
        );
        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(_) => info!("Partition queues drained"),
            Err(_) => warn!("Shutdown grace period elapsed with records still queued"),
        }
    }

    fn sender_for(&mut self, key: &PartitionKey) -> mpsc::Sender<Delivery> {
        if let Some(worker) = self.workers.get(key) {
            return worker.sender.clone();
        }

        let (sender, receiver) = mpsc::channel(self.queue_depth);
        let handle = tokio::spawn(run_worker(
            key.clone(),
            receiver,
            self.handler.clone(),
            self.committer.clone(),
        ));
        debug!(topic = %key.topic, partition = key.partition, "Started partition worker");

        self.workers.insert(
            key.clone(),
            PartitionWorker {
                sender: sender.clone(),
                handle,
            },
        );
        sender
    }
}

async fn run_worker(
    key: PartitionKey,
    mut receiver: mpsc::Receiver<Delivery>,
    handler: Arc<dyn EnvelopeHandler>,
    committer: Arc<dyn OffsetCommitter>,
) {
    while let Some(delivery) = receiver.recv().await {
        let outcome = handler.handle(&delivery.envelope).await;
        debug!(
            topic = %key.topic,
            partition = key.partition,
            offset = delivery.offset,
            outcome = outcome.as_str(),
            "Record resolved"
        );

        if let Err(e) = committer
            .commit(&key.topic, key.partition, delivery.offset)
            .await
        {
            error!(
                topic = %key.topic,
                partition = key.partition,
                offset = delivery.offset,
                error = %e,
                "Failed to commit offset"
            );
        }
    }
    debug!(topic = %key.topic, partition = key.partition, "Partition worker stopped");
}
