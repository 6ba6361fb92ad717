//! Queue transport seam.
//!
//! The dispatcher needs three operations from its queue: acknowledge a
//! record, publish an event to a topic, and present a record again after a
//! pause without acknowledging it. Any ordered, at-least-once queue with
//! pause/rewind support can implement [`QueueTransport`].

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep_until, Instant};

use crate::error::TransportError;
use crate::types::{Event, SourceId};

/// Where a consumed record lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordPosition {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
}

/// One record handed to a consumer.
#[derive(Debug, Clone)]
pub struct QueueRecord {
    pub position: RecordPosition,
    pub event: Event,
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn publish(&self, topic: &str, event: &Event) -> Result<(), TransportError>;

    /// Mark `position` and everything before it on its partition as consumed.
    async fn acknowledge(&self, position: &RecordPosition) -> Result<(), TransportError>;

    /// Present the record at `position` again once `pause` has passed.
    /// Records behind it on the same partition wait as well.
    async fn delay_redeliver(
        &self,
        position: &RecordPosition,
        pause: Duration,
    ) -> Result<(), TransportError>;
}

/// Ordered stream of records from one topic partition.
///
/// Workers are spawned onto the runtime and borrow their consumer across
/// awaits, so implementations must be `Send + Sync`.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Next record, or `None` once the partition is closed.
    async fn next_record(&mut self) -> Option<QueueRecord>;
}

/// Partition of a source id, stable for the life of the process.
pub fn partition_for_source(source_id: &SourceId, partition_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    source_id.hash(&mut hasher);
    (hasher.finish() as usize) % partition_count.max(1)
}

#[derive(Debug, Default)]
struct PartitionState {
    records: Vec<Event>,
    position: u64,
    committed: u64,
    paused_until: Option<Instant>,
    closed: bool,
}

#[derive(Debug, Default)]
struct PartitionLog {
    state: Mutex<PartitionState>,
    notify: Notify,
}

/// In-process queue with per-partition ordering and rewind.
///
/// Topics are created on first use. Each partition keeps its full log, so
/// tests can inspect everything that was ever published.
pub struct InMemoryQueue {
    partitions: usize,
    topics: Mutex<HashMap<String, Arc<Vec<PartitionLog>>>>,
}

impl InMemoryQueue {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    async fn topic(&self, topic: &str) -> Arc<Vec<PartitionLog>> {
        let mut guard = self.topics.lock().await;
        guard
            .entry(topic.to_string())
            .or_insert_with(|| {
                Arc::new((0..self.partitions).map(|_| PartitionLog::default()).collect())
            })
            .clone()
    }

    async fn log(&self, position: &RecordPosition) -> Result<Arc<Vec<PartitionLog>>, TransportError> {
        let logs = self.topic(&position.topic).await;
        if position.partition >= logs.len() {
            return Err(TransportError::PartitionOutOfRange {
                topic: position.topic.clone(),
                partition: position.partition,
            });
        }
        Ok(logs)
    }

    /// Consumer for one partition of `topic`.
    pub async fn consumer(&self, topic: &str, partition: usize) -> Result<InMemoryConsumer, TransportError> {
        let logs = self.topic(topic).await;
        if partition >= logs.len() {
            return Err(TransportError::PartitionOutOfRange {
                topic: topic.to_string(),
                partition,
            });
        }
        Ok(InMemoryConsumer {
            topic: topic.to_string(),
            partition,
            logs,
        })
    }

    /// Every event ever published to `topic`, partition by partition.
    pub async fn published(&self, topic: &str) -> Vec<Event> {
        let logs = self.topic(topic).await;
        let mut events = Vec::new();
        for log in logs.iter() {
            events.extend(log.state.lock().await.records.iter().cloned());
        }
        events
    }

    /// Events on `topic` not yet acknowledged.
    pub async fn pending(&self, topic: &str) -> Vec<Event> {
        let logs = self.topic(topic).await;
        let mut events = Vec::new();
        for log in logs.iter() {
            let state = log.state.lock().await;
            events.extend(state.records.iter().skip(state.committed as usize).cloned());
        }
        events
    }

    pub async fn pending_count(&self, topic: &str) -> usize {
        self.pending(topic).await.len()
    }

    /// Close every partition; consumers drain nothing further and return `None`.
    pub async fn close(&self) {
        let guard = self.topics.lock().await;
        for logs in guard.values() {
            for log in logs.iter() {
                log.state.lock().await.closed = true;
                log.notify.notify_one();
            }
        }
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn publish(&self, topic: &str, event: &Event) -> Result<(), TransportError> {
        let logs = self.topic(topic).await;
        let partition = partition_for_source(&event.source_id, logs.len());
        let log = &logs[partition];
        {
            let mut state = log.state.lock().await;
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.records.push(event.clone());
        }
        log.notify.notify_one();
        Ok(())
    }

    async fn acknowledge(&self, position: &RecordPosition) -> Result<(), TransportError> {
        let logs = self.log(position).await?;
        let mut state = logs[position.partition].state.lock().await;
        if position.offset >= state.records.len() as u64 {
            return Err(TransportError::OffsetOutOfRange {
                topic: position.topic.clone(),
                partition: position.partition,
                offset: position.offset,
            });
        }
        state.committed = state.committed.max(position.offset + 1);
        Ok(())
    }

    async fn delay_redeliver(
        &self,
        position: &RecordPosition,
        pause: Duration,
    ) -> Result<(), TransportError> {
        let logs = self.log(position).await?;
        let log = &logs[position.partition];
        {
            let mut state = log.state.lock().await;
            if position.offset >= state.records.len() as u64 || position.offset < state.committed {
                return Err(TransportError::OffsetOutOfRange {
                    topic: position.topic.clone(),
                    partition: position.partition,
                    offset: position.offset,
                });
            }
            state.position = position.offset;
            state.paused_until = Some(Instant::now() + pause);
        }
        log.notify.notify_one();
        Ok(())
    }
}

/// Consumer over one partition of an [`InMemoryQueue`] topic.
pub struct InMemoryConsumer {
    topic: String,
    partition: usize,
    logs: Arc<Vec<PartitionLog>>,
}

#[async_trait]
impl QueueConsumer for InMemoryConsumer {
    async fn next_record(&mut self) -> Option<QueueRecord> {
        let log = &self.logs[self.partition];
        loop {
            let paused_until = {
                let mut state = log.state.lock().await;
                if state.closed {
                    return None;
                }
                let paused = state.paused_until;
                match paused {
                    Some(until) if Instant::now() < until => Some(until),
                    _ => {
                        state.paused_until = None;
                        if let Some(event) = state.records.get(state.position as usize).cloned() {
                            let offset = state.position;
                            state.position += 1;
                            return Some(QueueRecord {
                                position: RecordPosition {
                                    topic: self.topic.clone(),
                                    partition: self.partition,
                                    offset,
                                },
                                event,
                            });
                        }
                        None
                    }
                }
            };

            match paused_until {
                Some(until) => {
                    tokio::select! {
                        _ = sleep_until(until) => {}
                        _ = log.notify.notified() => {}
                    }
                }
                None => log.notify.notified().await,
            }
        }
    }
}
