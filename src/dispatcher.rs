use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::classifier::Deliver;
use crate::clock::Clock;
use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::ledger::CommitLedger;
use crate::orchestrator::Orchestrator;
use crate::transport::{QueueConsumer, QueueTransport};
use crate::types::{Event, Tier};
use crate::worker::TierWorker;

/// Owns the tier workers and the producer entry point.
///
/// Collaborators (delivery client, ledger, transport, clock) are composed
/// once here and shared by every worker.
pub struct Dispatcher {
    transport: Arc<dyn QueueTransport>,
    orchestrator: Arc<Orchestrator>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn QueueTransport>,
        deliverer: Arc<dyn Deliver>,
        ledger: Arc<dyn CommitLedger>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;
        let orchestrator = Arc::new(Orchestrator::new(config, deliverer, ledger, clock.clone()));

        Ok(Self {
            transport,
            orchestrator,
            clock,
            cancel: CancellationToken::new(),
            worker_handles: Vec::new(),
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        self.orchestrator.config()
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    /// Hand a new event to the forward tier.
    ///
    /// The retry count is reset and the enqueue time becomes the first
    /// `last_attempt_at`.
    pub async fn enqueue(&self, event: Event) -> Result<(), DispatchError> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Shutdown);
        }

        let event = Event {
            retry_count: 0,
            last_attempt_at: self.clock.now_millis(),
            ..event
        };
        let topic = self.config().topic(Tier::Forward);
        self.transport.publish(&topic, &event).await?;
        info!(
            source_id = %event.source_id,
            sequence = event.sequence,
            topic = %topic,
            "webhook enqueued"
        );
        Ok(())
    }

    /// Spawn one worker per consumed tier and partition.
    ///
    /// `consumer_for(topic, partition)` supplies the consumer for each.
    pub async fn spawn_workers<F, Fut>(&mut self, mut consumer_for: F) -> Result<(), DispatchError>
    where
        F: FnMut(String, usize) -> Fut,
        Fut: std::future::Future<Output = Result<Box<dyn QueueConsumer>, DispatchError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Shutdown);
        }

        let config = self.config().clone();
        for tier in config.consumed_tiers() {
            for partition in 0..config.partitions {
                let consumer = consumer_for(config.topic(tier), partition).await?;
                self.spawn_worker(tier, partition, consumer);
            }
        }
        Ok(())
    }

    /// Spawn a single worker for `tier` over `consumer`.
    pub fn spawn_worker(&mut self, tier: Tier, partition: usize, consumer: Box<dyn QueueConsumer>) {
        let worker = TierWorker::new(
            tier,
            partition,
            consumer,
            self.transport.clone(),
            self.orchestrator.clone(),
            self.cancel.child_token(),
        );
        self.worker_handles.push(tokio::spawn(worker.run()));
    }

    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop pulling new records and wait for in-flight ones to finish.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }
        info!("dispatcher stopped");
    }
}
