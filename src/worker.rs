use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::TransportError;
use crate::orchestrator::{Decision, Orchestrator, QueueAction};
use crate::transport::{QueueConsumer, QueueRecord, QueueTransport};
use crate::types::{Event, Tier};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Consumer of one tier's topic partition.
///
/// Each worker:
/// - Pulls records strictly one at a time
/// - Asks the orchestrator for a decision
/// - Applies exactly one queue action per record
/// - Never stops on a fault; only cancellation or a closed consumer end it
pub struct TierWorker {
    tier: Tier,
    partition: usize,
    consumer: Box<dyn QueueConsumer>,
    transport: Arc<dyn QueueTransport>,
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
}

impl TierWorker {
    pub fn new(
        tier: Tier,
        partition: usize,
        consumer: Box<dyn QueueConsumer>,
        transport: Arc<dyn QueueTransport>,
        orchestrator: Arc<Orchestrator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tier,
            partition,
            consumer,
            transport,
            orchestrator,
            cancel,
        }
    }

    /// Main worker loop.
    ///
    /// Cancellation is only observed between records: a record that was
    /// pulled is always carried through to its queue action.
    pub async fn run(mut self) {
        info!(tier = %self.tier, partition = self.partition, "tier worker started");
        loop {
            let record = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                record = self.consumer.next_record() => record,
            };
            let Some(record) = record else { break };

            self.handle(record).await;
        }
        info!(tier = %self.tier, partition = self.partition, "tier worker stopped");
    }

    /// Pull and handle exactly one record. Returns `false` once the
    /// consumer is closed.
    pub async fn poll_once(&mut self) -> bool {
        match self.consumer.next_record().await {
            Some(record) => {
                self.handle(record).await;
                true
            }
            None => false,
        }
    }

    /// Decide and act on one record.
    pub async fn handle(&self, record: QueueRecord) {
        let decision = match AssertUnwindSafe(self.orchestrator.process(self.tier, &record.event))
            .catch_unwind()
            .await
        {
            Ok(decision) => decision,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.orchestrator.escalate_after_fault(self.tier, &record.event, format!("panic: {}", message))
            }
        };

        debug!(
            tier = %self.tier,
            offset = record.position.offset,
            decision = decision.label(),
            "applying queue action"
        );
        self.apply(&record, decision).await;
    }

    async fn apply(&self, record: &QueueRecord, decision: Decision) {
        let mut idle = Duration::ZERO;
        let result = match decision.into_action() {
            QueueAction::Ack => self.transport.acknowledge(&record.position).await,
            QueueAction::PublishAndAck { tier, event } => {
                self.publish_and_ack(record, tier, &event).await
            }
            QueueAction::Requeue { tier, event, pause } => {
                idle = pause;
                self.publish_and_ack(record, tier, &event).await
            }
            QueueAction::DelayRedeliver { pause } => {
                self.transport.delay_redeliver(&record.position, pause).await
            }
        };

        match result {
            Ok(()) if !idle.is_zero() => {
                // a requeued record would otherwise be pulled straight back
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(idle) => {}
                }
            }
            Ok(()) => {}
            Err(err) => self.recover(record, err).await,
        }
    }

    async fn publish_and_ack(
        &self,
        record: &QueueRecord,
        tier: Tier,
        event: &Event,
    ) -> Result<(), TransportError> {
        let topic = self.orchestrator.config().topic(tier);
        self.transport.publish(&topic, event).await?;
        self.transport.acknowledge(&record.position).await
    }

    /// The record was not acknowledged; have it presented again.
    async fn recover(&self, record: &QueueRecord, err: TransportError) {
        metric_inc("webhook.worker.transport_error");
        error!(
            tier = %self.tier,
            partition = self.partition,
            offset = record.position.offset,
            source_id = %record.event.source_id,
            sequence = record.event.sequence,
            error = %err,
            "queue action failed, rewinding record"
        );

        let pause = self.orchestrator.config().transport_retry_pause();
        if let Err(err) = self.transport.delay_redeliver(&record.position, pause).await {
            error!(
                tier = %self.tier,
                partition = self.partition,
                offset = record.position.offset,
                error = %err,
                "failed to rewind record"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
