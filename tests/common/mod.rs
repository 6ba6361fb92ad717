#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ordered_webhook_dispatcher::{
    CommitKey, CommitLedger, DeliveryOutcome, DispatchError, Dispatcher, DispatcherConfig, Event,
    InMemoryLedger, InMemoryQueue, ManualClock, QueueTransport, RecordPosition, RetryReason, Tier,
    TierWorker, TransportError,
};
use tokio_util::sync::CancellationToken;

pub const START_MILLIS: u64 = 1_700_000_000_000;

/// Endpoint double that records every call and can be switched off.
pub struct Endpoint {
    up: AtomicBool,
    calls: Mutex<Vec<(String, u64)>>,
    panics_left: AtomicUsize,
}

impl Endpoint {
    pub fn up() -> Arc<Self> {
        Arc::new(Self {
            up: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            panics_left: AtomicUsize::new(0),
        })
    }

    pub fn down() -> Arc<Self> {
        let endpoint = Self::up();
        endpoint.set_up(false);
        endpoint
    }

    /// Panic on the next `count` calls, then behave normally.
    pub fn panicking(count: usize) -> Arc<Self> {
        let endpoint = Self::up();
        endpoint.panics_left.store(count, Ordering::SeqCst);
        endpoint
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ordered_webhook_dispatcher::Deliver for Endpoint {
    async fn dispatch(&self, event: &Event) -> Result<DeliveryOutcome, DispatchError> {
        self.calls
            .lock()
            .unwrap()
            .push((event.source_id.as_str().to_string(), event.sequence));

        let should_panic = self
            .panics_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_panic {
            panic!("endpoint double exploded");
        }

        if self.up.load(Ordering::SeqCst) {
            Ok(DeliveryOutcome::Success(200))
        } else {
            Ok(DeliveryOutcome::Retryable(RetryReason::SocketTimeout))
        }
    }
}

/// Transport whose publishes can be made to fail, delegating otherwise.
pub struct FlakyTransport {
    inner: Arc<InMemoryQueue>,
    failures: AtomicUsize,
}

impl FlakyTransport {
    pub fn new(inner: Arc<InMemoryQueue>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures: AtomicUsize::new(0),
        })
    }

    /// Fail the next `count` publishes.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueueTransport for FlakyTransport {
    async fn publish(&self, topic: &str, event: &Event) -> Result<(), TransportError> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(TransportError::Backend("broker unavailable".into()));
        }
        self.inner.publish(topic, event).await
    }

    async fn acknowledge(&self, position: &RecordPosition) -> Result<(), TransportError> {
        self.inner.acknowledge(position).await
    }

    async fn delay_redeliver(
        &self,
        position: &RecordPosition,
        pause: Duration,
    ) -> Result<(), TransportError> {
        self.inner.delay_redeliver(position, pause).await
    }
}

/// Small retry ladder for tests: retry-1 after 1s, retry-2 after 2s, last after 4s.
pub fn test_config() -> DispatcherConfig {
    DispatcherConfig {
        retry_backoff_ms: vec![1_000, 2_000],
        last_backoff_ms: 4_000,
        max_retries: 4,
        partitions: 1,
        transport_retry_pause_ms: 10,
        postpone_pause_ms: 10,
        ..Default::default()
    }
}

/// Single-partition dispatcher driven one record at a time.
pub struct Harness {
    pub queue: Arc<InMemoryQueue>,
    pub ledger: Arc<InMemoryLedger>,
    pub clock: Arc<ManualClock>,
    pub endpoint: Arc<Endpoint>,
    pub dispatcher: Dispatcher,
    transport: Arc<dyn QueueTransport>,
}

impl Harness {
    pub fn new(config: DispatcherConfig, endpoint: Arc<Endpoint>) -> Self {
        let queue = Arc::new(InMemoryQueue::new(config.partitions));
        Self::with_transport(config, endpoint, queue.clone(), queue)
    }

    pub fn with_transport(
        config: DispatcherConfig,
        endpoint: Arc<Endpoint>,
        queue: Arc<InMemoryQueue>,
        transport: Arc<dyn QueueTransport>,
    ) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let dispatcher = Dispatcher::new(
            config,
            transport.clone(),
            endpoint.clone(),
            ledger.clone(),
            clock.clone(),
        )
        .expect("valid config");

        Self {
            queue,
            ledger,
            clock,
            endpoint,
            dispatcher,
            transport,
        }
    }

    pub async fn worker(&self, tier: Tier) -> TierWorker {
        let topic = self.dispatcher.config().topic(tier);
        let consumer = self.queue.consumer(&topic, 0).await.expect("consumer");
        TierWorker::new(
            tier,
            0,
            Box::new(consumer),
            self.transport.clone(),
            self.dispatcher.orchestrator(),
            CancellationToken::new(),
        )
    }

    pub async fn enqueue(&self, source: &str, sequence: u64) {
        self.dispatcher
            .enqueue(Event::new(source, sequence, "http://localhost/hook"))
            .await
            .expect("enqueue");
    }

    pub async fn pending(&self, tier: Tier) -> Vec<Event> {
        self.queue.pending(&self.dispatcher.config().topic(tier)).await
    }

    pub async fn committed(&self) -> Vec<CommitKey> {
        self.ledger.keys().await
    }

    pub async fn is_committed(&self, source: &str, sequence: u64) -> bool {
        self.ledger
            .exists(&CommitKey::new(source, sequence))
            .await
            .expect("ledger")
    }
}

pub fn keys(source: &str, sequences: &[u64]) -> Vec<CommitKey> {
    sequences.iter().map(|seq| CommitKey::new(source, *seq)).collect()
}

pub fn sequences(events: &[Event]) -> Vec<u64> {
    events.iter().map(|e| e.sequence).collect()
}
