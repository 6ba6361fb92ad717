//! Tiered webhook delivery with per-source ordering.
//!
//! Producers enqueue events on a forward topic. Tier workers consume each
//! topic partition, attempt the HTTP call, and either commit the event,
//! escalate it to a slower retry tier, or drop it once its retry budget
//! is spent.
//!
//! ## Guarantees
//! - At-least-once delivery
//! - Per-source ordering: sequence `N` is only sent after `N - 1` is committed
//! - Bounded retries: at most `max_retries` escalations per event
//! - Faults escalate, they never silently drop an event
//!
//! ## Non-Guarantees
//! - Exactly-once delivery to the endpoint
//! - Ordering across sources
//! - Real-time latency bounds
//! - Payload transformation
//!
//! The queue transport and the ledger's storage engine are external; this
//! crate ships in-memory implementations of both plus optional Redis and
//! Postgres ledgers.

mod classifier;
mod clock;
mod config;
mod dispatcher;
mod error;
mod gates;
mod ledger;
mod orchestrator;
mod transport;
mod types;
mod worker;

pub mod logging;

#[cfg(feature = "redis")]
mod ledger_redis;

#[cfg(feature = "postgres")]
mod ledger_postgres;

pub use classifier::{classify_status, Deliver, RESPONSE_MAX_LENGTH};
#[cfg(feature = "http")]
pub use classifier::HttpDeliverer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use self::config::{DeadLetterPolicy, DispatcherConfig, TierSettings, TopicNames, ENV_PREFIX};
pub use dispatcher::Dispatcher;
pub use error::{
    ConfigError,
    DeliveryOutcome,
    DispatchError,
    LedgerError,
    PermanentReason,
    RetryReason,
    TransportError,
};
pub use gates::{BackoffGate, DeadLetterGate, OrderingGate};
pub use ledger::{CommitLedger, InMemoryLedger};
pub use orchestrator::{Decision, EscalationCause, Orchestrator, QueueAction};
pub use transport::{
    partition_for_source,
    InMemoryConsumer,
    InMemoryQueue,
    QueueConsumer,
    QueueRecord,
    QueueTransport,
    RecordPosition,
};
pub use types::{CommitKey, CommitKind, CommitRecord, Event, SourceId, Tier};
pub use worker::TierWorker;

#[cfg(feature = "redis")]
pub use ledger_redis::RedisLedger;

#[cfg(feature = "postgres")]
pub use ledger_postgres::PostgresLedger;
