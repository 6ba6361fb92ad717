//! Pre-dispatch checks consulted by the orchestrator.
//!
//! None of the gates mutate state. A gate saying "no" is the normal case
//! for out-of-order or recently failed events, not a fault.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::LedgerError;
use crate::ledger::CommitLedger;
use crate::types::Event;

/// Lets an event through once its predecessor is committed.
#[derive(Clone)]
pub struct OrderingGate {
    ledger: Arc<dyn CommitLedger>,
}

impl OrderingGate {
    pub fn new(ledger: Arc<dyn CommitLedger>) -> Self {
        Self { ledger }
    }

    /// `true` for sequence 1, or when `(source, sequence - 1)` is in the ledger.
    ///
    /// Dead-letter markers count as committed.
    pub async fn eligible(&self, event: &Event) -> Result<bool, LedgerError> {
        match event.predecessor_key() {
            None => Ok(true),
            Some(key) => self.ledger.exists(&key).await,
        }
    }
}

/// Enforces a minimum delay since the event's last attempt.
#[derive(Clone)]
pub struct BackoffGate {
    clock: Arc<dyn Clock>,
}

impl BackoffGate {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn eligible(&self, event: &Event, threshold: Duration) -> bool {
        self.remaining(event, threshold).is_zero()
    }

    /// Time left until `threshold` has elapsed since `last_attempt_at`.
    ///
    /// A timestamp in the future counts as zero elapsed time.
    pub fn remaining(&self, event: &Event, threshold: Duration) -> Duration {
        let elapsed = self.clock.now_millis().saturating_sub(event.last_attempt_at);
        threshold.saturating_sub(Duration::from_millis(elapsed))
    }
}

/// Reports events whose retry budget is spent.
#[derive(Debug, Clone, Copy)]
pub struct DeadLetterGate {
    max_retries: u32,
}

impl DeadLetterGate {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn exhausted(&self, event: &Event) -> bool {
        event.retry_count >= self.max_retries
    }
}
