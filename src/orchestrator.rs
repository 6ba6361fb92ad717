//! Per-event dispatch state machine.
//!
//! ```text
//! Received ─> duplicate? ──────────────────────────────> Duplicate (ack)
//!                        ── dead-lettered + exhausted ─> Dropped   (re-archive)
//!          ─> exhausted? ──────────────────────────────> Dropped   (ack / archive)
//!          ─> predecessor committed? ── no ────────────> Postponed (requeue + ack [+ pause])
//!          ─> backoff elapsed? (not on forward) ── no ─> Delayed   (rewind + pause)
//!          ─> attempt ── Success ──────────────────────> Committed (ledger + ack)
//!                     ── Retryable / Permanent / fault ─> Escalated (publish + ack)
//! ```
//!
//! All failures are resolved here. A caller only ever receives a
//! [`Decision`], never an error.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::classifier::Deliver;
use crate::clock::Clock;
use crate::config::{DispatcherConfig, TierSettings};
use crate::error::{DeliveryOutcome, DispatchError, PermanentReason, RetryReason};
use crate::gates::{BackoffGate, DeadLetterGate, OrderingGate};
use crate::ledger::CommitLedger;
use crate::types::{CommitKind, CommitRecord, Event, Tier};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Why an event moved to a slower tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationCause {
    Retryable(RetryReason),
    Permanent(PermanentReason),
    /// A gate, the ledger or the delivery client failed unexpectedly.
    InternalFault(String),
}

/// Outcome of processing one event on one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Already in the ledger; nothing to send.
    Duplicate,
    /// Delivered and recorded in the ledger.
    Committed { status: u16 },
    /// Predecessor not committed yet; republish unchanged. `pause` is
    /// non-zero when the event goes back onto the worker's own topic.
    Postponed { to: Tier, event: Event, pause: Duration },
    /// Backoff not elapsed; present the same record again after `pause`.
    Delayed { pause: Duration },
    /// Attempt failed; `event` carries the incremented retry count.
    Escalated { to: Tier, event: Event, cause: EscalationCause },
    /// Retry budget spent. `archive_to` is the dead tier when the event
    /// should be kept for inspection.
    Dropped { event: Event, archive_to: Option<Tier> },
}

/// Queue operation a worker performs for a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAction {
    Ack,
    PublishAndAck { tier: Tier, event: Event },
    /// Publish, ack, then stay idle for `pause` before pulling again.
    Requeue { tier: Tier, event: Event, pause: Duration },
    DelayRedeliver { pause: Duration },
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Duplicate => "duplicate",
            Decision::Committed { .. } => "committed",
            Decision::Postponed { .. } => "postponed",
            Decision::Delayed { .. } => "delayed",
            Decision::Escalated { .. } => "escalated",
            Decision::Dropped { .. } => "dropped",
        }
    }

    pub fn into_action(self) -> QueueAction {
        match self {
            Decision::Duplicate | Decision::Committed { .. } => QueueAction::Ack,
            Decision::Postponed { to, event, pause } => QueueAction::Requeue { tier: to, event, pause },
            Decision::Escalated { to, event, .. } => QueueAction::PublishAndAck { tier: to, event },
            Decision::Delayed { pause } => QueueAction::DelayRedeliver { pause },
            Decision::Dropped { event, archive_to: Some(tier) } => {
                QueueAction::PublishAndAck { tier, event }
            }
            Decision::Dropped { archive_to: None, .. } => QueueAction::Ack,
        }
    }
}

/// Sequences the gates and the delivery client for one event at a time.
///
/// Collaborators are injected once at startup and shared by every tier
/// worker; the orchestrator itself holds no per-event state.
pub struct Orchestrator {
    config: DispatcherConfig,
    ordering: OrderingGate,
    backoff: BackoffGate,
    dead_letter: DeadLetterGate,
    deliverer: Arc<dyn Deliver>,
    ledger: Arc<dyn CommitLedger>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        config: DispatcherConfig,
        deliverer: Arc<dyn Deliver>,
        ledger: Arc<dyn CommitLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ordering: OrderingGate::new(ledger.clone()),
            backoff: BackoffGate::new(clock.clone()),
            dead_letter: DeadLetterGate::new(config.max_retries),
            config,
            deliverer,
            ledger,
            clock,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Decide what to do with `event`, received on `tier`.
    pub async fn process(&self, tier: Tier, event: &Event) -> Decision {
        let settings = self.config.tier_settings(tier);
        let decision = match self.decide(&settings, event).await {
            Ok(decision) => decision,
            Err(err) => self.escalate_after_fault(tier, event, err.to_string()),
        };
        log_decision(tier, event, &decision);
        decision
    }

    /// Escalation used when processing could not reach a decision.
    ///
    /// Faults never drop an event; they cost one retry like a failed attempt.
    pub fn escalate_after_fault(&self, tier: Tier, event: &Event, message: String) -> Decision {
        error!(
            %tier,
            source_id = %event.source_id,
            sequence = event.sequence,
            retry_count = event.retry_count,
            error = %message,
            "internal fault while dispatching webhook, escalating"
        );
        metric_inc("webhook.dispatch.internal_fault");
        Decision::Escalated {
            to: self.config.next_tier(tier),
            event: event.escalated(self.clock.now_millis()),
            cause: EscalationCause::InternalFault(message),
        }
    }

    async fn decide(&self, settings: &TierSettings, event: &Event) -> Result<Decision, DispatchError> {
        if let Some(record) = self.ledger.get(&event.commit_key()).await? {
            // an earlier drop whose archive publish did not go through
            if record.kind == CommitKind::DeadLettered && self.dead_letter.exhausted(event) {
                return self.drop_exhausted(event).await;
            }
            return Ok(Decision::Duplicate);
        }

        if self.dead_letter.exhausted(event) {
            return self.drop_exhausted(event).await;
        }

        if !self.ordering.eligible(event).await? {
            return Ok(Decision::Postponed {
                to: settings.postpone_to,
                event: event.clone(),
                pause: settings.postpone_pause,
            });
        }

        if let Some(threshold) = settings.backoff {
            let remaining = self.backoff.remaining(event, threshold);
            if !remaining.is_zero() {
                return Ok(Decision::Delayed {
                    pause: remaining + jitter_delay(self.config.redelivery_jitter_ms),
                });
            }
        }

        let outcome = self.deliverer.dispatch(event).await?;
        let cause = match outcome {
            DeliveryOutcome::Success(status) => {
                let record = CommitRecord::delivered(event.commit_key(), self.clock.now_millis());
                if !self.ledger.commit(record).await? {
                    debug!(key = %event.commit_key(), "commit record already present");
                }
                return Ok(Decision::Committed { status });
            }
            DeliveryOutcome::Retryable(reason) => EscalationCause::Retryable(reason),
            DeliveryOutcome::Permanent(reason) => EscalationCause::Permanent(reason),
        };

        Ok(Decision::Escalated {
            to: settings.escalate_to,
            event: event.escalated(self.clock.now_millis()),
            cause,
        })
    }

    async fn drop_exhausted(&self, event: &Event) -> Result<Decision, DispatchError> {
        let policy = &self.config.dead_letter;
        if policy.synthesize_commit {
            let marker = CommitRecord::dead_lettered(event.commit_key(), self.clock.now_millis());
            if let Err(err) = self.ledger.commit(marker).await {
                // rewind and retry the marker; no budget is spent
                error!(
                    source_id = %event.source_id,
                    sequence = event.sequence,
                    error = %err,
                    "failed to write dead-letter marker"
                );
                metric_inc("webhook.dispatch.internal_fault");
                return Ok(Decision::Delayed { pause: self.config.transport_retry_pause() });
            }
        }

        Ok(Decision::Dropped {
            event: event.clone(),
            archive_to: policy.publish_to_dead_topic.then_some(Tier::Dead),
        })
    }
}

fn log_decision(tier: Tier, event: &Event, decision: &Decision) {
    match decision {
        Decision::Duplicate => {
            metric_inc("webhook.dispatch.duplicate");
            info!(%tier, source_id = %event.source_id, sequence = event.sequence, "already committed, skipping");
        }
        Decision::Committed { status } => {
            metric_inc("webhook.dispatch.committed");
            info!(%tier, source_id = %event.source_id, sequence = event.sequence, status, "webhook delivered");
        }
        Decision::Postponed { to, pause, .. } => {
            metric_inc("webhook.dispatch.postponed");
            debug!(%tier, to = %to, source_id = %event.source_id, sequence = event.sequence, pause_ms = pause.as_millis() as u64, "predecessor not committed, postponing");
        }
        Decision::Delayed { pause } => {
            metric_inc("webhook.dispatch.delayed");
            debug!(%tier, source_id = %event.source_id, sequence = event.sequence, pause_ms = pause.as_millis() as u64, "backoff not elapsed");
        }
        Decision::Escalated { to, event: next, cause } => {
            metric_inc("webhook.dispatch.escalated");
            match cause {
                EscalationCause::InternalFault(_) => {}
                EscalationCause::Retryable(reason) => warn!(
                    %tier, to = %to, source_id = %event.source_id, sequence = event.sequence,
                    retry_count = next.retry_count, %reason, "retryable failure, escalating"
                ),
                EscalationCause::Permanent(reason) => warn!(
                    %tier, to = %to, source_id = %event.source_id, sequence = event.sequence,
                    retry_count = next.retry_count, %reason, "permanent failure, escalating"
                ),
            }
        }
        Decision::Dropped { archive_to, .. } => {
            metric_inc("webhook.dispatch.dropped");
            error!(
                %tier,
                source_id = %event.source_id,
                sequence = event.sequence,
                retry_count = event.retry_count,
                archived = archive_to.is_some(),
                "retries exhausted, dropping webhook"
            );
        }
    }
}

fn jitter_delay(jitter_ms: u64) -> Duration {
    if jitter_ms == 0 {
        return Duration::from_millis(0);
    }
    Duration::from_millis(fastrand::u64(0..=jitter_ms))
}
