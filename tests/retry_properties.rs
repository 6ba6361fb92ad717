use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ordered_webhook_dispatcher::{
    Clock, Decision, Deliver, DeliveryOutcome, DispatchError, DispatcherConfig, Event, InMemoryLedger,
    ManualClock, Orchestrator, PermanentReason, RetryReason, Tier,
};
use proptest::prelude::*;

/// Endpoint that never succeeds, alternating failure kinds.
struct Unreachable;

#[async_trait]
impl Deliver for Unreachable {
    async fn dispatch(&self, event: &Event) -> Result<DeliveryOutcome, DispatchError> {
        if event.retry_count % 2 == 0 {
            Ok(DeliveryOutcome::Retryable(RetryReason::SocketTimeout))
        } else {
            Ok(DeliveryOutcome::Permanent(PermanentReason::Status(503)))
        }
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn escalations_are_bounded_by_max_retries(
        max_retries in 0u32..12,
        backoffs in proptest::collection::vec(0u64..5_000, 0..5),
    ) {
        let mut retry_backoff_ms = backoffs;
        retry_backoff_ms.sort_unstable();
        let last_backoff_ms = retry_backoff_ms.last().copied().unwrap_or(0) + 1;
        let config = DispatcherConfig {
            retry_backoff_ms,
            last_backoff_ms,
            max_retries,
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::new(0));
        let orchestrator = Orchestrator::new(
            config,
            Arc::new(Unreachable),
            Arc::new(InMemoryLedger::new()),
            clock.clone(),
        );

        let (escalations, final_event) = runtime().block_on(async {
            let mut tier = Tier::Forward;
            let mut event = Event::new("src", 1, "http://localhost/hook");
            let mut escalations = 0u32;
            loop {
                clock.advance(Duration::from_secs(3_600));
                match orchestrator.process(tier, &event).await {
                    Decision::Escalated { to, event: next, .. } => {
                        assert_eq!(next.retry_count, event.retry_count + 1);
                        assert_eq!(next.last_attempt_at, clock.now_millis());
                        escalations += 1;
                        tier = to;
                        event = next;
                    }
                    Decision::Dropped { event, archive_to } => {
                        assert_eq!(archive_to, Some(Tier::Dead));
                        break (escalations, event);
                    }
                    other => panic!("unexpected decision {:?}", other),
                }
            }
        });

        prop_assert_eq!(escalations, max_retries);
        prop_assert_eq!(final_event.retry_count, max_retries);
    }

    #[test]
    fn postponing_never_changes_the_event(
        sequence in 2u64..1_000,
        retry_count in 0u32..5,
        last_attempt_at in 0u64..1_000_000,
    ) {
        let clock = Arc::new(ManualClock::new(2_000_000));
        let orchestrator = Orchestrator::new(
            DispatcherConfig::default(),
            Arc::new(Unreachable),
            Arc::new(InMemoryLedger::new()),
            clock,
        );
        let mut event = Event::new("src", sequence, "http://localhost/hook")
            .with_last_attempt_at(last_attempt_at);
        event.retry_count = retry_count;

        let decision = runtime().block_on(orchestrator.process(Tier::Retry(2), &event));
        prop_assert_eq!(
            decision,
            Decision::Postponed { to: Tier::Retry(2), event, pause: Duration::from_secs(1) }
        );
    }
}
