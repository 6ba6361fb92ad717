use std::sync::Arc;
use std::time::Duration;

use ordered_webhook_dispatcher::{
    logging, DispatchError, Dispatcher, DispatcherConfig, Event, HttpDeliverer, InMemoryLedger,
    InMemoryQueue, QueueConsumer, SystemClock,
};

#[tokio::main]
async fn main() -> Result<(), DispatchError> {
    logging::init_tracing();

    let config = DispatcherConfig {
        retry_backoff_ms: vec![1_000, 5_000],
        last_backoff_ms: 10_000,
        max_retries: 5,
        ..Default::default()
    };

    let queue = Arc::new(InMemoryQueue::new(config.partitions));
    let deliverer = Arc::new(HttpDeliverer::new(config.http_timeout())?);
    let ledger = Arc::new(InMemoryLedger::new());
    let mut dispatcher = Dispatcher::new(config, queue.clone(), deliverer, ledger.clone(), Arc::new(SystemClock))?;

    let consumers = queue.clone();
    dispatcher
        .spawn_workers(|topic: String, partition: usize| {
            let queue = consumers.clone();
            async move {
                let consumer = queue.consumer(&topic, partition).await?;
                Ok::<Box<dyn QueueConsumer>, DispatchError>(Box::new(consumer))
            }
        })
        .await?;

    for sequence in 1..=3 {
        let event = Event::new("orders", sequence, "https://example.com/webhook")
            .with_body(format!(r#"{{"order":{}}}"#, sequence).into_bytes())
            .with_header("X-Webhook-Source", "orders");
        dispatcher.enqueue(event).await?;
    }

    tokio::time::sleep(Duration::from_secs(3)).await;
    dispatcher.shutdown().await;
    queue.close().await;

    tracing::info!(committed = ledger.len().await, "demo finished");
    Ok(())
}
