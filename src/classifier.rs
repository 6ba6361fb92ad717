use async_trait::async_trait;

use crate::error::{DeliveryOutcome, DispatchError, PermanentReason, RetryReason};
use crate::types::Event;

/// Maximum number of response body bytes read for diagnostics.
pub const RESPONSE_MAX_LENGTH: usize = 4096;

/// Performs one delivery attempt for an event.
///
/// `Ok` carries the classified HTTP outcome. `Err` is reserved for faults of
/// the client itself; the orchestrator escalates on those too, but logs them
/// separately.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn dispatch(&self, event: &Event) -> Result<DeliveryOutcome, DispatchError>;
}

/// Classify a received HTTP status code.
///
/// | status      | outcome   |
/// |-------------|-----------|
/// | 200..=299   | Success   |
/// | 408         | Retryable |
/// | anything else | Permanent |
pub fn classify_status(status: u16) -> DeliveryOutcome {
    match status {
        200..=299 => DeliveryOutcome::Success(status),
        408 => DeliveryOutcome::Retryable(RetryReason::RequestTimeout),
        other => DeliveryOutcome::Permanent(PermanentReason::Status(other)),
    }
}

#[cfg(feature = "http")]
pub use client::HttpDeliverer;

#[cfg(feature = "http")]
mod client {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
    use tracing::{debug, info, warn};

    use super::{classify_status, Deliver, RESPONSE_MAX_LENGTH};
    use crate::error::{DeliveryOutcome, DispatchError, PermanentReason, RetryReason};
    use crate::types::Event;

    /// `reqwest`-backed delivery client.
    ///
    /// One POST per call, bounded by the client's request timeout.
    #[derive(Clone)]
    pub struct HttpDeliverer {
        client: reqwest::Client,
    }

    impl HttpDeliverer {
        pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| DispatchError::Delivery(e.to_string()))?;
            Ok(Self { client })
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }

        fn headers(event: &Event) -> Result<HeaderMap, String> {
            let mut headers = HeaderMap::new();
            let content_type = HeaderValue::from_str(&event.content_type)
                .map_err(|e| format!("invalid content type: {}", e))?;
            headers.insert(CONTENT_TYPE, content_type);

            for (name, value) in &event.additional_headers {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| format!("invalid header name {:?}: {}", name, e))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| format!("invalid header value for {}: {}", name, e))?;
                headers.append(name, value);
            }
            Ok(headers)
        }

        async fn read_capped(response: &mut reqwest::Response) -> Vec<u8> {
            let mut body = Vec::new();
            while body.len() < RESPONSE_MAX_LENGTH {
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        let take = chunk.len().min(RESPONSE_MAX_LENGTH - body.len());
                        body.extend_from_slice(&chunk[..take]);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!(error = %err, "failed to read response body");
                        break;
                    }
                }
            }
            body
        }
    }

    #[async_trait]
    impl Deliver for HttpDeliverer {
        async fn dispatch(&self, event: &Event) -> Result<DeliveryOutcome, DispatchError> {
            let headers = match Self::headers(event) {
                Ok(headers) => headers,
                Err(message) => {
                    warn!(
                        source_id = %event.source_id,
                        sequence = event.sequence,
                        %message,
                        "cannot build webhook request"
                    );
                    return Ok(DeliveryOutcome::Permanent(PermanentReason::Io(message)));
                }
            };

            let response = self.client
                .post(&event.url)
                .headers(headers)
                .body(event.request_body.clone())
                .send()
                .await;

            let outcome = match response {
                Ok(mut resp) => {
                    let status = resp.status().as_u16();
                    let body = Self::read_capped(&mut resp).await;
                    info!(
                        source_id = %event.source_id,
                        sequence = event.sequence,
                        status,
                        body = %String::from_utf8_lossy(&body),
                        "response from webhook endpoint"
                    );
                    classify_status(status)
                }
                Err(err) if err.is_timeout() => DeliveryOutcome::Retryable(RetryReason::SocketTimeout),
                Err(err) => DeliveryOutcome::Permanent(PermanentReason::Io(err.to_string())),
            };

            if !outcome.is_success() {
                warn!(
                    source_id = %event.source_id,
                    sequence = event.sequence,
                    url = %event.url,
                    %outcome,
                    "webhook delivery failed"
                );
            }
            Ok(outcome)
        }
    }
}
