use std::fmt;

use thiserror::Error;

/// Errors surfaced by the dispatcher's public entry points.
///
/// The processing path never returns these to a caller: workers log them
/// and fall back to escalation or rewind.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Dispatcher has been shut down.
    #[error("dispatcher is shut down")]
    Shutdown,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The delivery client failed for a reason that is not an HTTP outcome.
    #[error("delivery fault: {0}")]
    Delivery(String),
}

/// Failures of the queue transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("partition {partition} out of range for topic {topic}")]
    PartitionOutOfRange { topic: String, partition: usize },

    #[error("offset {offset} out of range for {topic}/{partition}")]
    OffsetOutOfRange { topic: String, partition: usize, offset: u64 },

    #[error("transport backend error: {0}")]
    Backend(String),
}

/// Failures of the commit ledger's storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger backend error: {0}")]
    Backend(String),

    #[error("sequence {0} cannot be stored by this backend")]
    SequenceOutOfRange(u64),

    #[error("corrupt ledger record: {0}")]
    Corrupt(String),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Classified result of one HTTP delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx response.
    Success(u16),
    /// Worth trying again later.
    Retryable(RetryReason),
    /// The endpoint rejected the event or could not be reached.
    Permanent(PermanentReason),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success(_))
    }
}

/// Reasons a delivery attempt is classified as retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    /// Endpoint answered 408.
    RequestTimeout,
    /// No response before the socket timeout.
    SocketTimeout,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::RequestTimeout =>
                write!(f, "endpoint returned 408 request timeout"),
            RetryReason::SocketTimeout =>
                write!(f, "request timed out"),
        }
    }
}

/// Reasons a delivery attempt is classified as permanent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermanentReason {
    /// Non-2xx, non-408 response.
    Status(u16),
    /// Connection, protocol or request-building failure.
    Io(String),
}

impl fmt::Display for PermanentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermanentReason::Status(code) =>
                write!(f, "endpoint returned status {}", code),
            PermanentReason::Io(message) =>
                write!(f, "i/o error: {}", message),
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Success(code) => write!(f, "delivered with status {}", code),
            DeliveryOutcome::Retryable(reason) => write!(f, "retryable: {}", reason),
            DeliveryOutcome::Permanent(reason) => write!(f, "permanent: {}", reason),
        }
    }
}
