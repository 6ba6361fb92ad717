use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical source of events.
///
/// Events sharing a `SourceId` are delivered in increasing `sequence`
/// order. Events of different sources carry no ordering relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        SourceId(value.to_string())
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        SourceId(value)
    }
}

/// One webhook delivery unit.
///
/// The dispatcher treats `request_body` as opaque bytes and never
/// transforms it. Only `retry_count` and `last_attempt_at` change over the
/// life of an event, and only through [`Event::escalated`], which returns a
/// new value instead of mutating the one a queue handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Ordering group for this event.
    pub source_id: SourceId,

    /// Position within the source, assigned by the producer. Starts at 1.
    pub sequence: u64,

    /// Target URL for the POST.
    pub url: String,

    /// Value of the `Content-Type` request header.
    pub content_type: String,

    /// Request entity, sent verbatim.
    pub request_body: Vec<u8>,

    /// Extra request headers merged into the POST.
    pub additional_headers: HashMap<String, String>,

    /// Number of tier escalations so far.
    pub retry_count: u32,

    /// Unix epoch millis of the last attempt, or of enqueue before the first.
    pub last_attempt_at: u64,
}

impl Event {
    /// Create a new event with an empty body.
    ///
    /// Defaults:
    /// - content_type: `application/json`
    /// - retry_count: 0
    /// - last_attempt_at: 0 (stamped by the dispatcher on enqueue)
    pub fn new(source_id: impl Into<SourceId>, sequence: u64, url: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            sequence,
            url: url.into(),
            content_type: "application/json".to_string(),
            request_body: Vec::new(),
            additional_headers: HashMap::new(),
            retry_count: 0,
            last_attempt_at: 0,
        }
    }

    /// Set the request body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.request_body = body.into();
        self
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Add one extra request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.insert(name.into(), value.into());
        self
    }

    /// Set the last attempt timestamp (unix millis).
    pub fn with_last_attempt_at(mut self, millis: u64) -> Self {
        self.last_attempt_at = millis;
        self
    }

    /// Ledger key of this event.
    pub fn commit_key(&self) -> CommitKey {
        CommitKey::new(self.source_id.clone(), self.sequence)
    }

    /// Ledger key of the event that must be committed before this one,
    /// or `None` for the first event of a source.
    pub fn predecessor_key(&self) -> Option<CommitKey> {
        if self.sequence <= 1 {
            None
        } else {
            Some(CommitKey::new(self.source_id.clone(), self.sequence - 1))
        }
    }

    /// Copy of this event after one more escalation attempted at `now_millis`.
    pub fn escalated(&self, now_millis: u64) -> Event {
        Event {
            retry_count: self.retry_count.saturating_add(1),
            last_attempt_at: now_millis,
            ..self.clone()
        }
    }
}

/// Stage of the escalating retry pipeline.
///
/// Order: `Forward`, `Retry(1)` .. `Retry(n)`, `Last`, `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// First attempt, no backoff.
    Forward,
    /// Intermediate retry tier, numbered from 1.
    Retry(u8),
    /// Terminal retry tier; failures here loop back into it.
    Last,
    /// Archive of dropped events. Never consumed.
    Dead,
}

impl Tier {
    pub fn is_forward(&self) -> bool {
        matches!(self, Tier::Forward)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Forward => write!(f, "forward"),
            Tier::Retry(n) => write!(f, "retry-{}", n),
            Tier::Last => write!(f, "last"),
            Tier::Dead => write!(f, "dead"),
        }
    }
}

/// Ledger key: one event of one source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitKey {
    pub source_id: SourceId,
    pub sequence: u64,
}

impl CommitKey {
    pub fn new(source_id: impl Into<SourceId>, sequence: u64) -> Self {
        Self { source_id: source_id.into(), sequence }
    }
}

impl fmt::Display for CommitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source_id, self.sequence)
    }
}

/// Why a commit record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    /// The endpoint accepted the event.
    Delivered,
    /// The event exhausted its retries; the record only unblocks successors.
    DeadLettered,
}

impl CommitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitKind::Delivered => "delivered",
            CommitKind::DeadLettered => "dead_lettered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "delivered" => Some(CommitKind::Delivered),
            "dead_lettered" => Some(CommitKind::DeadLettered),
            _ => None,
        }
    }
}

/// Write-once ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub key: CommitKey,
    /// Unix epoch millis of the commit.
    pub delivered_at: u64,
    pub kind: CommitKind,
}

impl CommitRecord {
    pub fn delivered(key: CommitKey, delivered_at: u64) -> Self {
        Self { key, delivered_at, kind: CommitKind::Delivered }
    }

    pub fn dead_lettered(key: CommitKey, delivered_at: u64) -> Self {
        Self { key, delivered_at, kind: CommitKind::DeadLettered }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_produces_a_new_value() {
        let original = Event::new("src", 3, "http://example.com").with_last_attempt_at(10);
        let next = original.escalated(500);

        assert_eq!(original.retry_count, 0);
        assert_eq!(original.last_attempt_at, 10);
        assert_eq!(next.retry_count, 1);
        assert_eq!(next.last_attempt_at, 500);
        assert_eq!(next.commit_key(), original.commit_key());
    }

    #[test]
    fn first_sequence_has_no_predecessor() {
        assert!(Event::new("a", 1, "u").predecessor_key().is_none());
        assert!(Event::new("a", 0, "u").predecessor_key().is_none());
        assert_eq!(
            Event::new("a", 7, "u").predecessor_key(),
            Some(CommitKey::new("a", 6))
        );
    }

    #[test]
    fn wire_schema_uses_camel_case_names() {
        let event = Event::new("s-1", 2, "http://hook")
            .with_body(b"{}".to_vec())
            .with_header("X-Trace", "abc");
        let value = serde_json::to_value(&event).expect("serialize");

        for field in [
            "sourceId",
            "sequence",
            "url",
            "contentType",
            "requestBody",
            "additionalHeaders",
            "retryCount",
            "lastAttemptAt",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["sourceId"], "s-1");
    }

    #[test]
    fn tier_display_names() {
        assert_eq!(Tier::Forward.to_string(), "forward");
        assert_eq!(Tier::Retry(2).to_string(), "retry-2");
        assert_eq!(Tier::Last.to_string(), "last");
        assert_eq!(Tier::Dead.to_string(), "dead");
    }
}
