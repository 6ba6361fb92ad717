use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Tier;

/// Environment prefix for overrides, e.g. `WEBHOOK_DISPATCHER__MAX_RETRIES=4`.
pub const ENV_PREFIX: &str = "WEBHOOK_DISPATCHER";

/// Topic names per tier.
///
/// Retry tier `n` uses `"{retry_prefix}.{n}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicNames {
    pub forward: String,
    pub retry_prefix: String,
    pub last: String,
    pub dead: String,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            forward: "webhook.forward".to_string(),
            retry_prefix: "webhook.retry".to_string(),
            last: "webhook.retry.last".to_string(),
            dead: "webhook.dead".to_string(),
        }
    }
}

/// What happens to an event when its retry budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterPolicy {
    /// Write a dead-letter commit marker so later sequences of the same
    /// source are not blocked forever.
    pub synthesize_commit: bool,

    /// Publish the dropped event to the dead topic.
    pub publish_to_dead_topic: bool,
}

impl Default for DeadLetterPolicy {
    fn default() -> Self {
        Self {
            synthesize_commit: true,
            publish_to_dead_topic: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub topics: TopicNames,

    /// Backoff per intermediate retry tier, in order. The length decides
    /// how many `Retry(n)` tiers exist.
    pub retry_backoff_ms: Vec<u64>,

    /// Backoff of the terminal tier.
    pub last_backoff_ms: u64,

    /// Escalations allowed before an event is dropped.
    pub max_retries: u32,

    /// Partitions per topic; one worker runs per tier and partition.
    pub partitions: usize,

    /// Socket timeout of one delivery attempt.
    pub http_timeout_ms: u64,

    /// Upper bound of random jitter added to delayed redelivery pauses.
    pub redelivery_jitter_ms: u64,

    /// Pause before a record is presented again after a failed queue action.
    pub transport_retry_pause_ms: u64,

    /// Route forward-tier postponements to the first retry tier instead of
    /// back onto the forward topic.
    pub postpone_forward_to_first_retry: bool,

    /// Idle time after a postponed event is requeued onto the worker's own
    /// topic, before the next record is pulled.
    pub postpone_pause_ms: u64,

    pub dead_letter: DeadLetterPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            topics: TopicNames::default(),
            retry_backoff_ms: vec![60_000, 300_000, 1_800_000],
            last_backoff_ms: 3_600_000,
            max_retries: 10,
            partitions: 4,
            http_timeout_ms: 10_000,
            redelivery_jitter_ms: 0,
            transport_retry_pause_ms: 1_000,
            postpone_forward_to_first_retry: true,
            postpone_pause_ms: 1_000,
            dead_letter: DeadLetterPolicy::default(),
        }
    }
}

/// Everything a worker needs to know about its own tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSettings {
    pub tier: Tier,
    pub topic: String,
    /// `None` on the forward tier, which never waits.
    pub backoff: Option<Duration>,
    /// Tier whose topic receives postponed events.
    pub postpone_to: Tier,
    /// Idle time after a postponement; zero unless `postpone_to` is this tier.
    pub postpone_pause: Duration,
    /// Tier whose topic receives escalated events.
    pub escalate_to: Tier,
}

impl DispatcherConfig {
    /// Load from a file (any format the `config` crate detects by
    /// extension), then apply `WEBHOOK_DISPATCHER__*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let loaded: DispatcherConfig = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("retry_backoff_ms"),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 {
            return Err(ConfigError::Invalid("partitions must be at least 1".into()));
        }
        if self.http_timeout_ms == 0 {
            return Err(ConfigError::Invalid("http_timeout_ms must be positive".into()));
        }
        if self.retry_backoff_ms.len() > u8::MAX as usize {
            return Err(ConfigError::Invalid("too many retry tiers".into()));
        }
        if self.retry_backoff_ms.windows(2).any(|w| w[1] < w[0]) {
            return Err(ConfigError::Invalid("retry backoffs must not decrease".into()));
        }
        if let Some(&last_retry) = self.retry_backoff_ms.last() {
            if self.last_backoff_ms < last_retry {
                return Err(ConfigError::Invalid(
                    "last tier backoff must be at least the last retry backoff".into(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for tier in self.all_tiers() {
            let topic = self.topic(tier);
            if topic.is_empty() {
                return Err(ConfigError::Invalid(format!("empty topic name for tier {}", tier)));
            }
            if !seen.insert(topic.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate topic name {}", topic)));
            }
        }
        Ok(())
    }

    pub fn retry_tier_count(&self) -> u8 {
        self.retry_backoff_ms.len().min(u8::MAX as usize) as u8
    }

    /// Tiers that have workers: forward, every retry tier, last.
    pub fn consumed_tiers(&self) -> Vec<Tier> {
        let mut tiers = vec![Tier::Forward];
        tiers.extend((1..=self.retry_tier_count()).map(Tier::Retry));
        tiers.push(Tier::Last);
        tiers
    }

    pub fn all_tiers(&self) -> Vec<Tier> {
        let mut tiers = self.consumed_tiers();
        tiers.push(Tier::Dead);
        tiers
    }

    pub fn topic(&self, tier: Tier) -> String {
        match tier {
            Tier::Forward => self.topics.forward.clone(),
            Tier::Retry(n) => format!("{}.{}", self.topics.retry_prefix, n),
            Tier::Last => self.topics.last.clone(),
            Tier::Dead => self.topics.dead.clone(),
        }
    }

    /// Where a failed attempt on `tier` goes next. The terminal tier feeds
    /// itself; the retry budget ends the loop.
    pub fn next_tier(&self, tier: Tier) -> Tier {
        match tier {
            Tier::Forward if self.retry_tier_count() > 0 => Tier::Retry(1),
            Tier::Forward => Tier::Last,
            Tier::Retry(n) if n < self.retry_tier_count() => Tier::Retry(n + 1),
            Tier::Retry(_) | Tier::Last => Tier::Last,
            Tier::Dead => Tier::Dead,
        }
    }

    pub fn backoff(&self, tier: Tier) -> Option<Duration> {
        match tier {
            Tier::Forward | Tier::Dead => None,
            Tier::Retry(n) => self
                .retry_backoff_ms
                .get(usize::from(n).saturating_sub(1))
                .map(|ms| Duration::from_millis(*ms)),
            Tier::Last => Some(Duration::from_millis(self.last_backoff_ms)),
        }
    }

    pub fn postpone_tier(&self, tier: Tier) -> Tier {
        if tier.is_forward() && self.postpone_forward_to_first_retry {
            self.next_tier(Tier::Forward)
        } else {
            tier
        }
    }

    pub fn tier_settings(&self, tier: Tier) -> TierSettings {
        let postpone_to = self.postpone_tier(tier);
        let postpone_pause = if postpone_to == tier {
            self.postpone_pause()
        } else {
            Duration::ZERO
        };
        TierSettings {
            tier,
            topic: self.topic(tier),
            backoff: self.backoff(tier),
            postpone_to,
            postpone_pause,
            escalate_to: self.next_tier(tier),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn transport_retry_pause(&self) -> Duration {
        Duration::from_millis(self.transport_retry_pause_ms)
    }

    pub fn postpone_pause(&self) -> Duration {
        Duration::from_millis(self.postpone_pause_ms)
    }
}
