//! Static configuration for the rate limiter.
//!
//! Everything is validated once, at construction; nothing here can fail per
//! request.

use std::time::Duration;

use crate::rate_limit::{BucketLimits, EvictionConfig, KeyStrategy, MissingKeyPolicy};
use crate::ConfigError;

/// Validated rate limiter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    limits: BucketLimits,
    key_strategy: KeyStrategy,
    missing_key: MissingKeyPolicy,
    eviction: Option<EvictionConfig>,
    retry_after_header: bool,
}

impl RateLimitConfig {
    /// Start building a config.
    ///
    /// # Examples
    /// ```
    /// use tollgate::{KeyStrategy, MissingKeyPolicy, RateLimitConfig};
    /// use std::time::Duration;
    ///
    /// let config = RateLimitConfig::builder()
    ///     .capacity(5.0)
    ///     .refill_rate(2.0)
    ///     .key_strategy(KeyStrategy::header("x-api-key").unwrap())
    ///     .missing_key(MissingKeyPolicy::FailClosed)
    ///     .evict_idle(Duration::from_secs(30), Duration::from_secs(60))
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.limits().capacity(), 5.0);
    /// ```
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::new()
    }

    /// Capacity and refill rate for every bucket.
    pub fn limits(&self) -> BucketLimits {
        self.limits
    }

    /// How client keys are derived from requests.
    pub fn key_strategy(&self) -> &KeyStrategy {
        &self.key_strategy
    }

    /// What happens to requests without a key.
    pub fn missing_key(&self) -> MissingKeyPolicy {
        self.missing_key
    }

    /// Background eviction settings, if eviction is enabled.
    pub fn eviction(&self) -> Option<EvictionConfig> {
        self.eviction
    }

    /// Whether rejections carry a `Retry-After` header.
    pub fn retry_after_header(&self) -> bool {
        self.retry_after_header
    }
}

/// Builder for [`RateLimitConfig`].
///
/// Defaults: capacity 5, refill 2 tokens/s, key on peer address, fail open,
/// no eviction, `Retry-After` enabled.
#[derive(Debug, Clone)]
pub struct RateLimitConfigBuilder {
    capacity: f64,
    refill_rate: f64,
    key_strategy: KeyStrategy,
    missing_key: MissingKeyPolicy,
    eviction: Option<(Duration, Duration)>,
    retry_after_header: bool,
}

impl RateLimitConfigBuilder {
    /// Builder with default settings.
    pub fn new() -> Self {
        Self {
            capacity: 5.0,
            refill_rate: 2.0,
            key_strategy: KeyStrategy::default(),
            missing_key: MissingKeyPolicy::default(),
            eviction: None,
            retry_after_header: true,
        }
    }

    /// Maximum tokens per bucket (burst size).
    pub fn capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Tokens added per second.
    pub fn refill_rate(mut self, refill_rate: f64) -> Self {
        self.refill_rate = refill_rate;
        self
    }

    /// How client keys are derived from requests.
    pub fn key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    /// What happens to requests without a key.
    pub fn missing_key(mut self, policy: MissingKeyPolicy) -> Self {
        self.missing_key = policy;
        self
    }

    /// Sweep every `interval`, removing buckets idle longer than `idle_threshold`.
    pub fn evict_idle(mut self, interval: Duration, idle_threshold: Duration) -> Self {
        self.eviction = Some((interval, idle_threshold));
        self
    }

    /// Whether rejections carry a `Retry-After` header.
    pub fn retry_after_header(mut self, enabled: bool) -> Self {
        self.retry_after_header = enabled;
        self
    }

    /// Validate and build the config.
    pub fn build(self) -> Result<RateLimitConfig, ConfigError> {
        let limits = BucketLimits::new(self.capacity, self.refill_rate)?;
        let eviction = self
            .eviction
            .map(|(interval, idle_threshold)| EvictionConfig::new(interval, idle_threshold))
            .transpose()?;
        Ok(RateLimitConfig {
            limits,
            key_strategy: self.key_strategy,
            missing_key: self.missing_key,
            eviction,
            retry_after_header: self.retry_after_header,
        })
    }
}

impl Default for RateLimitConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserializable form of [`RateLimitConfig`], e.g. for a config file section.
///
/// ```json
/// { "capacity": 5, "refill_rate": 2, "key": { "header": "x-api-key" },
///   "missing_key": "fail_closed", "eviction_interval_secs": 30, "idle_threshold_secs": 60 }
/// ```
#[cfg(feature = "serde")]
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    /// Maximum tokens per bucket.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Key extraction strategy.
    #[serde(default)]
    pub key: KeySetting,
    /// Missing-key policy.
    #[serde(default)]
    pub missing_key: MissingKeySetting,
    /// Seconds between eviction sweeps. Set both eviction fields or neither.
    #[serde(default)]
    pub eviction_interval_secs: Option<u64>,
    /// Idle seconds after which a bucket is evicted.
    #[serde(default)]
    pub idle_threshold_secs: Option<u64>,
    /// Whether rejections carry `Retry-After`.
    #[serde(default = "default_true")]
    pub retry_after_header: bool,
}

#[cfg(feature = "serde")]
fn default_true() -> bool {
    true
}

/// Serialized key strategy.
#[cfg(feature = "serde")]
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySetting {
    /// Source address.
    #[default]
    PeerAddr,
    /// Named header.
    Header(String),
    /// Authenticated principal.
    Principal,
}

/// Serialized missing-key policy.
#[cfg(feature = "serde")]
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeySetting {
    /// Forward unkeyed requests.
    #[default]
    FailOpen,
    /// Reject unkeyed requests.
    FailClosed,
}

#[cfg(feature = "serde")]
impl TryFrom<RateLimitSettings> for RateLimitConfig {
    type Error = ConfigError;

    fn try_from(settings: RateLimitSettings) -> Result<Self, Self::Error> {
        let key_strategy = match settings.key {
            KeySetting::PeerAddr => KeyStrategy::PeerAddr,
            KeySetting::Header(name) => KeyStrategy::header(&name)?,
            KeySetting::Principal => KeyStrategy::Principal,
        };
        let missing_key = match settings.missing_key {
            MissingKeySetting::FailOpen => MissingKeyPolicy::FailOpen,
            MissingKeySetting::FailClosed => MissingKeyPolicy::FailClosed,
        };
        let builder = RateLimitConfig::builder()
            .capacity(settings.capacity)
            .refill_rate(settings.refill_rate)
            .key_strategy(key_strategy)
            .missing_key(missing_key)
            .retry_after_header(settings.retry_after_header);
        let builder = match (settings.eviction_interval_secs, settings.idle_threshold_secs) {
            (Some(interval), Some(threshold)) => builder
                .evict_idle(Duration::from_secs(interval), Duration::from_secs(threshold)),
            (None, None) => builder,
            (Some(_), None) => {
                return Err(ConfigError::IncompleteEviction { missing: "idle_threshold_secs" })
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompleteEviction { missing: "eviction_interval_secs" })
            }
        };
        builder.build()
    }
}
