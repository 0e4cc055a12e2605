use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{AllocError, AllocResult};
use crate::strategy::Strategy;

/// Retry behaviour for optimistic allocation.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use tally_alloc::RetryConfig;
///
/// let config = RetryConfig::default()
///     .with_max_retries(50)
///     .with_deadline(Duration::from_secs(2));
/// assert_eq!(config.deadline(), Some(Duration::from_secs(2)));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt. Ignored when `unbounded`.
    pub max_retries: u32,
    /// Retry until success or until the deadline passes.
    pub unbounded: bool,
    /// Delay before the first retry; doubles for each further retry.
    pub base_delay_ms: u64,
    /// Upper bound on the delay between retries.
    pub max_delay_ms: u64,
    /// Draw each delay uniformly from `[0, delay]`.
    pub jitter: bool,
    /// Wall-clock budget for the whole allocation, store round trips included.
    pub deadline_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            unbounded: false,
            base_delay_ms: 2,
            max_delay_ms: 100,
            jitter: true,
            deadline_ms: None,
        }
    }
}

impl RetryConfig {
    /// Create a RetryConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A single attempt: the first conflict is final.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Retry until success, bounded only by the deadline (if any).
    pub fn unbounded() -> Self {
        Self {
            unbounded: true,
            ..Default::default()
        }
    }

    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.unbounded = false;
        self
    }

    /// Set the base backoff delay.
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set the maximum backoff delay.
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Enable or disable backoff jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Bound the whole allocation by a wall-clock deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// The deadline as a duration.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Whether another retry is allowed after `retries` retries.
    pub fn allows_retry(&self, retries: u32) -> bool {
        self.unbounded || retries < self.max_retries
    }

    /// Exponential backoff delay before retry number `retry` (0-based),
    /// before jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.min(63);
        let delay_ms = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// The delay actually slept before retry number `retry`.
    pub(crate) fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
    }

    /// Check the configuration for contradictions.
    pub fn validate(&self) -> AllocResult<()> {
        if self.max_delay_ms < self.base_delay_ms {
            return Err(AllocError::Config(format!(
                "max_delay_ms ({}) is below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.deadline_ms == Some(0) {
            return Err(AllocError::Config("deadline_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Where the counter lives, how to claim from it, and how hard to try.
///
/// Every field except `table` has a default, so a TOML file may be as short
/// as `table = "orders"`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Table holding both the counter item and the records.
    pub table: String,
    /// Key of the counter item.
    #[serde(default = "default_counter_key")]
    pub counter_key: String,
    /// The table's key attribute.
    #[serde(default = "default_key_attribute")]
    pub key_attribute: String,
    /// The counter item's numeric attribute.
    #[serde(default = "default_count_attribute")]
    pub count_attribute: String,
    #[serde(default)]
    pub strategy: Strategy,
    /// Refuse to overwrite an existing record under a freshly claimed token.
    #[serde(default)]
    pub guard_collisions: bool,
    /// Read the counter with strong consistency. A stale read is safe (the
    /// swap fails and the loop re-reads) but costs an attempt.
    #[serde(default = "default_true")]
    pub consistent_reads: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_counter_key() -> String {
    "counter".to_string()
}

fn default_key_attribute() -> String {
    "pk".to_string()
}

fn default_count_attribute() -> String {
    "count_value".to_string()
}

fn default_true() -> bool {
    true
}

impl AllocatorConfig {
    /// Defaults for a counter in `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            counter_key: default_counter_key(),
            key_attribute: default_key_attribute(),
            count_attribute: default_count_attribute(),
            strategy: Strategy::default(),
            guard_collisions: false,
            consistent_reads: true,
            retry: RetryConfig::default(),
        }
    }

    /// Set the allocation strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the retry behaviour.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Guard record inserts against overwriting an existing item.
    pub fn with_guard_collisions(mut self, guard: bool) -> Self {
        self.guard_collisions = guard;
        self
    }

    /// Use a different key for the counter item.
    pub fn with_counter_key(mut self, key: impl Into<String>) -> Self {
        self.counter_key = key.into();
        self
    }

    /// Check the configuration for contradictions.
    pub fn validate(&self) -> AllocResult<()> {
        for (field, value) in [
            ("table", &self.table),
            ("counter_key", &self.counter_key),
            ("key_attribute", &self.key_attribute),
            ("count_attribute", &self.count_attribute),
        ] {
            if value.is_empty() {
                return Err(AllocError::Config(format!("{field} must not be empty")));
            }
        }
        if self.key_attribute == self.count_attribute {
            return Err(AllocError::Config(format!(
                "key_attribute and count_attribute are both {:?}",
                self.key_attribute
            )));
        }
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_config() {
        let c = RetryConfig::default();
        assert_eq!(c.max_retries, 10);
        assert!(!c.unbounded);
        assert!(c.jitter);
        assert!(c.deadline().is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let c = RetryConfig::default()
            .with_base_delay_ms(10)
            .with_max_delay_ms(50)
            .with_jitter(false);
        assert_eq!(c.backoff(0), Duration::from_millis(10));
        assert_eq!(c.backoff(1), Duration::from_millis(20));
        assert_eq!(c.backoff(2), Duration::from_millis(40));
        assert_eq!(c.backoff(3), Duration::from_millis(50));
        assert_eq!(c.backoff(200), Duration::from_millis(50));
        assert_eq!(c.delay_for(1), Duration::from_millis(20));
    }

    #[test]
    fn jittered_delay_stays_within_backoff() {
        let c = RetryConfig::default()
            .with_base_delay_ms(8)
            .with_max_delay_ms(64);
        for retry in 0..10 {
            assert!(c.delay_for(retry) <= c.backoff(retry));
        }
    }

    #[test]
    fn retry_allowance() {
        let c = RetryConfig::default().with_max_retries(2);
        assert!(c.allows_retry(0));
        assert!(c.allows_retry(1));
        assert!(!c.allows_retry(2));
        assert!(!RetryConfig::no_retry().allows_retry(0));
        assert!(RetryConfig::unbounded().allows_retry(u32::MAX));
    }

    #[test]
    fn invalid_retry_configs() {
        let inverted = RetryConfig::default()
            .with_base_delay_ms(100)
            .with_max_delay_ms(10);
        assert!(matches!(inverted.validate(), Err(AllocError::Config(_))));

        let zero_deadline = RetryConfig {
            deadline_ms: Some(0),
            ..Default::default()
        };
        assert!(zero_deadline.validate().is_err());
    }

    #[test]
    fn allocator_config_defaults_match_the_counter_layout() {
        let c = AllocatorConfig::new("orders");
        assert_eq!(c.counter_key, "counter");
        assert_eq!(c.key_attribute, "pk");
        assert_eq!(c.count_attribute, "count_value");
        assert_eq!(c.strategy, Strategy::AtomicAdd);
        assert!(c.consistent_reads);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn allocator_config_rejects_clashing_attributes() {
        let mut c = AllocatorConfig::new("orders");
        c.count_attribute = "pk".into();
        assert!(c.validate().is_err());

        let c = AllocatorConfig::new("");
        assert!(c.validate().is_err());
    }

    #[test]
    fn allocator_config_deserializes_with_defaults() {
        let c: AllocatorConfig = serde_json::from_str(
            r#"{"table":"orders","strategy":"cas-put","retry":{"max_retries":3}}"#,
        )
        .unwrap();
        assert_eq!(c.strategy, Strategy::CasPut);
        assert_eq!(c.retry.max_retries, 3);
        assert_eq!(c.retry.max_delay_ms, RetryConfig::default().max_delay_ms);
        assert_eq!(c.counter_key, "counter");
    }
}
