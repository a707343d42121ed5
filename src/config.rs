//! Configuration for cache coordination
//!
//! Two immutable structs are passed explicitly at construction:
//! - [`CacheProperties`]: key prefix policy, null caching and default TTL
//! - [`CoordinatorConfig`]: polling, wait bounds and the double-delete delay

use crate::error::{CacheError, Result};
use crate::key::duration::parse_duration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable toggling the global key prefix
pub const ENV_USE_KEY_PREFIX: &str = "CACHE_USE_KEY_PREFIX";
/// Environment variable holding the global key prefix
pub const ENV_KEY_PREFIX: &str = "CACHE_KEY_PREFIX";
/// Environment variable toggling storage of null results
pub const ENV_CACHE_NULL_VALUES: &str = "CACHE_NULL_VALUES";
/// Environment variable holding the default TTL as an ISO-8601 duration
pub const ENV_TIME_TO_LIVE: &str = "CACHE_TIME_TO_LIVE";

/// Cache-wide properties shared by key resolution and loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheProperties {
    /// Prepend `key_prefix` to every resolved key
    pub use_key_prefix: bool,

    /// Global key prefix, only used when `use_key_prefix` is set
    pub key_prefix: Option<String>,

    /// Store computed `null` results instead of skipping them
    pub cache_null_values: bool,

    /// TTL applied when the cache name carries no `#` suffix
    pub time_to_live: Option<Duration>,
}

impl Default for CacheProperties {
    fn default() -> Self {
        Self {
            use_key_prefix: false,
            key_prefix: None,
            cache_null_values: true,
            time_to_live: None,
        }
    }
}

impl CacheProperties {
    pub fn builder() -> CachePropertiesBuilder {
        CachePropertiesBuilder::default()
    }

    /// Load properties from the process environment (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build properties from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let use_key_prefix = match lookup(ENV_USE_KEY_PREFIX) {
            Some(raw) => parse_bool(ENV_USE_KEY_PREFIX, &raw)?,
            None => defaults.use_key_prefix,
        };
        let cache_null_values = match lookup(ENV_CACHE_NULL_VALUES) {
            Some(raw) => parse_bool(ENV_CACHE_NULL_VALUES, &raw)?,
            None => defaults.cache_null_values,
        };
        let time_to_live = match lookup(ENV_TIME_TO_LIVE) {
            Some(raw) if !raw.trim().is_empty() => Some(parse_duration(&raw)?),
            _ => defaults.time_to_live,
        };
        let key_prefix = lookup(ENV_KEY_PREFIX).filter(|p| !p.is_empty());

        Ok(Self {
            use_key_prefix,
            key_prefix,
            cache_null_values,
            time_to_live,
        })
    }

    /// Prefix a key according to the global prefix policy
    pub fn apply_prefix(&self, key: &str) -> String {
        match (&self.key_prefix, self.use_key_prefix) {
            (Some(prefix), true) => format!("{}{}", prefix, key),
            _ => key.to_string(),
        }
    }

    /// Effective TTL: an explicit one wins over the default
    pub fn effective_ttl(&self, explicit: Option<Duration>) -> Option<Duration> {
        explicit.or(self.time_to_live)
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(CacheError::InvalidConfiguration(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

/// Builder for [`CacheProperties`]
#[derive(Debug, Default)]
pub struct CachePropertiesBuilder {
    use_key_prefix: Option<bool>,
    key_prefix: Option<String>,
    cache_null_values: Option<bool>,
    time_to_live: Option<Duration>,
}

impl CachePropertiesBuilder {
    pub fn use_key_prefix(mut self, enable: bool) -> Self {
        self.use_key_prefix = Some(enable);
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn cache_null_values(mut self, enable: bool) -> Self {
        self.cache_null_values = Some(enable);
        self
    }

    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    pub fn build(self) -> CacheProperties {
        let defaults = CacheProperties::default();

        CacheProperties {
            use_key_prefix: self.use_key_prefix.unwrap_or(defaults.use_key_prefix),
            key_prefix: self.key_prefix.or(defaults.key_prefix),
            cache_null_values: self
                .cache_null_values
                .unwrap_or(defaults.cache_null_values),
            time_to_live: self.time_to_live.or(defaults.time_to_live),
        }
    }
}

/// Timing behaviour of the coordination protocols
///
/// Defaults: 500ms polling with no upper
/// bound on waiting, and a one second delay before the second deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Sleep between attempts while a lock is busy
    pub poll_interval: Duration,

    /// Jitter factor (0.0 - 1.0) applied to `poll_interval`
    /// Keeps blocked waiters from retrying in lockstep
    pub poll_jitter: f64,

    /// Upper bound on any lock wait; `None` waits until granted
    pub max_wait: Option<Duration>,

    /// Delay before the second deletion of a double delete
    pub double_delete_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            poll_jitter: 0.0,
            max_wait: None,
            double_delete_delay: Duration::from_secs(1),
        }
    }
}

impl CoordinatorConfig {
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(CacheError::InvalidConfiguration(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.poll_jitter) {
            return Err(CacheError::InvalidConfiguration(
                "poll_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if matches!(self.max_wait, Some(wait) if wait.is_zero()) {
            return Err(CacheError::InvalidConfiguration(
                "max_wait must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Next polling delay with jitter applied
    pub fn poll_delay(&self) -> Duration {
        if self.poll_jitter == 0.0 {
            return self.poll_interval;
        }

        let base = self.poll_interval.as_secs_f64();
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * base * self.poll_jitter;
        Duration::try_from_secs_f64((base + jitter).max(0.001)).unwrap_or(self.poll_interval)
    }

    /// Short polling with a bounded wait, for latency-sensitive callers
    pub fn responsive() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            poll_jitter: 0.2,
            max_wait: Some(Duration::from_secs(30)),
            ..Default::default()
        }
    }

    /// Millisecond timings for tests
    pub fn testing() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            poll_jitter: 0.0,
            max_wait: Some(Duration::from_secs(10)),
            double_delete_delay: Duration::from_millis(100),
        }
    }
}

/// Builder for [`CoordinatorConfig`]
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    poll_interval: Option<Duration>,
    poll_jitter: Option<f64>,
    max_wait: Option<Duration>,
    double_delete_delay: Option<Duration>,
}

impl CoordinatorConfigBuilder {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn poll_jitter(mut self, jitter: f64) -> Self {
        self.poll_jitter = Some(jitter);
        self
    }

    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = Some(wait);
        self
    }

    pub fn double_delete_delay(mut self, delay: Duration) -> Self {
        self.double_delete_delay = Some(delay);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CoordinatorConfig> {
        let defaults = CoordinatorConfig::default();

        let config = CoordinatorConfig {
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            poll_jitter: self.poll_jitter.unwrap_or(defaults.poll_jitter),
            max_wait: self.max_wait.or(defaults.max_wait),
            double_delete_delay: self
                .double_delete_delay
                .unwrap_or(defaults.double_delete_delay),
        };
        config.validate()?;
        Ok(config)
    }
}
