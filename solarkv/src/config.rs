//! Runtime configuration.
//!
//! A [`Config`] carries the key prefix, the per-batch store timeout, and the
//! retention and capping constants of each component. Defaults match the
//! production deployment; every field can be overridden from a JSON file or
//! from `SOLARKV_*` environment variables.
//!
//! # Example
//!
//! ```rust,no_run
//! use solarkv::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_json_file("solarkv.json")?;
//! assert!(config.feed.global_max_len >= config.feed.site_max_len);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::MINUTES_PER_DAY;
use crate::error::ConfigError;
use crate::keys::DEFAULT_KEY_PREFIX;

/// Environment variable overriding [`Config::key_prefix`].
pub const ENV_KEY_PREFIX: &str = "SOLARKV_KEY_PREFIX";
/// Environment variable overriding [`Config::op_timeout`], in milliseconds. `0` disables it.
pub const ENV_OP_TIMEOUT_MS: &str = "SOLARKV_OP_TIMEOUT_MS";
/// Environment variable overriding [`FeedConfig::global_max_len`].
pub const ENV_GLOBAL_FEED_MAX: &str = "SOLARKV_GLOBAL_FEED_MAX";
/// Environment variable overriding [`FeedConfig::site_max_len`].
pub const ENV_SITE_FEED_MAX: &str = "SOLARKV_SITE_FEED_MAX";

/// Top-level configuration shared by every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix prepended to every key.
    pub key_prefix: String,

    /// Upper bound on a single batch round trip. `None` waits indefinitely.
    #[serde(with = "option_duration_serde")]
    pub op_timeout: Option<Duration>,

    /// Day-bucketed metric settings.
    pub metrics: MetricConfig,

    /// Recent-activity log settings.
    pub feed: FeedConfig,

    /// Per-site daily statistics settings.
    pub stats: StatsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            op_timeout: Some(Duration::from_secs(5)),
            metrics: MetricConfig::default(),
            feed: FeedConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

/// Settings for the day-bucketed metric store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Days a bucket lives after its last write.
    pub retention_days: u32,
    /// Furthest back, in days, a range query walks.
    pub max_days_to_return: u32,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            max_days_to_return: 7,
        }
    }
}

impl MetricConfig {
    /// Expiry applied to a bucket on every write: the retention plus one second.
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 86_400 + 1)
    }

    /// Largest `limit` a range query accepts: one sample per minute for the
    /// whole retention period.
    pub fn max_samples(&self) -> usize {
        MINUTES_PER_DAY as usize * self.retention_days as usize
    }
}

/// Settings for the capped recent-activity logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Approximate cap of the all-sites log.
    pub global_max_len: usize,
    /// Approximate cap of each per-site log.
    pub site_max_len: usize,
    /// Number of records returned when a caller asks for none in particular.
    pub default_limit: usize,
    /// Largest number of records a caller may ask for.
    pub max_limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            global_max_len: 10_000,
            site_max_len: 2_440,
            default_limit: 100,
            max_limit: 1_000,
        }
    }
}

impl FeedConfig {
    /// Normalizes a caller-supplied record count.
    ///
    /// `0` means "unspecified" and yields [`FeedConfig::default_limit`];
    /// anything above [`FeedConfig::max_limit`] is capped.
    pub fn clamp_limit(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_limit
        } else {
            requested.min(self.max_limit)
        }
    }
}

/// Settings for per-site daily statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// How long a day's statistics live after their last update.
    #[serde(with = "duration_serde")]
    pub ttl: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(7 * 86_400),
        }
    }
}

impl Config {
    /// Loads and validates a JSON config file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] if the file
    /// cannot be loaded, or [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a config from defaults overridden by `SOLARKV_*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] if a variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_vars(std::env::vars())
    }

    /// Same as [`Config::from_env`] over an explicit set of variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] if a variable does not parse, or
    /// [`ConfigError::Invalid`] if the result fails validation.
    pub fn from_env_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let value = value.into();
            match key.as_ref() {
                ENV_KEY_PREFIX => config.key_prefix = value,
                ENV_OP_TIMEOUT_MS => {
                    let ms: u64 = parse_env(ENV_OP_TIMEOUT_MS, &value)?;
                    config.op_timeout = (ms > 0).then(|| Duration::from_millis(ms));
                }
                ENV_GLOBAL_FEED_MAX => {
                    config.feed.global_max_len = parse_env(ENV_GLOBAL_FEED_MAX, &value)?;
                }
                ENV_SITE_FEED_MAX => {
                    config.feed.site_max_len = parse_env(ENV_SITE_FEED_MAX, &value)?;
                }
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Validates every setting.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                reason: reason.to_string(),
            })
        };

        if self.key_prefix.is_empty() || self.key_prefix.contains(':') {
            return invalid("key_prefix must be non-empty and free of ':'");
        }
        if self.op_timeout.is_some_and(|t| t.is_zero()) {
            return invalid("op_timeout must be positive when set");
        }
        if self.metrics.retention_days == 0 {
            return invalid("metrics.retention_days must be at least 1");
        }
        if self.metrics.max_days_to_return == 0
            || self.metrics.max_days_to_return > self.metrics.retention_days
        {
            return invalid("metrics.max_days_to_return must be within 1..=retention_days");
        }
        if self.feed.global_max_len == 0 || self.feed.site_max_len == 0 {
            return invalid("feed caps must be at least 1");
        }
        if self.feed.default_limit == 0 || self.feed.default_limit > self.feed.max_limit {
            return invalid("feed.default_limit must be within 1..=max_limit");
        }
        if self.stats.ttl.is_zero() {
            return invalid("stats.ttl must be positive");
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}

/// Durations are stored as (possibly fractional) seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

mod option_duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
