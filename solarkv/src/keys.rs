//! Key derivation for every stored collection.
//!
//! All keys are colon-separated and start with a configurable prefix, so
//! several deployments can share one store. Each derivation is a pure
//! function of its arguments: the same inputs always produce the same key,
//! and distinct inputs never collide.
//!
//! | Collection       | Key                                                        |
//! |------------------|------------------------------------------------------------|
//! | day metric       | `P:metric:<kind>:<YYYY-MM-DD>:<site>`                      |
//! | capacity ranking | `P:sites:capacity:ranking`                                 |
//! | global feed      | `P:sites:feed`                                             |
//! | site feed        | `P:sites:feed:<site>`                                      |
//! | site stats       | `P:sites:stats:<YYYY-MM-DD>:<site>`                        |
//! | fixed limiter    | `P:limiter:fixed:<name>:<interval>:<block>:<max_hits>`     |
//! | sliding limiter  | `P:limiter:sliding:<name>:<window_ms>:<max_hits>`          |

use chrono::NaiveDate;

use crate::reading::{MetricKind, SiteId};

/// Prefix used when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "solarkv";

/// Derives storage keys under a fixed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    prefix: String,
}

impl Default for KeySchema {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl KeySchema {
    /// Creates a schema whose keys all start with `prefix:`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Sorted set holding one site's samples of `kind` for one UTC day.
    pub fn day_metric(&self, site_id: SiteId, kind: MetricKind, day: NaiveDate) -> String {
        format!(
            "{}:metric:{kind}:{}:{site_id}",
            self.prefix,
            day.format("%Y-%m-%d")
        )
    }

    /// Sorted set ranking every site by current capacity.
    pub fn capacity_ranking(&self) -> String {
        format!("{}:sites:capacity:ranking", self.prefix)
    }

    /// Capped log of readings from all sites.
    pub fn global_feed(&self) -> String {
        format!("{}:sites:feed", self.prefix)
    }

    /// Capped log of readings from one site.
    pub fn site_feed(&self, site_id: SiteId) -> String {
        format!("{}:sites:feed:{site_id}", self.prefix)
    }

    /// Hash of one site's aggregate statistics for one UTC day.
    pub fn site_stats(&self, site_id: SiteId, day: NaiveDate) -> String {
        format!(
            "{}:sites:stats:{}:{site_id}",
            self.prefix,
            day.format("%Y-%m-%d")
        )
    }

    /// Counter for one fixed-window block.
    ///
    /// The name may contain any characters, `:` included: the numeric
    /// parameters always occupy the last three segments, so keys stay
    /// distinct when read from the right.
    pub fn fixed_limiter(
        &self,
        name: &str,
        interval_minutes: u32,
        block: u32,
        max_hits: u64,
    ) -> String {
        format!(
            "{}:limiter:fixed:{name}:{interval_minutes}:{block}:{max_hits}",
            self.prefix
        )
    }

    /// Ordered set of hit markers for one sliding-window limiter.
    pub fn sliding_limiter(&self, name: &str, window_ms: u64, max_hits: u64) -> String {
        format!(
            "{}:limiter:sliding:{name}:{window_ms}:{max_hits}",
            self.prefix
        )
    }
}
