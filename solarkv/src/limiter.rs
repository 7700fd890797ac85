//! Rate limiting backed by the shared store.
//!
//! Two algorithms share the [`RateLimiter`] trait:
//!
//! - [`FixedWindowRateLimiter`] counts hits per block of `interval_minutes`
//!   minutes within the UTC day. Cheap, but up to `2 × max_hits` hits can
//!   pass around a block boundary.
//! - [`SlidingWindowRateLimiter`] records one marker per hit in a sorted set
//!   scored by time and counts the markers inside the trailing window.
//!
//! Both count every hit, rejected ones included, so a client hammering a
//! limiter keeps itself limited.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use solarkv::{Config, Connection, MemoryStore, RateLimiter, SlidingWindowRateLimiter};
//!
//! # async fn run() -> solarkv::Result<()> {
//! let conn = Connection::new(Arc::new(MemoryStore::new()), &Config::default())?;
//! let limiter = SlidingWindowRateLimiter::new(conn, 10_000, 10)?;
//! match limiter.hit("ingest").await {
//!     Ok(()) => { /* admitted */ }
//!     Err(e) if e.is_rate_limited() => { /* reply 429 */ }
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::batch::Batch;
use crate::clock::{self, Clock, MINUTES_PER_DAY};
use crate::error::{Error, Result};
use crate::kv::Connection;

/// Admission control keyed by a caller-chosen name.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records one hit against `name` and decides whether it is admitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimitExceeded`] if the hit is over the limit,
    /// or a store error.
    async fn hit(&self, name: &str) -> Result<()>;
}

fn check_verdict(name: &str, count: i64, max_hits: u64) -> Result<()> {
    let hits = u64::try_from(count).unwrap_or(0);
    if hits > max_hits {
        debug!(limiter = name, hits, max_hits, "rate limit exceeded");
        return Err(Error::RateLimitExceeded {
            name: name.to_string(),
            hits,
            max_hits,
        });
    }
    Ok(())
}

/// Fixed-window limiter: at most `max_hits` hits per block of minutes.
#[derive(Debug, Clone)]
pub struct FixedWindowRateLimiter {
    conn: Connection,
    clock: Arc<dyn Clock>,
    interval_minutes: u32,
    max_hits: u64,
}

impl FixedWindowRateLimiter {
    /// Creates a limiter admitting `max_hits` hits per `interval_minutes`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] unless `interval_minutes` is within
    /// `1..=1440` and `max_hits` is at least 1.
    pub fn new(conn: Connection, interval_minutes: u32, max_hits: u64) -> Result<Self> {
        if !(1..=MINUTES_PER_DAY).contains(&interval_minutes) {
            return Err(Error::invalid(format!(
                "interval_minutes must be within 1..={MINUTES_PER_DAY}, got {interval_minutes}"
            )));
        }
        if max_hits == 0 {
            return Err(Error::invalid("max_hits must be at least 1"));
        }
        Ok(Self {
            conn,
            clock: clock::system(),
            interval_minutes,
            max_hits,
        })
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Length of one block in minutes.
    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    /// Hits admitted per block.
    pub fn max_hits(&self) -> u64 {
        self.max_hits
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn hit(&self, name: &str) -> Result<()> {
        let block = clock::minute_of_day(self.clock.now()) / self.interval_minutes;
        let key = self
            .conn
            .keys()
            .fixed_limiter(name, self.interval_minutes, block, self.max_hits);

        let mut batch = Batch::new();
        let count = batch.incr(key.clone());
        batch.expire(key, Duration::from_secs(u64::from(self.interval_minutes) * 60));
        let replies = self.conn.execute(batch).await?;

        check_verdict(name, replies.integer(count)?, self.max_hits)
    }
}

/// Sliding-window limiter: at most `max_hits` hits in any trailing window.
#[derive(Debug, Clone)]
pub struct SlidingWindowRateLimiter {
    conn: Connection,
    clock: Arc<dyn Clock>,
    window_ms: u64,
    max_hits: u64,
}

impl SlidingWindowRateLimiter {
    /// Creates a limiter admitting `max_hits` hits per `window_ms` milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if either argument is zero.
    pub fn new(conn: Connection, window_ms: u64, max_hits: u64) -> Result<Self> {
        if window_ms == 0 {
            return Err(Error::invalid("window_ms must be at least 1"));
        }
        if max_hits == 0 {
            return Err(Error::invalid("max_hits must be at least 1"));
        }
        Ok(Self {
            conn,
            clock: clock::system(),
            window_ms,
            max_hits,
        })
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Hits admitted per window.
    pub fn max_hits(&self) -> u64 {
        self.max_hits
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    #[allow(clippy::cast_precision_loss)] // epoch millis are exact in f64 until year 287396
    async fn hit(&self, name: &str) -> Result<()> {
        let key = self
            .conn
            .keys()
            .sliding_limiter(name, self.window_ms, self.max_hits);
        let now_ms = self.clock.now().timestamp_millis();
        let window_start = now_ms.saturating_sub(i64::try_from(self.window_ms).unwrap_or(i64::MAX));

        let mut batch = Batch::new();
        batch.zadd(
            key.clone(),
            now_ms as f64,
            format!("{now_ms}-{:016x}", rand::random::<u64>()),
        );
        batch.zrem_range_by_score(
            key.clone(),
            Bound::Unbounded,
            Bound::Excluded(window_start as f64),
        );
        let count = batch.zcard(key.clone());
        batch.expire(key, Duration::from_millis(self.window_ms));
        let replies = self.conn.execute(batch).await?;

        check_verdict(name, replies.integer(count)?, self.max_hits)
    }
}
