//! # solarkv
//!
//! Telemetry data structures for solar-site meter readings, built on the
//! primitives of a remote key-value store.
//!
//! solarkv turns hash maps, score-ordered sets, counters, and capped logs
//! into the structures a monitoring service needs: rate limiters that gate
//! ingestion, day-bucketed per-minute metrics, a capacity leaderboard,
//! recent-activity feeds, and per-site daily statistics. Every multi-key
//! write is submitted as one atomic [`kv::Batch`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use solarkv::{
//!     Config, Connection, FeedScope, MemoryStore, MeterReading, MetricKind, RateLimiter,
//!     ReadingIngest, SlidingWindowRateLimiter,
//! };
//!
//! # async fn run() -> solarkv::Result<()> {
//! let config = Config::from_env()?;
//! let conn = Connection::new(Arc::new(MemoryStore::new()), &config)?;
//!
//! // Admit at most 10 readings per 10 seconds per site.
//! let limiter = SlidingWindowRateLimiter::new(conn.clone(), 10_000, 10)?;
//! let ingest = ReadingIngest::new(conn.clone(), &config);
//!
//! let reading = MeterReading {
//!     site_id: 42,
//!     wh_used: 0.3,
//!     wh_generated: 1.2,
//!     temp_c: 18.5,
//!     timestamp: Utc::now(),
//! };
//! limiter.hit("site-42").await?;
//! ingest.add(&reading).await?;
//!
//! let last_hour = ingest
//!     .metrics()
//!     .get_recent(42, MetricKind::WhGenerated, Utc::now(), 60)
//!     .await?;
//! let feed = ingest.feed().get_recent(FeedScope::Global, 100).await?;
//! let report = ingest.leaderboard().get_top_and_bottom(10).await?;
//!
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Connection`] - Shared store handle; owns the key schema and timeout
//! - [`RateLimiter`] - Fixed- and sliding-window admission control
//! - [`MetricStore`] - Per-minute samples bucketed by UTC day
//! - [`Leaderboard`] - Sites ranked by current capacity
//! - [`RecentLog`] - Capped global and per-site reading logs
//! - [`SiteStatsStore`] - Daily per-site aggregates
//! - [`ReadingIngest`] - Fans a reading out to all of the above in one batch
//!
//! ## Modules
//!
//! - [`kv`] - Store contract, command batches, connection
//! - [`memory`] - In-process store backend
//! - [`keys`] - Key derivation
//! - [`limiter`] - Rate limiters
//! - [`metric`] - Day-bucketed metrics
//! - [`leaderboard`] - Capacity ranking
//! - [`feed`] - Recent-activity logs
//! - [`stats`] - Daily site statistics
//! - [`ingest`] - Reading fan-out
//! - [`deadline`] - Request deadlines
//! - [`clock`] - Time source
//! - [`config`] - Configuration
//! - [`error`] - Error types

mod batch;

pub mod clock;
pub mod config;
pub mod deadline;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod keys;
pub mod kv;
pub mod leaderboard;
pub mod limiter;
pub mod memory;
pub mod metric;
pub mod reading;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, FeedConfig, MetricConfig, StatsConfig};
pub use error::{ConfigError, Error, Result, StoreError};
pub use feed::{FeedScope, RecentLog};
pub use ingest::ReadingIngest;
pub use keys::KeySchema;
pub use kv::{Connection, KeyValueStore};
pub use leaderboard::{CapacityReport, Leaderboard, SiteCapacity};
pub use limiter::{FixedWindowRateLimiter, RateLimiter, SlidingWindowRateLimiter};
pub use memory::{APPROX_TRIM_SLACK, MemoryStore};
pub use metric::MetricStore;
pub use reading::{MeterReading, MetricKind, Sample, SiteId};
pub use stats::{SiteStats, SiteStatsStore};
