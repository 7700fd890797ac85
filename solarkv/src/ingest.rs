//! Reading ingestion.
//!
//! [`ReadingIngest::add`] fans one reading out to every structure that
//! tracks it: the metric buckets, the capacity leaderboard, both activity
//! logs, and the site's daily stats. All writes go out in a single batch,
//! so a reading is either recorded everywhere or nowhere.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use solarkv::{Config, Connection, MemoryStore, MeterReading, ReadingIngest};
//!
//! # async fn run() -> solarkv::Result<()> {
//! let config = Config::default();
//! let conn = Connection::new(Arc::new(MemoryStore::new()), &config)?;
//! let ingest = ReadingIngest::new(conn, &config);
//!
//! ingest
//!     .add(&MeterReading {
//!         site_id: 1,
//!         wh_used: 0.4,
//!         wh_generated: 1.1,
//!         temp_c: 21.0,
//!         timestamp: Utc::now(),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::batch::Batch;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;
use crate::feed::RecentLog;
use crate::kv::Connection;
use crate::leaderboard::Leaderboard;
use crate::metric::MetricStore;
use crate::reading::MeterReading;
use crate::stats::SiteStatsStore;

/// Writes readings to every tracking structure in one atomic batch.
#[derive(Debug, Clone)]
pub struct ReadingIngest {
    conn: Connection,
    metrics: MetricStore,
    leaderboard: Leaderboard,
    feed: RecentLog,
    stats: SiteStatsStore,
}

impl ReadingIngest {
    /// Builds the component set over one shared connection.
    pub fn new(conn: Connection, config: &Config) -> Self {
        Self {
            metrics: MetricStore::new(conn.clone(), config),
            leaderboard: Leaderboard::new(conn.clone()),
            feed: RecentLog::new(conn.clone(), config),
            stats: SiteStatsStore::new(conn.clone(), config),
            conn,
        }
    }

    /// Replaces the clock used for stats reporting times.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.stats = self.stats.with_clock(clock);
        self
    }

    /// The metric store writes go to.
    pub fn metrics(&self) -> &MetricStore {
        &self.metrics
    }

    /// The capacity leaderboard writes go to.
    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    /// The activity logs writes go to.
    pub fn feed(&self) -> &RecentLog {
        &self.feed
    }

    /// The daily stats writes go to.
    pub fn stats(&self) -> &SiteStatsStore {
        &self.stats
    }

    /// Queues every write for `reading` onto `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidRequest`] if the reading has non-finite
    /// values; nothing is queued in that case.
    pub fn stage(&self, batch: &mut Batch, reading: &MeterReading) -> Result<()> {
        reading.validate()?;
        self.metrics.stage_insert(batch, reading)?;
        self.leaderboard
            .stage_update(batch, reading.site_id, reading.current_capacity())?;
        self.feed.stage_append(batch, reading)?;
        self.stats.stage_update(batch, reading)?;
        Ok(())
    }

    /// Records one reading everywhere.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidRequest`] for a non-finite reading, or a
    /// store error; on error nothing is written.
    #[instrument(skip(self, reading), fields(site_id = reading.site_id))]
    pub async fn add(&self, reading: &MeterReading) -> Result<()> {
        let mut batch = Batch::new();
        self.stage(&mut batch, reading)?;
        let commands = batch.len();
        self.conn.execute(batch).await?;
        debug!(commands, "ingested reading");
        Ok(())
    }

    /// Records a group of readings in one batch.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidRequest`] if any reading is non-finite,
    /// or a store error; on error none of the readings is written.
    #[instrument(skip_all, fields(readings = readings.len()))]
    pub async fn add_many(&self, readings: &[MeterReading]) -> Result<()> {
        let mut batch = Batch::new();
        for reading in readings {
            self.stage(&mut batch, reading)?;
        }
        let commands = batch.len();
        self.conn.execute(batch).await?;
        debug!(commands, "ingested readings");
        Ok(())
    }
}
