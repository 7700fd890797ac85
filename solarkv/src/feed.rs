//! Capped recent-activity logs.
//!
//! Every reading is appended to two logs: one shared by all sites and one
//! per site. Both are trimmed approximately on append, so their length
//! hovers around the configured cap instead of matching it exactly.

use tracing::warn;

use crate::batch::{Batch, MaxLen};
use crate::config::{Config, FeedConfig};
use crate::error::Result;
use crate::kv::Connection;
use crate::reading::{MeterReading, SiteId};

/// Which log to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedScope {
    /// Readings from every site.
    Global,
    /// Readings from one site.
    Site(SiteId),
}

/// Append-only logs of recent readings.
#[derive(Debug, Clone)]
pub struct RecentLog {
    conn: Connection,
    config: FeedConfig,
}

impl RecentLog {
    /// Creates a log writer/reader with the caps from `config`.
    pub fn new(conn: Connection, config: &Config) -> Self {
        Self {
            conn,
            config: config.feed,
        }
    }

    /// The feed settings, including the limit bounds callers should clamp to.
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Queues appends of `reading` to its site log and the global log.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidRequest`] if the reading has non-finite values.
    pub fn stage_append(&self, batch: &mut Batch, reading: &MeterReading) -> Result<()> {
        reading.validate()?;
        let keys = self.conn.keys();
        let fields = reading.to_fields();
        batch.xadd(
            keys.site_feed(reading.site_id),
            fields.clone(),
            Some(MaxLen::approx(self.config.site_max_len)),
        );
        batch.xadd(
            keys.global_feed(),
            fields,
            Some(MaxLen::approx(self.config.global_max_len)),
        );
        Ok(())
    }

    /// Appends `reading` to both logs atomically.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidRequest`] for a non-finite reading, or a
    /// store error.
    pub async fn append(&self, reading: &MeterReading) -> Result<()> {
        let mut batch = Batch::new();
        self.stage_append(&mut batch, reading)?;
        self.conn.execute(batch).await?;
        Ok(())
    }

    /// Returns the newest `limit` readings of `scope`, oldest first.
    ///
    /// `limit` is used as given; see [`FeedConfig::clamp_limit`] for the
    /// bounds exposed to external callers. Records that fail to decode are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    pub async fn get_recent(&self, scope: FeedScope, limit: usize) -> Result<Vec<MeterReading>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let keys = self.conn.keys();
        let key = match scope {
            FeedScope::Global => keys.global_feed(),
            FeedScope::Site(site_id) => keys.site_feed(site_id),
        };

        let mut batch = Batch::new();
        let slot = batch.xrevrange(key, limit);
        let entries = self.conn.execute(batch).await?.take_entries(slot)?;

        let mut readings: Vec<MeterReading> = entries
            .iter()
            .filter_map(|entry| {
                let reading = MeterReading::from_fields(&entry.fields);
                if reading.is_none() {
                    warn!(?scope, id = %entry.id, "skipping malformed feed record");
                }
                reading
            })
            .collect();
        readings.reverse();
        Ok(readings)
    }
}
