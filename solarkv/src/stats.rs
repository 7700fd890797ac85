//! Per-site daily statistics.
//!
//! One hash per (site, UTC day) tracks when the site last reported, how many
//! readings it sent, and running extremes. The extremes are maintained with
//! [`Command::HSetIfCompare`], which the store evaluates atomically, so
//! concurrent updates never lose a new maximum or minimum.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::{Batch, Command, Comparison};
use crate::clock::{self, Clock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::kv::Connection;
use crate::reading::{MeterReading, SiteId};

const LAST_REPORTING_TIME: &str = "last_reporting_time";
const METER_READING_COUNT: &str = "meter_reading_count";
const MAX_WH_GENERATED: &str = "max_wh_generated";
const MIN_WH_GENERATED: &str = "min_wh_generated";
const MAX_CAPACITY: &str = "max_capacity";

/// Aggregates for one site over one UTC day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteStats {
    /// When the most recent update was processed.
    pub last_reporting_time: Option<DateTime<Utc>>,
    /// Number of readings received.
    pub meter_reading_count: u64,
    /// Largest generated energy seen.
    pub max_wh_generated: f64,
    /// Smallest generated energy seen.
    pub min_wh_generated: f64,
    /// Largest capacity seen.
    pub max_capacity: f64,
}

impl SiteStats {
    /// Decodes a stored hash. Unparsable fields take their default value.
    fn from_hash(hash: &HashMap<String, String>) -> Self {
        fn field<T: FromStr + Default>(hash: &HashMap<String, String>, name: &str) -> T {
            hash.get(name)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or_default()
        }

        Self {
            last_reporting_time: hash
                .get(LAST_REPORTING_TIME)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|t| t.with_timezone(&Utc)),
            meter_reading_count: field(hash, METER_READING_COUNT),
            max_wh_generated: field(hash, MAX_WH_GENERATED),
            min_wh_generated: field(hash, MIN_WH_GENERATED),
            max_capacity: field(hash, MAX_CAPACITY),
        }
    }
}

/// Maintains [`SiteStats`] in the store.
#[derive(Debug, Clone)]
pub struct SiteStatsStore {
    conn: Connection,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SiteStatsStore {
    /// Creates a stats store with the expiry from `config`.
    pub fn new(conn: Connection, config: &Config) -> Self {
        Self {
            conn,
            clock: clock::system(),
            ttl: config.stats.ttl,
        }
    }

    /// Replaces the clock used for `last_reporting_time`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Queues the stats update for `reading` onto `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the reading has non-finite values.
    pub fn stage_update(&self, batch: &mut Batch, reading: &MeterReading) -> Result<()> {
        reading.validate()?;
        let key = self
            .conn
            .keys()
            .site_stats(reading.site_id, reading.timestamp.date_naive());
        let reported = self
            .clock
            .now()
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        batch.push(Command::HSet {
            key: key.clone(),
            fields: vec![(LAST_REPORTING_TIME.to_string(), reported)],
        });
        batch.push(Command::HIncrBy {
            key: key.clone(),
            field: METER_READING_COUNT.to_string(),
            delta: 1,
        });
        batch.expire(key.clone(), self.ttl);

        for (field, value, cmp) in [
            (MAX_WH_GENERATED, reading.wh_generated, Comparison::Greater),
            (MIN_WH_GENERATED, reading.wh_generated, Comparison::Less),
            (MAX_CAPACITY, reading.current_capacity(), Comparison::Greater),
        ] {
            batch.push(Command::HSetIfCompare {
                key: key.clone(),
                field: field.to_string(),
                value,
                cmp,
            });
        }
        Ok(())
    }

    /// Folds `reading` into its site's stats for the reading's UTC day.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for a non-finite reading, or a store error.
    pub async fn update(&self, reading: &MeterReading) -> Result<()> {
        let mut batch = Batch::new();
        self.stage_update(&mut batch, reading)?;
        self.conn.execute(batch).await?;
        Ok(())
    }

    /// Reads the stats of `site_id` for `day`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the site reported nothing that day, or a
    /// store error.
    pub async fn find(&self, site_id: SiteId, day: NaiveDate) -> Result<SiteStats> {
        let mut batch = Batch::new();
        let slot = batch.push(Command::HGetAll {
            key: self.conn.keys().site_stats(site_id, day),
        });
        let hash = self.conn.execute(batch).await?.take_hash(slot)?;
        if hash.is_empty() {
            return Err(Error::not_found(format!("stats for site {site_id} on {day}")));
        }
        Ok(SiteStats::from_hash(&hash))
    }
}
