//! Day-bucketed metric storage.
//!
//! Each (site, metric kind, UTC day) gets its own sorted set. A sample is
//! stored as the member `"<value>:<minute_of_day>"` (value with two decimals)
//! scored by its minute of day, so the set is ordered in time and two
//! different values reported in the same minute are both kept.
//!
//! Buckets expire a fixed period after their last write. Range queries start
//! at a given day and walk backwards, a bucket at a time, until they have
//! collected enough samples or reached the look-back limit.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};

use crate::batch::{Batch, Order};
use crate::clock::{self, MINUTES_PER_DAY};
use crate::config::{Config, MetricConfig};
use crate::error::{Error, Result};
use crate::kv::Connection;
use crate::reading::{MeterReading, MetricKind, Sample, SiteId};

/// Stores and queries per-minute samples.
#[derive(Debug, Clone)]
pub struct MetricStore {
    conn: Connection,
    config: MetricConfig,
}

impl MetricStore {
    /// Creates a metric store using the retention settings of `config`.
    pub fn new(conn: Connection, config: &Config) -> Self {
        Self {
            conn,
            config: config.metrics,
        }
    }

    /// Queues the three samples of `reading` onto `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the reading has non-finite values.
    pub fn stage_insert(&self, batch: &mut Batch, reading: &MeterReading) -> Result<()> {
        reading.validate()?;
        for kind in MetricKind::ALL {
            self.stage_value(batch, reading.site_id, kind, reading.value(kind), reading.timestamp);
        }
        Ok(())
    }

    /// Queues a single sample onto `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `sample.value` is not finite.
    pub fn stage_sample(&self, batch: &mut Batch, sample: &Sample) -> Result<()> {
        if !sample.value.is_finite() {
            return Err(Error::invalid(format!(
                "sample value for site {} must be finite",
                sample.site_id
            )));
        }
        self.stage_value(batch, sample.site_id, sample.kind, sample.value, sample.timestamp);
        Ok(())
    }

    fn stage_value(
        &self,
        batch: &mut Batch,
        site_id: SiteId,
        kind: MetricKind,
        value: f64,
        at: DateTime<Utc>,
    ) {
        let key = self.conn.keys().day_metric(site_id, kind, at.date_naive());
        let minute = clock::minute_of_day(at);
        batch.zadd(key.clone(), f64::from(minute), encode_member(value, minute));
        batch.expire(key, self.config.expiration());
    }

    /// Stores the generated, used and temperature samples of `reading` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for a non-finite reading, or a store error.
    pub async fn insert(&self, reading: &MeterReading) -> Result<()> {
        let mut batch = Batch::new();
        self.stage_insert(&mut batch, reading)?;
        self.conn.execute(batch).await?;
        Ok(())
    }

    /// Stores one sample.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for a non-finite value, or a store error.
    pub async fn insert_sample(&self, sample: &Sample) -> Result<()> {
        let mut batch = Batch::new();
        self.stage_sample(&mut batch, sample)?;
        self.conn.execute(batch).await?;
        Ok(())
    }

    /// Returns up to `limit` of the most recent samples, oldest first.
    ///
    /// The walk starts at the UTC day of `as_of` and moves back one day at a
    /// time, for at most [`MetricConfig::max_days_to_return`] days. Stored
    /// members that cannot be decoded are skipped.
    ///
    /// # Arguments
    ///
    /// * `site_id` - The site to read
    /// * `kind` - Which metric to read
    /// * `as_of` - Any instant within the newest day to read
    /// * `limit` - Maximum number of samples to return
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `limit` exceeds one sample per
    /// minute over the retention period, or a store error.
    pub async fn get_recent(
        &self,
        site_id: SiteId,
        kind: MetricKind,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Sample>> {
        let max = self.config.max_samples();
        if limit > max {
            return Err(Error::invalid(format!(
                "cannot request more than {max} samples, got {limit}"
            )));
        }

        let mut days: Vec<Vec<Sample>> = Vec::new();
        let mut remaining = limit;
        let mut day = Some(as_of.date_naive());

        for _ in 0..self.config.max_days_to_return {
            let Some(current) = day else { break };
            if remaining == 0 {
                break;
            }

            let samples = self.day_samples(site_id, kind, current, remaining).await?;
            remaining = remaining.saturating_sub(samples.len());
            days.push(samples);
            day = current.pred_opt();
        }

        debug!(site_id, %kind, limit, days = days.len(), "read recent samples");
        Ok(days.into_iter().rev().flatten().collect())
    }

    /// Newest `count` samples of one day, in ascending time order.
    async fn day_samples(
        &self,
        site_id: SiteId,
        kind: MetricKind,
        day: NaiveDate,
        count: usize,
    ) -> Result<Vec<Sample>> {
        let mut batch = Batch::new();
        let slot = batch.zrange(
            self.conn.keys().day_metric(site_id, kind, day),
            0,
            count,
            Order::Descending,
        );
        let members = self.conn.execute(batch).await?.take_members(slot)?;

        let mut samples: Vec<Sample> = members
            .iter()
            .filter_map(|scored| match decode_member(&scored.member) {
                Some((value, minute)) => Some(Sample {
                    site_id,
                    kind,
                    timestamp: clock::at_minute(day, minute),
                    value,
                }),
                None => {
                    warn!(site_id, %kind, %day, member = %scored.member, "skipping malformed metric member");
                    None
                }
            })
            .collect();
        samples.reverse();
        Ok(samples)
    }
}

/// Encodes a sample as a sorted-set member.
pub fn encode_member(value: f64, minute: u32) -> String {
    format!("{value:.2}:{minute}")
}

/// Decodes a member written by [`encode_member`] into (value, minute of day).
pub fn decode_member(member: &str) -> Option<(f64, u32)> {
    let (value, minute) = member.split_once(':')?;
    let value: f64 = value.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    (value.is_finite() && minute < MINUTES_PER_DAY).then_some((value, minute))
}
