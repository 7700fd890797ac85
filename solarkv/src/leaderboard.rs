//! Capacity leaderboard.
//!
//! One sorted set ranks every site by its current capacity (generated minus
//! used energy of its latest reading). Updates overwrite, so each site
//! appears once with its most recent score. Equal scores fall back to the
//! store's member ordering.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::batch::{Batch, Command, Order, ScoredMember};
use crate::error::{Error, Result};
use crate::kv::Connection;
use crate::reading::SiteId;

/// A site and its capacity score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteCapacity {
    /// The ranked site.
    pub site_id: SiteId,
    /// Its latest capacity.
    pub capacity: f64,
}

/// The extremes of the ranking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityReport {
    /// Highest capacities first.
    pub highest: Vec<SiteCapacity>,
    /// Lowest capacities first.
    pub lowest: Vec<SiteCapacity>,
}

/// Ranks sites by capacity.
#[derive(Debug, Clone)]
pub struct Leaderboard {
    conn: Connection,
}

impl Leaderboard {
    /// Creates a leaderboard over `conn`.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Queues a score update onto `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `capacity` is not finite.
    pub fn stage_update(&self, batch: &mut Batch, site_id: SiteId, capacity: f64) -> Result<()> {
        if !capacity.is_finite() {
            return Err(Error::invalid(format!(
                "capacity for site {site_id} must be finite, got {capacity}"
            )));
        }
        batch.zadd(
            self.conn.keys().capacity_ranking(),
            capacity,
            site_id.to_string(),
        );
        Ok(())
    }

    /// Sets the capacity score of `site_id`, replacing any previous score.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for a non-finite score, or a store error.
    pub async fn update(&self, site_id: SiteId, capacity: f64) -> Result<()> {
        let mut batch = Batch::new();
        self.stage_update(&mut batch, site_id, capacity)?;
        self.conn.execute(batch).await?;
        Ok(())
    }

    /// Returns the `limit` highest and `limit` lowest ranked sites, read
    /// together in one batch.
    ///
    /// # Errors
    ///
    /// Returns a store error if the batch fails.
    pub async fn get_top_and_bottom(&self, limit: usize) -> Result<CapacityReport> {
        if limit == 0 {
            return Ok(CapacityReport::default());
        }

        let key = self.conn.keys().capacity_ranking();
        let mut batch = Batch::new();
        let low = batch.zrange(key.clone(), 0, limit, Order::Ascending);
        let high = batch.zrange(key, 0, limit, Order::Descending);
        let mut replies = self.conn.execute(batch).await?;

        Ok(CapacityReport {
            highest: decode(replies.take_members(high)?),
            lowest: decode(replies.take_members(low)?),
        })
    }

    /// Returns the 0-based position of `site_id` counted from the highest score.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the site has never been ranked, or a
    /// store error.
    pub async fn get_rank(&self, site_id: SiteId) -> Result<u64> {
        let mut batch = Batch::new();
        let slot = batch.push(Command::ZRevRank {
            key: self.conn.keys().capacity_ranking(),
            member: site_id.to_string(),
        });
        self.conn
            .execute(batch)
            .await?
            .rank(slot)?
            .ok_or_else(|| Error::not_found(format!("site {site_id} in capacity ranking")))
    }
}

fn decode(members: Vec<ScoredMember>) -> Vec<SiteCapacity> {
    members
        .into_iter()
        .filter_map(|scored| match scored.member.parse() {
            Ok(site_id) => Some(SiteCapacity {
                site_id,
                capacity: scored.score,
            }),
            Err(_) => {
                warn!(member = %scored.member, "skipping non-numeric site in capacity ranking");
                None
            }
        })
        .collect()
}
