//! Request deadlines.
//!
//! A logical request may issue several batches. Wrapping the whole request
//! in [`within`] or [`until`] bounds it as a unit; when the deadline elapses
//! the pending batch is dropped and the caller gets [`Error::Canceled`].
//! Batches that already completed stay applied.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use solarkv::{deadline, Leaderboard};
//!
//! # async fn run(board: Leaderboard) -> solarkv::Result<()> {
//! let report = deadline::within(Duration::from_millis(200), board.get_top_and_bottom(10)).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// Runs `fut`, giving up after `limit`.
///
/// # Errors
///
/// Returns [`Error::Canceled`] if `limit` elapses first, otherwise whatever
/// `fut` returns.
pub async fn within<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Canceled {
            elapsed: started.elapsed(),
        })?
}

/// Runs `fut`, giving up at `deadline`.
///
/// # Errors
///
/// Returns [`Error::Canceled`] if `deadline` passes first, otherwise whatever
/// `fut` returns.
pub async fn until<T, F>(deadline: Instant, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| Error::Canceled {
            elapsed: started.elapsed(),
        })?
}
