//! The key-value store contract and the shared connection handle.
//!
//! A backend implements [`KeyValueStore`]: it receives a whole [`Batch`] and
//! must apply it atomically, either every command or none, answering with one
//! [`Reply`] per command. Components hold a [`Connection`], a cheap clonable
//! handle that adds the key schema and the per-batch timeout.
//!
//! # Lifecycle
//!
//! The connection is created once at startup with [`Connection::new`] and
//! shared by every component. [`Connection::close`] shuts the backend down;
//! any batch issued afterwards fails with [`StoreError::Closed`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};

pub use crate::batch::{
    Batch, Command, Comparison, MaxLen, Order, Replies, Reply, ScoredMember, Slot, StreamEntry,
    StreamId,
};
use crate::config::Config;
use crate::error::{Error, Result, StoreError};
use crate::keys::KeySchema;

/// A backend able to apply command batches atomically.
#[async_trait]
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Applies every command of `batch` as one atomic unit.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if any command fails; in that case no command
    /// of the batch has taken effect.
    async fn execute(&self, batch: Batch) -> std::result::Result<Replies, StoreError>;

    /// Releases backend resources. Later batches fail with [`StoreError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend fails to shut down cleanly.
    async fn close(&self) -> std::result::Result<(), StoreError> {
        Ok(())
    }
}

/// Shared handle to a store, used by every component.
#[derive(Clone)]
pub struct Connection {
    store: Arc<dyn KeyValueStore>,
    keys: KeySchema,
    op_timeout: Option<Duration>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("store", &self.store)
            .field("prefix", &self.keys.prefix())
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl Connection {
    /// Wraps `store` using the key prefix and timeout from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` fails validation.
    pub fn new(store: Arc<dyn KeyValueStore>, config: &Config) -> Result<Self> {
        config.validate()?;
        info!(
            prefix = %config.key_prefix,
            op_timeout = ?config.op_timeout,
            "opened store connection"
        );
        Ok(Self {
            store,
            keys: KeySchema::new(config.key_prefix.clone()),
            op_timeout: config.op_timeout,
        })
    }

    /// The key schema every component derives its keys from.
    pub fn keys(&self) -> &KeySchema {
        &self.keys
    }

    /// The per-batch timeout, if any.
    pub fn op_timeout(&self) -> Option<Duration> {
        self.op_timeout
    }

    /// Executes `batch` atomically.
    ///
    /// An empty batch returns empty replies without touching the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the backend fails, or
    /// [`Error::Canceled`] if the configured timeout elapses first.
    pub async fn execute(&self, batch: Batch) -> Result<Replies> {
        if batch.is_empty() {
            return Ok(Replies::default());
        }

        let commands = batch.len();
        let started = Instant::now();
        let replies = match self.op_timeout {
            Some(limit) => tokio::time::timeout(limit, self.store.execute(batch))
                .await
                .map_err(|_| Error::Canceled {
                    elapsed: started.elapsed(),
                })??,
            None => self.store.execute(batch).await?,
        };

        debug!(commands, elapsed = ?started.elapsed(), "executed batch");
        Ok(replies)
    }

    /// Closes the underlying store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the backend fails to shut down.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await?;
        info!(prefix = %self.keys.prefix(), "closed store connection");
        Ok(())
    }
}
