//! Shared helpers for integration tests.

#![allow(dead_code, missing_docs)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use solarkv::{Config, Connection, MemoryStore, MeterReading, SiteId};
use tracing_subscriber::EnvFilter;

/// Routes library logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("solarkv=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A fresh in-memory store and a connection to it.
pub fn memory_connection(config: &Config) -> (Arc<MemoryStore>, Connection) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let conn = Connection::new(store.clone(), config).unwrap();
    (store, conn)
}

pub fn reading(site_id: SiteId, wh_generated: f64, wh_used: f64, at: DateTime<Utc>) -> MeterReading {
    MeterReading {
        site_id,
        wh_used,
        wh_generated,
        temp_c: 22.0,
        timestamp: at,
    }
}
