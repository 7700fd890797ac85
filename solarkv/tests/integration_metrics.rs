//! Integration tests for day-bucketed metric queries.

mod common;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use solarkv::kv::Batch;
use solarkv::{Config, MeterReading, MetricKind, MetricStore};

/// One reading per minute going back `count` minutes from `now`; the reading
/// `i` minutes old has every value equal to `i`.
async fn load_minutes(metrics: &MetricStore, conn: &solarkv::Connection, now: DateTime<Utc>, count: i64) {
    let mut batch = Batch::new();
    for i in 0..count {
        let value = i as f64;
        let reading = MeterReading {
            site_id: 1,
            wh_used: value,
            wh_generated: value,
            temp_c: value,
            timestamp: now - TimeDelta::minutes(i),
        };
        metrics.stage_insert(&mut batch, &reading).unwrap();
    }
    conn.execute(batch).await.unwrap();
}

fn setup() -> (solarkv::Connection, MetricStore) {
    let config = Config::default();
    let (_, conn) = common::memory_connection(&config);
    let metrics = MetricStore::new(conn.clone(), &config);
    (conn, metrics)
}

async fn assert_descending_values(metrics: &MetricStore, now: DateTime<Utc>, limit: usize) {
    let samples = metrics
        .get_recent(1, MetricKind::WhGenerated, now, limit)
        .await
        .unwrap();
    assert_eq!(samples.len(), limit);

    // Oldest first, so values count down to 0 at `now`.
    for (offset, sample) in samples.iter().enumerate() {
        assert_eq!(sample.value, (limit - 1 - offset) as f64);
    }
    assert_eq!(samples.last().unwrap().timestamp, now);
}

#[tokio::test]
async fn test_small() {
    let (conn, metrics) = setup();
    let now = Utc.with_ymd_and_hms(2022, 8, 10, 14, 37, 0).unwrap();
    load_minutes(&metrics, &conn, now, 72 * 60).await;
    assert_descending_values(&metrics, now, 1).await;
}

#[tokio::test]
async fn test_one_day() {
    let (conn, metrics) = setup();
    let now = Utc.with_ymd_and_hms(2022, 8, 10, 14, 37, 0).unwrap();
    load_minutes(&metrics, &conn, now, 72 * 60).await;
    assert_descending_values(&metrics, now, 60 * 24).await;
}

#[tokio::test]
async fn test_multiple_days() {
    let (conn, metrics) = setup();
    let now = Utc.with_ymd_and_hms(2022, 8, 10, 14, 37, 0).unwrap();
    load_minutes(&metrics, &conn, now, 72 * 60).await;
    assert_descending_values(&metrics, now, 60 * 70).await;
}

#[tokio::test]
async fn test_day_boundary_has_no_gaps_or_duplicates() {
    let (conn, metrics) = setup();
    let now = Utc.with_ymd_and_hms(2022, 1, 3, 6, 0, 0).unwrap();
    let stored = 1440 * 12 / 10;
    load_minutes(&metrics, &conn, now, stored).await;

    let samples = metrics
        .get_recent(1, MetricKind::TempCelsius, now, 1440 * 3 / 2)
        .await
        .unwrap();
    assert_eq!(samples.len(), stored as usize);
    for pair in samples.windows(2) {
        assert_eq!(pair[1].timestamp - pair[0].timestamp, TimeDelta::minutes(1));
    }
    assert_eq!(samples.first().unwrap().timestamp, now - TimeDelta::minutes(stored - 1));
}

#[tokio::test]
async fn test_lookback_stops_after_seven_days() {
    let (conn, metrics) = setup();
    let now = Utc.with_ymd_and_hms(2022, 1, 20, 0, 0, 0).unwrap();

    let mut batch = Batch::new();
    for day in 0..10 {
        let reading = MeterReading {
            site_id: 1,
            wh_used: 0.0,
            wh_generated: f64::from(day),
            temp_c: 0.0,
            timestamp: now - TimeDelta::days(i64::from(day)),
        };
        metrics.stage_insert(&mut batch, &reading).unwrap();
    }
    conn.execute(batch).await.unwrap();

    let samples = metrics
        .get_recent(1, MetricKind::WhGenerated, now, 100)
        .await
        .unwrap();
    assert_eq!(samples.len(), 7);
    assert_eq!(samples[0].value, 6.0);
}

#[tokio::test]
async fn test_sites_and_kinds_are_isolated() {
    let (_, metrics) = setup();
    let now = Utc.with_ymd_and_hms(2022, 1, 3, 6, 0, 0).unwrap();
    metrics
        .insert(&common::reading(1, 5.0, 2.0, now))
        .await
        .unwrap();

    let used = metrics
        .get_recent(1, MetricKind::WhUsed, now, 10)
        .await
        .unwrap();
    assert_eq!(used.len(), 1);
    assert_eq!(used[0].value, 2.0);
    assert!(
        metrics
            .get_recent(2, MetricKind::WhUsed, now, 10)
            .await
            .unwrap()
            .is_empty()
    );
}
