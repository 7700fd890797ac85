//! Integration tests for the rate limiters.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, TimeZone, Utc};
use solarkv::{
    Config, Error, FixedWindowRateLimiter, ManualClock, RateLimiter, SlidingWindowRateLimiter,
};

#[tokio::test]
async fn test_fixed_window_ten_of_twelve() {
    let (_, conn) = common::memory_connection(&Config::default());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2021, 3, 1, 9, 30, 10).unwrap());
    let limiter = FixedWindowRateLimiter::new(conn, 1, 10)
        .unwrap()
        .with_clock(Arc::new(clock));

    let mut rejected = 0;
    for _ in 0..12 {
        match limiter.hit("ingest").await {
            Ok(()) => {}
            Err(e) if e.is_rate_limited() => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(rejected, 2);
}

#[tokio::test]
async fn test_fixed_window_boundary_burst() {
    let (_, conn) = common::memory_connection(&Config::default());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2021, 3, 1, 9, 59, 59).unwrap());
    let limiter = FixedWindowRateLimiter::new(conn, 60, 3)
        .unwrap()
        .with_clock(Arc::new(clock.clone()));

    for _ in 0..3 {
        limiter.hit("burst").await.unwrap();
    }
    // One second later a new hour-long block starts with a fresh counter.
    clock.advance(TimeDelta::seconds(1));
    for _ in 0..3 {
        limiter.hit("burst").await.unwrap();
    }
    assert!(limiter.hit("burst").await.unwrap_err().is_rate_limited());
}

#[tokio::test]
async fn test_sliding_window_ten_of_twelve() {
    let (_, conn) = common::memory_connection(&Config::default());
    let limiter = SlidingWindowRateLimiter::new(conn, 10_000, 10).unwrap();

    let mut rejected = 0;
    for _ in 0..12 {
        if limiter.hit("ingest").await.is_err() {
            rejected += 1;
        }
    }
    assert_eq!(rejected, 2);
}

#[tokio::test]
async fn test_sliding_window_recovers_after_window() {
    let (_, conn) = common::memory_connection(&Config::default());
    let limiter = SlidingWindowRateLimiter::new(conn, 100, 10).unwrap();

    for _ in 0..10 {
        limiter.hit("short").await.unwrap();
    }
    let err = limiter.hit("short").await.unwrap_err();
    assert!(matches!(
        err,
        Error::RateLimitExceeded {
            hits: 11,
            max_hits: 10,
            ..
        }
    ));

    tokio::time::sleep(Duration::from_millis(250)).await;
    limiter.hit("short").await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_hits_are_all_counted() {
    let (_, conn) = common::memory_connection(&Config::default());
    let limiter = Arc::new(SlidingWindowRateLimiter::new(conn, 60_000, 10).unwrap());

    let tasks: Vec<_> = (0..25)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.hit("shared").await })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}

#[tokio::test]
async fn test_limiter_kinds_do_not_share_keys() {
    let (store, conn) = common::memory_connection(&Config::default());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap()));
    let fixed = FixedWindowRateLimiter::new(conn.clone(), 1, 1)
        .unwrap()
        .with_clock(clock.clone());
    let sliding = SlidingWindowRateLimiter::new(conn, 60_000, 1)
        .unwrap()
        .with_clock(clock);

    fixed.hit("same").await.unwrap();
    sliding.hit("same").await.unwrap();
    assert_eq!(store.key_count(), 2);
}

#[tokio::test]
async fn test_client_addresses_as_names() {
    let (_, conn) = common::memory_connection(&Config::default());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2021, 3, 1, 8, 0, 0).unwrap()));
    let fixed = FixedWindowRateLimiter::new(conn.clone(), 1, 1)
        .unwrap()
        .with_clock(clock.clone());
    let sliding = SlidingWindowRateLimiter::new(conn, 60_000, 1)
        .unwrap()
        .with_clock(clock);

    fixed.hit("2001:db8::1").await.unwrap();
    sliding.hit("api:v2").await.unwrap();
    assert!(fixed.hit("2001:db8::1").await.unwrap_err().is_rate_limited());
    assert!(sliding.hit("api:v2").await.unwrap_err().is_rate_limited());
}
