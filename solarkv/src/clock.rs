//! Wall-clock source and calendar helpers.
//!
//! Rate limiters and site statistics read "now" through a [`Clock`] so tests
//! can pin time instead of racing minute boundaries.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, Timelike, Utc};
use parking_lot::Mutex;

/// Number of minutes in a UTC day. Valid minute-of-day values are `0..MINUTES_PER_DAY`.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Source of the current UTC time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying instant, so a test can hand one clone to
/// a limiter and keep another to advance time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Shared handle to the default system clock.
pub(crate) fn system() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Returns the minute of the UTC day (`0..1440`) for `instant`.
pub fn minute_of_day(instant: DateTime<Utc>) -> u32 {
    instant.hour() * 60 + instant.minute()
}

/// Returns the instant `minute` minutes after midnight UTC on `day`.
pub fn at_minute(day: NaiveDate, minute: u32) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc() + TimeDelta::minutes(i64::from(minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_minute_of_day() {
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 59).unwrap();
        assert_eq!(minute_of_day(t), 0);

        let t = Utc.with_ymd_and_hms(2020, 1, 1, 13, 7, 0).unwrap();
        assert_eq!(minute_of_day(t), 13 * 60 + 7);

        let t = Utc.with_ymd_and_hms(2020, 1, 1, 23, 59, 59).unwrap();
        assert_eq!(minute_of_day(t), MINUTES_PER_DAY - 1);
    }

    #[test]
    fn test_at_minute_inverts_minute_of_day() {
        let day = NaiveDate::from_ymd_opt(2021, 6, 30).unwrap();
        let t = at_minute(day, 725);
        assert_eq!(t.date_naive(), day);
        assert_eq!(minute_of_day(t), 725);
        assert_eq!(t.second(), 0);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let observer = clock.clone();

        clock.advance(TimeDelta::minutes(5));
        assert_eq!(observer.now(), start + TimeDelta::minutes(5));

        clock.set(start);
        assert_eq!(observer.now(), start);
    }
}
