//! Date, time and timestamp values as carried on the wire.

use chrono::{DateTime, NaiveTime, TimeDelta, Timelike, Utc};

use crate::error::{IgniteError, Result};

const NANOS_PER_MILLI: i32 = 1_000_000;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// A calendar date with millisecond precision, stored as epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Date {
    epoch_millis: i64,
}

impl Date {
    /// Creates a date from milliseconds since the Unix epoch.
    pub fn from_millis(epoch_millis: i64) -> Self {
        Self { epoch_millis }
    }

    /// Returns milliseconds since the Unix epoch.
    pub fn millis(&self) -> i64 {
        self.epoch_millis
    }

    /// Converts to a UTC date-time.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.epoch_millis)
    }
}

impl From<DateTime<Utc>> for Date {
    fn from(value: DateTime<Utc>) -> Self {
        Self::from_millis(value.timestamp_millis())
    }
}

/// A point in time with nanosecond precision.
///
/// The wire form splits the value into epoch milliseconds and the
/// nanoseconds remaining within that millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    epoch_millis: i64,
    nanos: i32,
}

impl Timestamp {
    /// Creates a timestamp, rejecting sub-millisecond parts outside `0..1_000_000`.
    pub fn new(epoch_millis: i64, nanos: i32) -> Result<Self> {
        if !(0..NANOS_PER_MILLI).contains(&nanos) {
            return Err(IgniteError::Serialization(format!(
                "timestamp nanos {} outside 0..{}",
                nanos, NANOS_PER_MILLI
            )));
        }
        Ok(Self {
            epoch_millis,
            nanos,
        })
    }

    /// Creates a timestamp with no sub-millisecond part.
    pub fn from_millis(epoch_millis: i64) -> Self {
        Self {
            epoch_millis,
            nanos: 0,
        }
    }

    /// Returns milliseconds since the Unix epoch.
    pub fn millis(&self) -> i64 {
        self.epoch_millis
    }

    /// Returns nanoseconds within the millisecond.
    pub fn nanos(&self) -> i32 {
        self.nanos
    }

    /// Converts to a UTC date-time.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.epoch_millis)
            .map(|dt| dt + TimeDelta::nanoseconds(i64::from(self.nanos)))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self {
            epoch_millis: value.timestamp_millis(),
            nanos: (value.timestamp_subsec_nanos() % NANOS_PER_MILLI as u32) as i32,
        }
    }
}

/// A time of day with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Time {
    millis_of_day: i64,
}

impl Time {
    /// Creates a time from milliseconds since midnight.
    pub fn from_millis(millis_of_day: i64) -> Result<Self> {
        if !(0..MILLIS_PER_DAY).contains(&millis_of_day) {
            return Err(IgniteError::Serialization(format!(
                "time of day {}ms outside a single day",
                millis_of_day
            )));
        }
        Ok(Self { millis_of_day })
    }

    /// Returns milliseconds since midnight.
    pub fn millis(&self) -> i64 {
        self.millis_of_day
    }

    /// Converts to a naive time.
    pub fn to_naive_time(&self) -> Option<NaiveTime> {
        let secs = u32::try_from(self.millis_of_day / 1000).ok()?;
        let nanos = u32::try_from(self.millis_of_day % 1000).ok()? * NANOS_PER_MILLI as u32;
        NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
    }
}

impl From<NaiveTime> for Time {
    fn from(value: NaiveTime) -> Self {
        let millis = i64::from(value.num_seconds_from_midnight()) * 1000
            + i64::from(value.nanosecond() / NANOS_PER_MILLI as u32) % 1000;
        Self {
            millis_of_day: millis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_datetime_conversion() {
        let dt = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let date = Date::from(dt);
        assert_eq!(date.millis(), 1_700_000_000_123);
        assert_eq!(date.to_datetime(), Some(dt));
    }

    #[test]
    fn test_timestamp_splits_nanos() {
        let dt = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let ts = Timestamp::from(dt);
        assert_eq!(ts.millis(), 1_700_000_000_123);
        assert_eq!(ts.nanos(), 456_789);
        assert_eq!(ts.to_datetime(), Some(dt));
    }

    #[test]
    fn test_timestamp_rejects_out_of_range_nanos() {
        assert!(Timestamp::new(0, 1_000_000).is_err());
        assert!(Timestamp::new(0, -1).is_err());
        assert!(Timestamp::new(0, 999_999).is_ok());
    }

    #[test]
    fn test_time_from_naive() {
        let t = NaiveTime::from_hms_milli_opt(1, 2, 3, 4).unwrap();
        let time = Time::from(t);
        assert_eq!(time.millis(), 3_723_004);
        assert_eq!(time.to_naive_time(), Some(t));
    }

    #[test]
    fn test_time_rejects_out_of_day() {
        assert!(Time::from_millis(MILLIS_PER_DAY).is_err());
        assert!(Time::from_millis(-1).is_err());
    }
}
