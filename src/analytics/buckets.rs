//! Local-time bucketing
//!
//! Hour buckets are the epoch second at which the local hour containing the
//! event began. Day buckets are the local calendar date as `YYYY-MM-DD`.
//! Incremental ingestion and every rebuild path go through these functions,
//! so a bucket always means the same window regardless of who computed it.

use chrono::{DateTime, Local, NaiveDate, TimeZone, Timelike};

use crate::storage::{StoreError, StoreResult};

/// Width of an hour bucket in seconds
pub const HOUR_SECONDS: i64 = 3600;

/// Format of day bucket keys
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Reject epoch seconds that have no calendar representation
///
/// Ingestion checks every record with this before writing, so the bucket
/// functions below only ever see representable timestamps.
pub fn check_timestamp(timestamp: i64) -> StoreResult<()> {
    DateTime::from_timestamp(timestamp, 0)
        .map(|_| ())
        .ok_or_else(|| {
            StoreError::InvalidBucket(format!("timestamp {timestamp} is out of range"))
        })
}

fn to_local(timestamp: i64) -> DateTime<Local> {
    DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .with_timezone(&Local)
}

/// Start of the local hour containing `timestamp`
pub fn hour_bucket(timestamp: i64) -> i64 {
    let local = to_local(timestamp);
    timestamp - i64::from(local.minute()) * 60 - i64::from(local.second())
}

/// Local calendar day containing `timestamp`
pub fn day_bucket(timestamp: i64) -> String {
    to_local(timestamp).format(DAY_FORMAT).to_string()
}

/// Half-open `[start, end)` epoch range covered by an hour bucket
pub fn hour_bounds(bucket: i64) -> (i64, i64) {
    (bucket, bucket.saturating_add(HOUR_SECONDS))
}

/// Half-open `[start, end)` epoch range covered by a day bucket
pub fn day_bounds(day: &str) -> StoreResult<(i64, i64)> {
    let date = NaiveDate::parse_from_str(day, DAY_FORMAT)
        .map_err(|e| StoreError::InvalidBucket(format!("{day}: {e}")))?;
    let next = date
        .succ_opt()
        .ok_or_else(|| StoreError::InvalidBucket(format!("{day}: no following day")))?;
    Ok((local_midnight(date)?, local_midnight(next)?))
}

// Some zones skip midnight on DST changes; the day then starts at 01:00.
fn local_midnight(date: NaiveDate) -> StoreResult<i64> {
    for hour in 0..=1 {
        let Some(naive) = date.and_hms_opt(hour, 0, 0) else {
            continue;
        };
        if let Some(start) = Local.from_local_datetime(&naive).earliest() {
            return Ok(start.timestamp());
        }
    }
    Err(StoreError::InvalidBucket(format!(
        "{} has no resolvable local start",
        date.format(DAY_FORMAT)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hour_bucket_is_aligned_and_stable() {
        for ts in [0_i64, 59, 3599, 3600, 1_700_000_123, 1_717_171_717] {
            let bucket = hour_bucket(ts);
            assert!(bucket <= ts && ts < bucket + HOUR_SECONDS, "ts {ts} bucket {bucket}");
            assert_eq!(hour_bucket(bucket), bucket);
        }
    }

    #[test]
    fn test_consecutive_hours_are_distinct_buckets() {
        let bucket = hour_bucket(1_700_000_000);
        assert_eq!(hour_bucket(bucket + HOUR_SECONDS), bucket + HOUR_SECONDS);
        assert_eq!(hour_bucket(bucket - 1), bucket - HOUR_SECONDS);
    }

    #[test]
    fn test_day_bucket_format() {
        let day = day_bucket(1_700_000_000);
        assert_eq!(day.len(), 10);
        assert!(NaiveDate::parse_from_str(&day, DAY_FORMAT).is_ok());
    }

    #[test]
    fn test_day_bounds_contain_timestamp() {
        for ts in [86_400_i64, 1_700_000_000, 1_711_846_800] {
            let (start, end) = day_bounds(&day_bucket(ts)).unwrap();
            assert!(start <= ts && ts < end);
            assert_eq!(day_bucket(start), day_bucket(ts));
            assert_ne!(day_bucket(end), day_bucket(ts));
        }
    }

    #[test]
    fn test_unrepresentable_timestamps_are_rejected() {
        assert!(check_timestamp(0).is_ok());
        assert!(check_timestamp(1_700_000_000).is_ok());
        assert!(check_timestamp(-1_700_000_000).is_ok());
        for ts in [i64::MAX, i64::MIN] {
            assert!(matches!(check_timestamp(ts), Err(StoreError::InvalidBucket(_))));
        }
    }

    #[test]
    fn test_hour_bounds_saturate() {
        assert_eq!(hour_bounds(i64::MAX - 10), (i64::MAX - 10, i64::MAX));
    }

    #[test]
    fn test_day_bounds_rejects_garbage() {
        assert!(matches!(
            day_bounds("yesterday"),
            Err(StoreError::InvalidBucket(_))
        ));
    }
}
