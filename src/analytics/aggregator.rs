//! In-memory traffic aggregation
//!
//! Every event touched by a batch (or streamed out of raw history during a
//! rebuild) is folded into an [`AggregateBatch`] keyed by hour and day bucket.
//! The storage layer then writes one upsert per distinct bucket instead of one
//! write per event.

use std::collections::{BTreeMap, BTreeSet};

use crate::analytics::buckets::{day_bucket, hour_bucket};

/// HTTP status family used for the status counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Redirect,
    ClientError,
    ServerError,
    Other,
}

impl StatusClass {
    pub fn from_status(status: i64) -> Self {
        match status {
            200..=299 => Self::Success,
            300..=399 => Self::Redirect,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Other,
        }
    }
}

/// The subset of a raw event the aggregates depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFacts {
    pub visitor_id: i64,
    pub pageview: bool,
    pub timestamp: i64,
    pub status: i64,
    pub bytes_sent: i64,
}

/// Additive counters stored per hour and per day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficCounts {
    pub pageviews: i64,
    pub traffic: i64,
    pub s2xx: i64,
    pub s3xx: i64,
    pub s4xx: i64,
    pub s5xx: i64,
    pub other: i64,
}

impl TrafficCounts {
    pub fn add(&mut self, event: &EventFacts) {
        if event.pageview {
            self.pageviews += 1;
            self.traffic += event.bytes_sent;
        }
        match StatusClass::from_status(event.status) {
            StatusClass::Success => self.s2xx += 1,
            StatusClass::Redirect => self.s3xx += 1,
            StatusClass::ClientError => self.s4xx += 1,
            StatusClass::ServerError => self.s5xx += 1,
            StatusClass::Other => self.other += 1,
        }
    }
}

/// Pending aggregate deltas for one unit of work
#[derive(Debug, Default)]
pub struct AggregateBatch {
    hourly: BTreeMap<i64, TrafficCounts>,
    daily: BTreeMap<String, TrafficCounts>,
    hourly_visitors: BTreeMap<i64, BTreeSet<i64>>,
    daily_visitors: BTreeMap<String, BTreeSet<i64>>,
}

impl AggregateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into its hour and day buckets
    pub fn add(&mut self, event: &EventFacts) {
        let hour = hour_bucket(event.timestamp);
        let day = day_bucket(event.timestamp);

        self.hourly.entry(hour).or_default().add(event);
        self.daily.entry(day.clone()).or_default().add(event);

        if event.pageview {
            self.hourly_visitors
                .entry(hour)
                .or_default()
                .insert(event.visitor_id);
            self.daily_visitors
                .entry(day)
                .or_default()
                .insert(event.visitor_id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hourly.is_empty() && self.daily.is_empty()
    }

    pub fn hourly(&self) -> &BTreeMap<i64, TrafficCounts> {
        &self.hourly
    }

    pub fn daily(&self) -> &BTreeMap<String, TrafficCounts> {
        &self.daily
    }

    pub fn hourly_visitors(&self) -> &BTreeMap<i64, BTreeSet<i64>> {
        &self.hourly_visitors
    }

    pub fn daily_visitors(&self) -> &BTreeMap<String, BTreeSet<i64>> {
        &self.daily_visitors
    }
}

/// Pending session-start deltas, keyed by the day the session started
#[derive(Debug, Default)]
pub struct SessionAggregateBatch {
    sessions: BTreeMap<String, i64>,
    entries: BTreeMap<(String, i64), i64>,
}

impl SessionAggregateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_start(&mut self, start_ts: i64, entry_url_id: i64) {
        let day = day_bucket(start_ts);
        *self.entries.entry((day.clone(), entry_url_id)).or_default() += 1;
        *self.sessions.entry(day).or_default() += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> &BTreeMap<String, i64> {
        &self.sessions
    }

    pub fn entries(&self) -> &BTreeMap<(String, i64), i64> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(visitor_id: i64, pageview: bool, timestamp: i64, status: i64) -> EventFacts {
        EventFacts {
            visitor_id,
            pageview,
            timestamp,
            status,
            bytes_sent: 100,
        }
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(StatusClass::from_status(200), StatusClass::Success);
        assert_eq!(StatusClass::from_status(299), StatusClass::Success);
        assert_eq!(StatusClass::from_status(304), StatusClass::Redirect);
        assert_eq!(StatusClass::from_status(404), StatusClass::ClientError);
        assert_eq!(StatusClass::from_status(599), StatusClass::ServerError);
        assert_eq!(StatusClass::from_status(600), StatusClass::Other);
        assert_eq!(StatusClass::from_status(199), StatusClass::Other);
        assert_eq!(StatusClass::from_status(0), StatusClass::Other);
    }

    #[test]
    fn test_non_pageviews_only_touch_status_counters() {
        let mut counts = TrafficCounts::default();
        counts.add(&event(1, false, 10, 200));
        counts.add(&event(1, true, 10, 500));
        assert_eq!(counts.pageviews, 1);
        assert_eq!(counts.traffic, 100);
        assert_eq!(counts.s2xx, 1);
        assert_eq!(counts.s5xx, 1);
    }

    #[test]
    fn test_batch_groups_by_bucket() {
        let base = hour_bucket(1_700_000_000);
        let mut batch = AggregateBatch::new();
        batch.add(&event(1, true, base, 200));
        batch.add(&event(1, true, base + 10, 200));
        batch.add(&event(2, true, base + 20, 404));
        batch.add(&event(3, false, base + 30, 200));
        batch.add(&event(1, true, base + 3600, 200));

        assert_eq!(batch.hourly().len(), 2);
        let first = batch.hourly()[&base];
        assert_eq!(first.pageviews, 3);
        assert_eq!(first.s2xx, 3);
        assert_eq!(first.s4xx, 1);

        let visitors = &batch.hourly_visitors()[&base];
        assert_eq!(visitors.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_session_batch_counts_entries() {
        let mut batch = SessionAggregateBatch::new();
        batch.record_start(1_700_000_000, 7);
        batch.record_start(1_700_000_100, 7);
        batch.record_start(1_700_000_200, 9);

        let day = day_bucket(1_700_000_000);
        assert_eq!(batch.sessions()[&day], 3);
        assert_eq!(batch.entries()[&(day.clone(), 7)], 2);
        assert_eq!(batch.entries()[&(day, 9)], 1);
    }
}
