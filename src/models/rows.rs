//! Rows of the derived per-site tables

use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct HourlyAggregate {
    /// Epoch second at which the local hour began
    pub bucket: i64,
    pub pv: i64,
    pub traffic: i64,
    pub s2xx: i64,
    pub s3xx: i64,
    pub s4xx: i64,
    pub s5xx: i64,
    pub other: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct DailyAggregate {
    /// Local calendar day, `YYYY-MM-DD`
    pub day: String,
    pub pv: i64,
    pub traffic: i64,
    pub s2xx: i64,
    pub s3xx: i64,
    pub s4xx: i64,
    pub s5xx: i64,
    pub other: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct FirstSeen {
    pub ip_id: i64,
    pub first_ts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct SessionRow {
    pub id: i64,
    pub ip_id: i64,
    pub ua_id: i64,
    pub location_id: i64,
    pub start_ts: i64,
    pub end_ts: i64,
    pub entry_url_id: i64,
    pub exit_url_id: i64,
    pub page_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct SessionDaily {
    pub day: String,
    pub sessions: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct EntryDaily {
    pub day: String,
    pub entry_url_id: i64,
    pub count: i64,
}
