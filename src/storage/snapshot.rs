use serde::Serialize;
use sqlx::SqliteConnection;

use crate::models::{DailyAggregate, EntryDaily, FirstSeen, HourlyAggregate, SessionDaily, SessionRow};
use crate::storage::tables::SiteTables;
use crate::storage::StoreResult;

/// Every derived table of one site, each in a fixed order
///
/// Two snapshots of the same raw events compare equal no matter which path
/// (incremental, rebuild, purge) produced them, except for session ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteSnapshot {
    pub hourly: Vec<HourlyAggregate>,
    pub hourly_visitors: Vec<(i64, i64)>,
    pub daily: Vec<DailyAggregate>,
    pub daily_visitors: Vec<(String, i64)>,
    pub first_seen: Vec<FirstSeen>,
    pub sessions: Vec<SessionRow>,
    /// (ip_id, ua_id, last_ts)
    pub session_state: Vec<(i64, i64, i64)>,
    pub session_daily: Vec<SessionDaily>,
    pub entry_daily: Vec<EntryDaily>,
}

impl SiteSnapshot {
    /// Session ids are surrogate keys; rebuilding renumbers them
    pub fn without_session_ids(mut self) -> Self {
        for session in &mut self.sessions {
            session.id = 0;
        }
        self
    }

    pub fn total_pageviews(&self) -> i64 {
        self.hourly.iter().map(|row| row.pv).sum()
    }
}

pub async fn read(conn: &mut SqliteConnection, tables: &SiteTables) -> StoreResult<SiteSnapshot> {
    let counters = "pv, traffic, s2xx, s3xx, s4xx, s5xx, other";

    let hourly = sqlx::query_as(&format!(
        "SELECT bucket, {counters} FROM {} ORDER BY bucket",
        tables.agg_hourly
    ))
    .fetch_all(&mut *conn)
    .await?;

    let hourly_visitors = sqlx::query_as(&format!(
        "SELECT bucket, ip_id FROM {} ORDER BY bucket, ip_id",
        tables.agg_hourly_ip
    ))
    .fetch_all(&mut *conn)
    .await?;

    let daily = sqlx::query_as(&format!(
        "SELECT day, {counters} FROM {} ORDER BY day",
        tables.agg_daily
    ))
    .fetch_all(&mut *conn)
    .await?;

    let daily_visitors = sqlx::query_as(&format!(
        "SELECT day, ip_id FROM {} ORDER BY day, ip_id",
        tables.agg_daily_ip
    ))
    .fetch_all(&mut *conn)
    .await?;

    let first_seen = sqlx::query_as(&format!(
        "SELECT ip_id, first_ts FROM {} ORDER BY ip_id",
        tables.first_seen
    ))
    .fetch_all(&mut *conn)
    .await?;

    let sessions = sqlx::query_as(&format!(
        r#"
        SELECT id, ip_id, ua_id, location_id, start_ts, end_ts,
               entry_url_id, exit_url_id, page_count
        FROM {}
        ORDER BY start_ts, ip_id, ua_id, end_ts
        "#,
        tables.sessions
    ))
    .fetch_all(&mut *conn)
    .await?;

    let session_state = sqlx::query_as(&format!(
        "SELECT ip_id, ua_id, last_ts FROM {} ORDER BY ip_id, ua_id",
        tables.session_state
    ))
    .fetch_all(&mut *conn)
    .await?;

    let session_daily = sqlx::query_as(&format!(
        "SELECT day, sessions FROM {} ORDER BY day",
        tables.agg_session_daily
    ))
    .fetch_all(&mut *conn)
    .await?;

    let entry_daily = sqlx::query_as(&format!(
        "SELECT day, entry_url_id, count FROM {} ORDER BY day, entry_url_id",
        tables.agg_entry_daily
    ))
    .fetch_all(&mut *conn)
    .await?;

    Ok(SiteSnapshot {
        hourly,
        hourly_visitors,
        daily,
        daily_visitors,
        first_seen,
        sessions,
        session_state,
        session_daily,
        entry_daily,
    })
}
