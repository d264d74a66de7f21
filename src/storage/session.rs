//! Session persistence
//!
//! Incremental tracking applies [`next_step`] decisions to the sessions and
//! session state tables. The full rebuild derives the same boundaries in one
//! window-function query over all page views.

use std::collections::BTreeSet;

use crate::analytics::aggregator::SessionAggregateBatch;
use crate::analytics::buckets::{day_bounds, day_bucket};
use crate::analytics::sessionizer::{
    next_step, SessionCache, SessionState, SessionStep, SESSION_GAP_SECONDS,
};
use crate::storage::tables::SiteTables;
use crate::storage::StoreResult;
use sqlx::SqliteConnection;
use tracing::debug;

/// A page view as seen by the session tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageView {
    pub ip_id: i64,
    pub ua_id: i64,
    pub location_id: i64,
    pub url_id: i64,
    pub timestamp: i64,
}

async fn load_state(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    ip_id: i64,
    ua_id: i64,
) -> StoreResult<Option<SessionState>> {
    let sql = format!(
        "SELECT session_id, last_ts FROM {} WHERE ip_id = ? AND ua_id = ?",
        tables.session_state
    );
    let row: Option<(i64, i64)> = sqlx::query_as(&sql)
        .bind(ip_id)
        .bind(ua_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|(session_id, last_ts)| SessionState {
        session_id,
        last_ts,
    }))
}

/// Apply one page view to its pair's session
///
/// New sessions are counted into `starts`; the caller merges those into the
/// session aggregates once the batch is done.
pub async fn track_pageview(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    cache: &mut SessionCache,
    starts: &mut SessionAggregateBatch,
    view: &PageView,
) -> StoreResult<()> {
    let key = (view.ip_id, view.ua_id);
    let state = match cache.get(key) {
        Some(state) => state,
        None => {
            let state = load_state(conn, tables, view.ip_id, view.ua_id).await?;
            cache.insert(key, state);
            state
        }
    };

    let session_id = match next_step(state, view.timestamp) {
        SessionStep::Ignore => return Ok(()),
        SessionStep::Open => {
            let sql = format!(
                r#"
                INSERT INTO {} (
                    ip_id, ua_id, location_id, start_ts, end_ts,
                    entry_url_id, exit_url_id, page_count
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, 1)
                "#,
                tables.sessions
            );
            let result = sqlx::query(&sql)
                .bind(view.ip_id)
                .bind(view.ua_id)
                .bind(view.location_id)
                .bind(view.timestamp)
                .bind(view.timestamp)
                .bind(view.url_id)
                .bind(view.url_id)
                .execute(&mut *conn)
                .await?;
            starts.record_start(view.timestamp, view.url_id);
            result.last_insert_rowid()
        }
        SessionStep::Extend { session_id } => {
            let sql = format!(
                r#"
                UPDATE {}
                SET end_ts = ?, exit_url_id = ?, page_count = page_count + 1
                WHERE id = ?
                "#,
                tables.sessions
            );
            sqlx::query(&sql)
                .bind(view.timestamp)
                .bind(view.url_id)
                .bind(session_id)
                .execute(&mut *conn)
                .await?;
            session_id
        }
    };

    let sql = format!(
        r#"
        INSERT INTO {} (ip_id, ua_id, session_id, last_ts) VALUES (?, ?, ?, ?)
        ON CONFLICT(ip_id, ua_id) DO UPDATE SET
            session_id = excluded.session_id,
            last_ts = excluded.last_ts
        "#,
        tables.session_state
    );
    sqlx::query(&sql)
        .bind(view.ip_id)
        .bind(view.ua_id)
        .bind(session_id)
        .bind(view.timestamp)
        .execute(&mut *conn)
        .await?;

    cache.insert(
        key,
        Some(SessionState {
            session_id,
            last_ts: view.timestamp,
        }),
    );
    Ok(())
}

/// Merge session-start deltas into the daily session aggregates
pub async fn apply_aggregates(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    batch: &SessionAggregateBatch,
) -> StoreResult<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let sessions = format!(
        r#"
        INSERT INTO {} (day, sessions) VALUES (?, ?)
        ON CONFLICT(day) DO UPDATE SET sessions = sessions + excluded.sessions
        "#,
        tables.agg_session_daily
    );
    for (day, count) in batch.sessions() {
        sqlx::query(&sessions)
            .bind(day.as_str())
            .bind(*count)
            .execute(&mut *conn)
            .await?;
    }

    let entries = format!(
        r#"
        INSERT INTO {} (day, entry_url_id, count) VALUES (?, ?, ?)
        ON CONFLICT(day, entry_url_id) DO UPDATE SET count = count + excluded.count
        "#,
        tables.agg_entry_daily
    );
    for ((day, entry_url_id), count) in batch.entries() {
        sqlx::query(&entries)
            .bind(day.as_str())
            .bind(*entry_url_id)
            .bind(*count)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Replace all sessions with those derived from every page view, then
/// rebuild the session state from them
pub async fn rebuild_sessions(conn: &mut SqliteConnection, tables: &SiteTables) -> StoreResult<()> {
    sqlx::query(&format!("DELETE FROM {}", tables.sessions))
        .execute(&mut *conn)
        .await?;

    // Boundaries: no previous view in the partition, or a gap above the limit.
    // A running count of boundaries numbers the sessions.
    let sql = format!(
        r#"
        WITH ordered AS (
            SELECT id, ip_id, ua_id, location_id, url_id, timestamp,
                   LAG(timestamp) OVER (
                       PARTITION BY ip_id, ua_id ORDER BY timestamp, id
                   ) AS prev_ts
            FROM {logs}
            WHERE pageview_flag = 1
        ),
        numbered AS (
            SELECT *,
                   SUM(CASE WHEN prev_ts IS NULL OR timestamp - prev_ts > {gap} THEN 1 ELSE 0 END)
                       OVER (
                           PARTITION BY ip_id, ua_id ORDER BY timestamp, id
                           ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW
                       ) AS session_no
            FROM ordered
        ),
        ranked AS (
            SELECT *,
                   ROW_NUMBER() OVER (
                       PARTITION BY ip_id, ua_id, session_no ORDER BY timestamp, id
                   ) AS first_rank,
                   ROW_NUMBER() OVER (
                       PARTITION BY ip_id, ua_id, session_no ORDER BY timestamp DESC, id DESC
                   ) AS last_rank
            FROM numbered
        )
        INSERT INTO {sessions} (
            ip_id, ua_id, location_id, start_ts, end_ts,
            entry_url_id, exit_url_id, page_count
        )
        SELECT ip_id, ua_id,
               MAX(CASE WHEN first_rank = 1 THEN location_id END),
               MIN(timestamp) AS start_ts,
               MAX(timestamp),
               MAX(CASE WHEN first_rank = 1 THEN url_id END),
               MAX(CASE WHEN last_rank = 1 THEN url_id END),
               COUNT(*)
        FROM ranked
        GROUP BY ip_id, ua_id, session_no
        ORDER BY start_ts, ip_id, ua_id
        "#,
        logs = tables.logs,
        sessions = tables.sessions,
        gap = SESSION_GAP_SECONDS,
    );
    let inserted = sqlx::query(&sql).execute(&mut *conn).await?.rows_affected();
    debug!(site = %tables.site(), sessions = inserted, "Rebuilt sessions");

    rebuild_state(conn, tables).await
}

/// Point every pair at its latest session
pub async fn rebuild_state(conn: &mut SqliteConnection, tables: &SiteTables) -> StoreResult<()> {
    sqlx::query(&format!("DELETE FROM {}", tables.session_state))
        .execute(&mut *conn)
        .await?;

    let sql = format!(
        r#"
        INSERT INTO {state} (ip_id, ua_id, session_id, last_ts)
        SELECT ip_id, ua_id, id, end_ts
        FROM (
            SELECT id, ip_id, ua_id, end_ts,
                   ROW_NUMBER() OVER (
                       PARTITION BY ip_id, ua_id ORDER BY end_ts DESC, id DESC
                   ) AS rn
            FROM {sessions}
        )
        WHERE rn = 1
        "#,
        state = tables.session_state,
        sessions = tables.sessions,
    );
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

/// Count sessions starting in `[start, end)` by day and entry URL
async fn accumulate_starts(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    start: i64,
    end: i64,
) -> StoreResult<SessionAggregateBatch> {
    let sql = format!(
        "SELECT start_ts, entry_url_id FROM {} WHERE start_ts >= ? AND start_ts < ?",
        tables.sessions
    );
    let rows: Vec<(i64, i64)> = sqlx::query_as(&sql)
        .bind(start)
        .bind(end)
        .fetch_all(&mut *conn)
        .await?;

    let mut batch = SessionAggregateBatch::new();
    for (start_ts, entry_url_id) in rows {
        batch.record_start(start_ts, entry_url_id);
    }
    Ok(batch)
}

/// Recompute both session aggregate tables from the sessions table
pub async fn rebuild_aggregates(conn: &mut SqliteConnection, tables: &SiteTables) -> StoreResult<()> {
    for table in [&tables.agg_session_daily, &tables.agg_entry_daily] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *conn)
            .await?;
    }

    let batch = accumulate_starts(conn, tables, i64::MIN, i64::MAX).await?;
    apply_aggregates(conn, tables, &batch).await
}

/// Recompute the session aggregates of one day
pub async fn rebuild_aggregates_for_day(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    day: &str,
) -> StoreResult<()> {
    let (start, end) = day_bounds(day)?;
    for table in [&tables.agg_session_daily, &tables.agg_entry_daily] {
        sqlx::query(&format!("DELETE FROM {table} WHERE day = ?"))
            .bind(day)
            .execute(&mut *conn)
            .await?;
    }

    let batch = accumulate_starts(conn, tables, start, end).await?;
    apply_aggregates(conn, tables, &batch).await
}

/// Re-derive sessions that began before `cutoff` but continue after it from
/// their surviving page views; returns the days they now start on
async fn trim_straddling(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    cutoff: i64,
) -> StoreResult<BTreeSet<String>> {
    let sql = format!(
        "SELECT id, ip_id, ua_id, end_ts FROM {} WHERE start_ts < ? AND end_ts >= ?",
        tables.sessions
    );
    let straddling: Vec<(i64, i64, i64, i64)> = sqlx::query_as(&sql)
        .bind(cutoff)
        .bind(cutoff)
        .fetch_all(&mut *conn)
        .await?;

    let first_view = format!(
        r#"
        SELECT timestamp, url_id, location_id, COUNT(*) OVER () AS page_count
        FROM {}
        WHERE pageview_flag = 1 AND ip_id = ? AND ua_id = ?
          AND timestamp >= ? AND timestamp <= ?
        ORDER BY timestamp, id
        LIMIT 1
        "#,
        tables.logs
    );
    let update = format!(
        r#"
        UPDATE {}
        SET start_ts = ?, entry_url_id = ?, location_id = ?, page_count = ?
        WHERE id = ?
        "#,
        tables.sessions
    );

    let mut days = BTreeSet::new();
    for (id, ip_id, ua_id, end_ts) in straddling {
        let first: Option<(i64, i64, i64, i64)> = sqlx::query_as(&first_view)
            .bind(ip_id)
            .bind(ua_id)
            .bind(cutoff)
            .bind(end_ts)
            .fetch_optional(&mut *conn)
            .await?;

        // No surviving view: the session is removed with the expired ones
        let Some((start_ts, entry_url_id, location_id, page_count)) = first else {
            continue;
        };
        sqlx::query(&update)
            .bind(start_ts)
            .bind(entry_url_id)
            .bind(location_id)
            .bind(page_count)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        days.insert(day_bucket(start_ts));
    }
    Ok(days)
}

/// Bring sessions and their aggregates in line with raw events that now
/// start at `cutoff`
pub async fn expire_before(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    cutoff: i64,
) -> StoreResult<()> {
    let mut days = trim_straddling(conn, tables, cutoff).await?;

    let removed = sqlx::query(&format!("DELETE FROM {} WHERE start_ts < ?", tables.sessions))
        .bind(cutoff)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    debug!(site = %tables.site(), removed, "Expired sessions");

    rebuild_state(conn, tables).await?;

    let cutoff_day = day_bucket(cutoff);
    for table in [&tables.agg_session_daily, &tables.agg_entry_daily] {
        sqlx::query(&format!("DELETE FROM {table} WHERE day < ?"))
            .bind(cutoff_day.as_str())
            .execute(&mut *conn)
            .await?;
    }

    days.insert(cutoff_day);
    for day in &days {
        rebuild_aggregates_for_day(conn, tables, day).await?;
    }
    Ok(())
}
