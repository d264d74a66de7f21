//! Hourly and daily traffic aggregates
//!
//! Deltas collected in an [`AggregateBatch`] are merged with additive upserts.
//! Rebuilds stream raw events (paged by id) through the same batch type, so a
//! rebuilt bucket is computed exactly like an incrementally maintained one.

use crate::analytics::aggregator::{AggregateBatch, EventFacts, TrafficCounts};
use crate::analytics::buckets::{day_bounds, day_bucket, hour_bounds, hour_bucket};
use crate::storage::tables::SiteTables;
use crate::storage::StoreResult;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::SqliteConnection;

/// Raw events read per query while rebuilding
const REBUILD_PAGE_SIZE: i64 = 5000;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_counts<'q>(query: SqliteQuery<'q>, counts: &TrafficCounts) -> SqliteQuery<'q> {
    query
        .bind(counts.pageviews)
        .bind(counts.traffic)
        .bind(counts.s2xx)
        .bind(counts.s3xx)
        .bind(counts.s4xx)
        .bind(counts.s5xx)
        .bind(counts.other)
}

fn counter_upsert_sql(table: &str, key: &str) -> String {
    format!(
        r#"
        INSERT INTO {table} ({key}, pv, traffic, s2xx, s3xx, s4xx, s5xx, other)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT({key}) DO UPDATE SET
            pv = pv + excluded.pv,
            traffic = traffic + excluded.traffic,
            s2xx = s2xx + excluded.s2xx,
            s3xx = s3xx + excluded.s3xx,
            s4xx = s4xx + excluded.s4xx,
            s5xx = s5xx + excluded.s5xx,
            other = other + excluded.other
        "#
    )
}

/// Merge the hourly half of a batch
pub async fn apply_hourly(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    batch: &AggregateBatch,
) -> StoreResult<()> {
    let upsert = counter_upsert_sql(&tables.agg_hourly, "bucket");
    for (bucket, counts) in batch.hourly() {
        let query = sqlx::query(&upsert).bind(*bucket);
        bind_counts(query, counts).execute(&mut *conn).await?;
    }

    let membership = format!(
        "INSERT OR IGNORE INTO {} (bucket, ip_id) VALUES (?, ?)",
        tables.agg_hourly_ip
    );
    for (bucket, visitors) in batch.hourly_visitors() {
        for ip_id in visitors {
            sqlx::query(&membership)
                .bind(*bucket)
                .bind(*ip_id)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

/// Merge the daily half of a batch
pub async fn apply_daily(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    batch: &AggregateBatch,
) -> StoreResult<()> {
    let upsert = counter_upsert_sql(&tables.agg_daily, "day");
    for (day, counts) in batch.daily() {
        let query = sqlx::query(&upsert).bind(day.as_str());
        bind_counts(query, counts).execute(&mut *conn).await?;
    }

    let membership = format!(
        "INSERT OR IGNORE INTO {} (day, ip_id) VALUES (?, ?)",
        tables.agg_daily_ip
    );
    for (day, visitors) in batch.daily_visitors() {
        for ip_id in visitors {
            sqlx::query(&membership)
                .bind(day.as_str())
                .bind(*ip_id)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

pub async fn apply_batch(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    batch: &AggregateBatch,
) -> StoreResult<()> {
    if batch.is_empty() {
        return Ok(());
    }
    apply_hourly(conn, tables, batch).await?;
    apply_daily(conn, tables, batch).await
}

/// (id, ip_id, pageview_flag, timestamp, status_code, bytes_sent)
type EventRow = (i64, i64, i64, i64, i64, i64);

/// Raw events with `start <= timestamp < end` and `id > after`, one page
async fn fetch_page(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    after: i64,
    start: i64,
    end: i64,
) -> StoreResult<Vec<EventRow>> {
    let sql = format!(
        r#"
        SELECT id, ip_id, pageview_flag, timestamp, status_code, bytes_sent
        FROM {}
        WHERE id > ? AND timestamp >= ? AND timestamp < ?
        ORDER BY id
        LIMIT ?
        "#,
        tables.logs
    );
    let rows = sqlx::query_as(&sql)
        .bind(after)
        .bind(start)
        .bind(end)
        .bind(REBUILD_PAGE_SIZE)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/// Add a page to `batch`; returns the last id read
fn fold_page(batch: &mut AggregateBatch, rows: &[EventRow], after: i64) -> i64 {
    let mut last_id = after;
    for (id, ip_id, pageview_flag, timestamp, status, bytes_sent) in rows {
        batch.add(&EventFacts {
            visitor_id: *ip_id,
            pageview: *pageview_flag != 0,
            timestamp: *timestamp,
            status: *status,
            bytes_sent: *bytes_sent,
        });
        last_id = *id;
    }
    last_id
}

fn is_last_page(rows: &[EventRow]) -> bool {
    (rows.len() as i64) < REBUILD_PAGE_SIZE
}

/// Fold raw events with `start <= timestamp < end` into a fresh batch
pub async fn accumulate_range(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    start: i64,
    end: i64,
) -> StoreResult<AggregateBatch> {
    let mut batch = AggregateBatch::new();
    let mut last_id = 0_i64;
    loop {
        let rows = fetch_page(conn, tables, last_id, start, end).await?;
        last_id = fold_page(&mut batch, &rows, last_id);
        if is_last_page(&rows) {
            return Ok(batch);
        }
    }
}

/// Recompute all four aggregate tables from raw events
///
/// Each page is merged as soon as it is read. The upserts are additive, so
/// the result matches folding the whole table into one batch.
pub async fn backfill(conn: &mut SqliteConnection, tables: &SiteTables) -> StoreResult<()> {
    for table in [
        &tables.agg_hourly,
        &tables.agg_hourly_ip,
        &tables.agg_daily,
        &tables.agg_daily_ip,
    ] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *conn)
            .await?;
    }

    let mut last_id = 0_i64;
    loop {
        let rows = fetch_page(conn, tables, last_id, i64::MIN, i64::MAX).await?;
        let mut batch = AggregateBatch::new();
        last_id = fold_page(&mut batch, &rows, last_id);
        apply_batch(conn, tables, &batch).await?;
        if is_last_page(&rows) {
            return Ok(());
        }
    }
}

/// Recompute one hour bucket from the raw events inside it
pub async fn rebuild_hour(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    bucket: i64,
) -> StoreResult<()> {
    for table in [&tables.agg_hourly, &tables.agg_hourly_ip] {
        sqlx::query(&format!("DELETE FROM {table} WHERE bucket = ?"))
            .bind(bucket)
            .execute(&mut *conn)
            .await?;
    }

    let (start, end) = hour_bounds(bucket);
    let batch = accumulate_range(conn, tables, start, end).await?;
    apply_hourly(conn, tables, &batch).await
}

/// Recompute one day bucket from the raw events inside it
pub async fn rebuild_day(conn: &mut SqliteConnection, tables: &SiteTables, day: &str) -> StoreResult<()> {
    let (start, end) = day_bounds(day)?;
    for table in [&tables.agg_daily, &tables.agg_daily_ip] {
        sqlx::query(&format!("DELETE FROM {table} WHERE day = ?"))
            .bind(day)
            .execute(&mut *conn)
            .await?;
    }

    let batch = accumulate_range(conn, tables, start, end).await?;
    apply_daily(conn, tables, &batch).await
}

/// After raw events older than `cutoff` are gone: drop buckets that lie
/// wholly before it and rebuild the hour and day that contain it
pub async fn expire_before(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    cutoff: i64,
) -> StoreResult<()> {
    let boundary_hour = hour_bucket(cutoff);
    let boundary_day = day_bucket(cutoff);

    for table in [&tables.agg_hourly, &tables.agg_hourly_ip] {
        sqlx::query(&format!("DELETE FROM {table} WHERE bucket < ?"))
            .bind(boundary_hour)
            .execute(&mut *conn)
            .await?;
    }
    for table in [&tables.agg_daily, &tables.agg_daily_ip] {
        sqlx::query(&format!("DELETE FROM {table} WHERE day < ?"))
            .bind(boundary_day.as_str())
            .execute(&mut *conn)
            .await?;
    }

    rebuild_hour(conn, tables, boundary_hour).await?;
    rebuild_day(conn, tables, &boundary_day).await
}
