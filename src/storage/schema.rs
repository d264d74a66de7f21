//! DDL and catalog queries for per-site table sets

use crate::storage::tables::{site_from_logs_table, SiteTables};
use crate::storage::StoreResult;
use sqlx::SqliteConnection;

async fn execute_all(conn: &mut SqliteConnection, statements: &[String]) -> StoreResult<()> {
    for statement in statements {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Whether a table with this unquoted name exists
pub async fn table_exists(conn: &mut SqliteConnection, name: &str) -> StoreResult<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;
    Ok(count > 0)
}

pub async fn table_has_column(
    conn: &mut SqliteConnection,
    name: &str,
    column: &str,
) -> StoreResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
        .bind(name)
        .bind(column)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count > 0)
}

/// Whether a (quoted) table holds at least one row
pub async fn table_has_rows(conn: &mut SqliteConnection, table: &str) -> StoreResult<bool> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table})");
    let exists: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *conn).await?;
    Ok(exists != 0)
}

/// Site ids that have a raw log table, sorted
pub async fn list_site_ids(conn: &mut SqliteConnection) -> StoreResult<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT name FROM sqlite_master
        WHERE type = 'table' AND name LIKE '%\_access\_logs' ESCAPE '\'
        ORDER BY name
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(names
        .iter()
        .filter_map(|name| site_from_logs_table(name))
        .map(str::to_string)
        .collect())
}

pub async fn create_dimension_tables(conn: &mut SqliteConnection, t: &SiteTables) -> StoreResult<()> {
    execute_all(
        conn,
        &[
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ip TEXT NOT NULL UNIQUE
                )
                "#,
                t.dim_ip
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    url TEXT NOT NULL UNIQUE
                )
                "#,
                t.dim_url
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    referer TEXT NOT NULL UNIQUE
                )
                "#,
                t.dim_referer
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    browser TEXT NOT NULL,
                    os TEXT NOT NULL,
                    device TEXT NOT NULL,
                    UNIQUE(browser, os, device)
                )
                "#,
                t.dim_ua
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    domestic TEXT NOT NULL,
                    global TEXT NOT NULL,
                    UNIQUE(domestic, global)
                )
                "#,
                t.dim_location
            ),
        ],
    )
    .await
}

/// Normalized raw event table under the given quoted name
pub async fn create_log_table(conn: &mut SqliteConnection, table: &str) -> StoreResult<()> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ip_id INTEGER NOT NULL,
            pageview_flag INTEGER NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL,
            method TEXT NOT NULL,
            url_id INTEGER NOT NULL,
            status_code INTEGER NOT NULL,
            bytes_sent INTEGER NOT NULL,
            referer_id INTEGER NOT NULL,
            ua_id INTEGER NOT NULL,
            location_id INTEGER NOT NULL
        )
        "#
    );
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

pub async fn create_log_indexes(conn: &mut SqliteConnection, t: &SiteTables) -> StoreResult<()> {
    execute_all(
        conn,
        &[
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}(timestamp)",
                t.index("timestamp"),
                t.logs
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}(pageview_flag, timestamp, ip_id)",
                t.index("pv_ts_ip"),
                t.logs
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}(pageview_flag, ip_id, ua_id, timestamp)",
                t.index("session_key"),
                t.logs
            ),
        ],
    )
    .await
}

pub async fn create_aggregate_tables(conn: &mut SqliteConnection, t: &SiteTables) -> StoreResult<()> {
    let counters = r#"
        pv INTEGER NOT NULL DEFAULT 0,
        traffic INTEGER NOT NULL DEFAULT 0,
        s2xx INTEGER NOT NULL DEFAULT 0,
        s3xx INTEGER NOT NULL DEFAULT 0,
        s4xx INTEGER NOT NULL DEFAULT 0,
        s5xx INTEGER NOT NULL DEFAULT 0,
        other INTEGER NOT NULL DEFAULT 0
    "#;
    execute_all(
        conn,
        &[
            format!(
                "CREATE TABLE IF NOT EXISTS {} (bucket INTEGER PRIMARY KEY, {counters})",
                t.agg_hourly
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    bucket INTEGER NOT NULL,
                    ip_id INTEGER NOT NULL,
                    PRIMARY KEY(bucket, ip_id)
                )
                "#,
                t.agg_hourly_ip
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (day TEXT PRIMARY KEY, {counters})",
                t.agg_daily
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    day TEXT NOT NULL,
                    ip_id INTEGER NOT NULL,
                    PRIMARY KEY(day, ip_id)
                )
                "#,
                t.agg_daily_ip
            ),
        ],
    )
    .await
}

pub async fn create_first_seen_table(conn: &mut SqliteConnection, t: &SiteTables) -> StoreResult<()> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            ip_id INTEGER PRIMARY KEY,
            first_ts INTEGER NOT NULL
        )
        "#,
        t.first_seen
    );
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

pub async fn create_session_tables(conn: &mut SqliteConnection, t: &SiteTables) -> StoreResult<()> {
    execute_all(
        conn,
        &[
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ip_id INTEGER NOT NULL,
                    ua_id INTEGER NOT NULL,
                    location_id INTEGER NOT NULL,
                    start_ts INTEGER NOT NULL,
                    end_ts INTEGER NOT NULL,
                    entry_url_id INTEGER NOT NULL,
                    exit_url_id INTEGER NOT NULL,
                    page_count INTEGER NOT NULL DEFAULT 1
                )
                "#,
                t.sessions
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}(start_ts)",
                t.index("sessions_start"),
                t.sessions
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}(ip_id, ua_id, end_ts)",
                t.index("sessions_key"),
                t.sessions
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    ip_id INTEGER NOT NULL,
                    ua_id INTEGER NOT NULL,
                    session_id INTEGER NOT NULL,
                    last_ts INTEGER NOT NULL,
                    PRIMARY KEY(ip_id, ua_id)
                )
                "#,
                t.session_state
            ),
        ],
    )
    .await
}

pub async fn create_session_aggregate_tables(
    conn: &mut SqliteConnection,
    t: &SiteTables,
) -> StoreResult<()> {
    execute_all(
        conn,
        &[
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    day TEXT PRIMARY KEY,
                    sessions INTEGER NOT NULL DEFAULT 0
                )
                "#,
                t.agg_session_daily
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    day TEXT NOT NULL,
                    entry_url_id INTEGER NOT NULL,
                    count INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY(day, entry_url_id)
                )
                "#,
                t.agg_entry_daily
            ),
        ],
    )
    .await
}

/// Every table computed from raw events
pub async fn create_derived_tables(conn: &mut SqliteConnection, t: &SiteTables) -> StoreResult<()> {
    create_aggregate_tables(conn, t).await?;
    create_first_seen_table(conn, t).await?;
    create_session_tables(conn, t).await?;
    create_session_aggregate_tables(conn, t).await
}

/// The complete normalized table set, idempotently
pub async fn create_site_schema(conn: &mut SqliteConnection, t: &SiteTables) -> StoreResult<()> {
    create_dimension_tables(conn, t).await?;
    create_log_table(conn, &t.logs).await?;
    create_log_indexes(conn, t).await?;
    create_derived_tables(conn, t).await
}
