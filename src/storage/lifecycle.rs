//! Schema lifecycle: create, migrate legacy tables, backfill derived tables
//!
//! Everything here runs inside the transaction the caller opened, so an
//! interrupted migration or backfill leaves the previous schema untouched and
//! the next start simply tries again.

use std::fmt;

use crate::storage::schema::{self, table_exists, table_has_column, table_has_rows};
use crate::storage::tables::SiteTables;
use crate::storage::{aggregate, first_seen, session, StoreResult};
use sqlx::SqliteConnection;
use tracing::info;

/// A group of derived tables that is backfilled as a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedSet {
    Aggregates,
    FirstSeen,
    Sessions,
    SessionAggregates,
}

impl fmt::Display for DerivedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DerivedSet::Aggregates => "aggregates",
            DerivedSet::FirstSeen => "first-seen",
            DerivedSet::Sessions => "sessions",
            DerivedSet::SessionAggregates => "session aggregates",
        };
        f.write_str(name)
    }
}

/// What [`ensure_schema`] had to do for a site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaAction {
    /// No tables existed; an empty normalized schema was created
    Created,
    /// A legacy inline-value log table was converted and fully backfilled
    Migrated { rows: u64 },
    /// The normalized schema existed; listed sets were empty and backfilled
    Upgraded { backfilled: Vec<DerivedSet> },
}

pub async fn ensure_schema(conn: &mut SqliteConnection, tables: &SiteTables) -> StoreResult<SchemaAction> {
    let logs_name = tables.logs_name();

    if !table_exists(conn, &logs_name).await? {
        schema::create_site_schema(conn, tables).await?;
        info!(site = %tables.site(), "Created site tables");
        return Ok(SchemaAction::Created);
    }

    if !table_has_column(conn, &logs_name, "ip_id").await? {
        let rows = migrate_legacy(conn, tables).await?;
        return Ok(SchemaAction::Migrated { rows });
    }

    schema::create_site_schema(conn, tables).await?;
    let backfilled = backfill_missing(conn, tables).await?;
    if !backfilled.is_empty() {
        let sets: Vec<String> = backfilled.iter().map(ToString::to_string).collect();
        info!(site = %tables.site(), backfilled = %sets.join(", "), "Backfilled derived tables");
    }
    Ok(SchemaAction::Upgraded { backfilled })
}

/// Convert an inline-value log table into dimensions plus a keyed log table
pub async fn migrate_legacy(conn: &mut SqliteConnection, tables: &SiteTables) -> StoreResult<u64> {
    info!(site = %tables.site(), "Migrating legacy access log table");

    sqlx::query(&format!("DROP TABLE IF EXISTS {}", tables.logs_staging))
        .execute(&mut *conn)
        .await?;
    schema::create_dimension_tables(conn, tables).await?;
    schema::create_log_table(conn, &tables.logs_staging).await?;
    schema::create_derived_tables(conn, tables).await?;

    let legacy = &tables.logs;
    let dimension_fills = [
        format!(
            "INSERT OR IGNORE INTO {} (ip) SELECT DISTINCT COALESCE(ip, '') FROM {legacy}",
            tables.dim_ip
        ),
        format!(
            "INSERT OR IGNORE INTO {} (url) SELECT DISTINCT COALESCE(url, '') FROM {legacy}",
            tables.dim_url
        ),
        format!(
            "INSERT OR IGNORE INTO {} (referer) SELECT DISTINCT COALESCE(referer, '') FROM {legacy}",
            tables.dim_referer
        ),
        format!(
            r#"
            INSERT OR IGNORE INTO {} (browser, os, device)
            SELECT DISTINCT COALESCE(user_browser, ''), COALESCE(user_os, ''), COALESCE(user_device, '')
            FROM {legacy}
            "#,
            tables.dim_ua
        ),
        format!(
            r#"
            INSERT OR IGNORE INTO {} (domestic, global)
            SELECT DISTINCT COALESCE(domestic_location, ''), COALESCE(global_location, '')
            FROM {legacy}
            "#,
            tables.dim_location
        ),
    ];
    for sql in &dimension_fills {
        sqlx::query(sql).execute(&mut *conn).await?;
    }

    let copy = format!(
        r#"
        INSERT INTO {staging} (
            ip_id, pageview_flag, timestamp, method, url_id,
            status_code, bytes_sent, referer_id, ua_id, location_id
        )
        SELECT ip.id, COALESCE(l.pageview_flag, 0), l.timestamp, COALESCE(l.method, ''), url.id,
               COALESCE(l.status_code, 0), COALESCE(l.bytes_sent, 0), ref.id, ua.id, loc.id
        FROM {legacy} l
        JOIN {dim_ip} ip ON ip.ip = COALESCE(l.ip, '')
        JOIN {dim_url} url ON url.url = COALESCE(l.url, '')
        JOIN {dim_referer} ref ON ref.referer = COALESCE(l.referer, '')
        JOIN {dim_ua} ua
            ON ua.browser = COALESCE(l.user_browser, '')
           AND ua.os = COALESCE(l.user_os, '')
           AND ua.device = COALESCE(l.user_device, '')
        JOIN {dim_location} loc
            ON loc.domestic = COALESCE(l.domestic_location, '')
           AND loc.global = COALESCE(l.global_location, '')
        ORDER BY l.rowid
        "#,
        staging = tables.logs_staging,
        dim_ip = tables.dim_ip,
        dim_url = tables.dim_url,
        dim_referer = tables.dim_referer,
        dim_ua = tables.dim_ua,
        dim_location = tables.dim_location,
    );
    let rows = sqlx::query(&copy).execute(&mut *conn).await?.rows_affected();

    sqlx::query(&format!("DROP TABLE {legacy}"))
        .execute(&mut *conn)
        .await?;
    sqlx::query(&format!(
        "ALTER TABLE {} RENAME TO {legacy}",
        tables.logs_staging
    ))
    .execute(&mut *conn)
    .await?;
    schema::create_log_indexes(conn, tables).await?;

    backfill_all(conn, tables).await?;
    info!(site = %tables.site(), rows, "Legacy migration complete");
    Ok(rows)
}

/// Recompute every derived table from raw events
pub async fn backfill_all(conn: &mut SqliteConnection, tables: &SiteTables) -> StoreResult<()> {
    aggregate::backfill(conn, tables).await?;
    first_seen::rebuild(conn, tables).await?;
    session::rebuild_sessions(conn, tables).await?;
    session::rebuild_aggregates(conn, tables).await
}

async fn has_pageviews(conn: &mut SqliteConnection, tables: &SiteTables) -> StoreResult<bool> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE pageview_flag = 1)",
        tables.logs
    );
    let exists: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *conn).await?;
    Ok(exists != 0)
}

/// Backfill derived sets that are empty while their source is not
pub async fn backfill_missing(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
) -> StoreResult<Vec<DerivedSet>> {
    let mut backfilled = Vec::new();
    if !table_has_rows(conn, &tables.logs).await? {
        return Ok(backfilled);
    }

    if !table_has_rows(conn, &tables.agg_hourly).await? {
        aggregate::backfill(conn, tables).await?;
        backfilled.push(DerivedSet::Aggregates);
    }

    // First-seen rows and sessions only come from page views
    let has_pageviews = has_pageviews(conn, tables).await?;
    if has_pageviews && !table_has_rows(conn, &tables.first_seen).await? {
        first_seen::rebuild(conn, tables).await?;
        backfilled.push(DerivedSet::FirstSeen);
    }
    if has_pageviews && !table_has_rows(conn, &tables.sessions).await? {
        session::rebuild_sessions(conn, tables).await?;
        backfilled.push(DerivedSet::Sessions);
    }

    let session_aggregates_missing = !table_has_rows(conn, &tables.agg_session_daily).await?
        || !table_has_rows(conn, &tables.agg_entry_daily).await?;
    if session_aggregates_missing && table_has_rows(conn, &tables.sessions).await? {
        session::rebuild_aggregates(conn, tables).await?;
        backfilled.push(DerivedSet::SessionAggregates);
    }
    Ok(backfilled)
}
