use crate::storage::tables::SiteTables;
use crate::storage::StoreResult;
use sqlx::SqliteConnection;

/// Record a page view, keeping the earliest timestamp per visitor
pub async fn record(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    ip_id: i64,
    timestamp: i64,
) -> StoreResult<()> {
    let sql = format!(
        r#"
        INSERT INTO {} (ip_id, first_ts) VALUES (?, ?)
        ON CONFLICT(ip_id) DO UPDATE SET first_ts = MIN(first_ts, excluded.first_ts)
        "#,
        tables.first_seen
    );
    sqlx::query(&sql)
        .bind(ip_id)
        .bind(timestamp)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Replace the table with the earliest page view of every visitor
pub async fn rebuild(conn: &mut SqliteConnection, tables: &SiteTables) -> StoreResult<()> {
    sqlx::query(&format!("DELETE FROM {}", tables.first_seen))
        .execute(&mut *conn)
        .await?;

    let sql = format!(
        r#"
        INSERT INTO {} (ip_id, first_ts)
        SELECT ip_id, MIN(timestamp)
        FROM {}
        WHERE pageview_flag = 1
        GROUP BY ip_id
        "#,
        tables.first_seen, tables.logs
    );
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}
