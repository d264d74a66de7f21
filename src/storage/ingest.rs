use crate::analytics::aggregator::{AggregateBatch, EventFacts, SessionAggregateBatch};
use crate::analytics::sessionizer::SessionCache;
use crate::models::LogRecord;
use crate::storage::dimension::{resolve_record, DimensionCache};
use crate::storage::session::{self, PageView};
use crate::storage::tables::SiteTables;
use crate::storage::{aggregate, first_seen, StoreResult};
use sqlx::SqliteConnection;

/// Write one batch inside the caller's transaction
///
/// Caches and pending deltas live only for this call. Aggregates are merged
/// after every record has been written, one upsert per bucket touched.
pub async fn ingest_batch(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    records: &[LogRecord],
) -> StoreResult<()> {
    let mut dimensions = DimensionCache::new();
    let mut sessions = SessionCache::new();
    let mut aggregates = AggregateBatch::new();
    let mut session_starts = SessionAggregateBatch::new();

    let insert = format!(
        r#"
        INSERT INTO {} (
            ip_id, pageview_flag, timestamp, method, url_id,
            status_code, bytes_sent, referer_id, ua_id, location_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        tables.logs
    );

    for record in records {
        let keys = resolve_record(conn, tables, &mut dimensions, record).await?;

        sqlx::query(&insert)
            .bind(keys.ip_id)
            .bind(i64::from(record.pageview))
            .bind(record.timestamp)
            .bind(record.method.as_str())
            .bind(keys.url_id)
            .bind(i64::from(record.status))
            .bind(record.bytes_sent)
            .bind(keys.referer_id)
            .bind(keys.ua_id)
            .bind(keys.location_id)
            .execute(&mut *conn)
            .await?;

        if record.pageview {
            first_seen::record(conn, tables, keys.ip_id, record.timestamp).await?;
            let view = PageView {
                ip_id: keys.ip_id,
                ua_id: keys.ua_id,
                location_id: keys.location_id,
                url_id: keys.url_id,
                timestamp: record.timestamp,
            };
            session::track_pageview(conn, tables, &mut sessions, &mut session_starts, &view)
                .await?;
        }

        aggregates.add(&EventFacts {
            visitor_id: keys.ip_id,
            pageview: record.pageview,
            timestamp: record.timestamp,
            status: i64::from(record.status),
            bytes_sent: record.bytes_sent,
        });
    }

    aggregate::apply_batch(conn, tables, &aggregates).await?;
    session::apply_aggregates(conn, tables, &session_starts).await
}
