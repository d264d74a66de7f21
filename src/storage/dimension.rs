//! Dimension normalization
//!
//! Repeating natural values (client address, URL, referer, user-agent triple,
//! location pair) are replaced by integer surrogate keys. Resolution is a
//! single upsert that returns the key of the new or existing row, fronted by
//! a cache that lives for one transaction.

use std::collections::HashMap;

use crate::models::LogRecord;
use crate::storage::tables::SiteTables;
use crate::storage::StoreResult;
use sqlx::SqliteConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionKind {
    Ip,
    Url,
    Referer,
    UserAgent,
    Location,
}

impl DimensionKind {
    pub const ALL: [DimensionKind; 5] = [
        DimensionKind::Ip,
        DimensionKind::Url,
        DimensionKind::Referer,
        DimensionKind::UserAgent,
        DimensionKind::Location,
    ];

    fn slot(self) -> usize {
        self as usize
    }

    /// Natural value columns, in bind order
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            DimensionKind::Ip => &["ip"],
            DimensionKind::Url => &["url"],
            DimensionKind::Referer => &["referer"],
            DimensionKind::UserAgent => &["browser", "os", "device"],
            DimensionKind::Location => &["domestic", "global"],
        }
    }

    pub fn table(self, tables: &SiteTables) -> &str {
        match self {
            DimensionKind::Ip => &tables.dim_ip,
            DimensionKind::Url => &tables.dim_url,
            DimensionKind::Referer => &tables.dim_referer,
            DimensionKind::UserAgent => &tables.dim_ua,
            DimensionKind::Location => &tables.dim_location,
        }
    }

    /// Raw event column holding this dimension's key
    pub fn reference_column(self) -> &'static str {
        match self {
            DimensionKind::Ip => "ip_id",
            DimensionKind::Url => "url_id",
            DimensionKind::Referer => "referer_id",
            DimensionKind::UserAgent => "ua_id",
            DimensionKind::Location => "location_id",
        }
    }

    fn upsert_sql(self, tables: &SiteTables) -> String {
        let columns = self.columns();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let column_list = columns.join(", ");
        // A no-op update makes RETURNING yield the existing row on conflict
        format!(
            "INSERT INTO {table} ({column_list}) VALUES ({placeholders}) \
             ON CONFLICT({column_list}) DO UPDATE SET {first} = excluded.{first} \
             RETURNING id",
            table = self.table(tables),
            first = columns[0],
        )
    }
}

/// Natural values of one dimension row, in column order
pub type NaturalKey = Vec<String>;

pub fn natural_key(values: &[&str]) -> NaturalKey {
    values.iter().map(|value| value.to_string()).collect()
}

/// Natural value to surrogate key, one map per kind
#[derive(Debug, Default)]
pub struct DimensionCache {
    keys: [HashMap<NaturalKey, i64>; 5],
}

impl DimensionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: DimensionKind, key: &[String]) -> Option<i64> {
        self.keys[kind.slot()].get(key).copied()
    }

    pub fn insert(&mut self, kind: DimensionKind, key: NaturalKey, id: i64) {
        self.keys[kind.slot()].insert(key, id);
    }

    pub fn len(&self) -> usize {
        self.keys.iter().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Surrogate keys of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedKeys {
    pub ip_id: i64,
    pub url_id: i64,
    pub referer_id: i64,
    pub ua_id: i64,
    pub location_id: i64,
}

pub async fn resolve(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    cache: &mut DimensionCache,
    kind: DimensionKind,
    values: &[&str],
) -> StoreResult<i64> {
    let key = natural_key(values);
    if let Some(id) = cache.get(kind, &key) {
        return Ok(id);
    }

    let sql = kind.upsert_sql(tables);
    let mut query = sqlx::query_scalar::<_, i64>(&sql);
    for value in values {
        query = query.bind(*value);
    }
    let id = query.fetch_one(&mut *conn).await?;

    cache.insert(kind, key, id);
    Ok(id)
}

pub async fn resolve_record(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    cache: &mut DimensionCache,
    record: &LogRecord,
) -> StoreResult<ResolvedKeys> {
    Ok(ResolvedKeys {
        ip_id: resolve(conn, tables, cache, DimensionKind::Ip, &[record.ip.as_str()]).await?,
        url_id: resolve(conn, tables, cache, DimensionKind::Url, &[record.url.as_str()]).await?,
        referer_id: resolve(conn, tables, cache, DimensionKind::Referer, &[record.referer.as_str()])
            .await?,
        ua_id: resolve(
            conn,
            tables,
            cache,
            DimensionKind::UserAgent,
            &[
                record.browser.as_str(),
                record.os.as_str(),
                record.device.as_str(),
            ],
        )
        .await?,
        location_id: resolve(
            conn,
            tables,
            cache,
            DimensionKind::Location,
            &[
                record.domestic_location.as_str(),
                record.global_location.as_str(),
            ],
        )
        .await?,
    })
}

/// Delete dimension rows no raw event references; returns rows removed
pub async fn sweep_orphans(conn: &mut SqliteConnection, tables: &SiteTables) -> StoreResult<u64> {
    let mut removed = 0;
    for kind in DimensionKind::ALL {
        let sql = format!(
            "DELETE FROM {dim} WHERE id NOT IN (SELECT {column} FROM {logs})",
            dim = kind.table(tables),
            column = kind.reference_column(),
            logs = tables.logs,
        );
        removed += sqlx::query(&sql).execute(&mut *conn).await?.rows_affected();
    }
    Ok(removed)
}
