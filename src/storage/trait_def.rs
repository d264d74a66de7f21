use crate::models::LogRecord;
use crate::storage::lifecycle::SchemaAction;
use crate::storage::retention::PurgeReport;
use crate::storage::snapshot::SiteSnapshot;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid site id {0:?}")]
    InvalidSiteId(String),
    #[error("no access log table for site {0:?}")]
    UnknownSite(String),
    #[error("site {0:?} still has a legacy access log table")]
    LegacySchema(String),
    #[error("unresolvable time bucket: {0}")]
    InvalidBucket(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Bring every tracked site's table set up to the current schema
    async fn init(&self, sites: &[String]) -> StoreResult<()>;

    /// Create, migrate or upgrade one site's tables in a single transaction
    async fn ensure_site_schema(&self, site: &str) -> StoreResult<SchemaAction>;

    /// Ingest one batch for a site; all or nothing
    async fn ingest(&self, site: &str, records: &[LogRecord]) -> StoreResult<()>;

    /// Drop raw events older than `retention_days` across all sites
    /// (non-positive values fall back to the default horizon)
    async fn purge(&self, retention_days: i64) -> StoreResult<PurgeReport>;

    /// Drop raw events with `timestamp < cutoff` across all sites
    async fn purge_before(&self, cutoff: i64) -> StoreResult<PurgeReport>;

    /// Delete every row of one site's tables
    async fn clear_site(&self, site: &str) -> StoreResult<()>;

    /// Delete every row of every site's tables
    async fn clear_all(&self) -> StoreResult<()>;

    /// Recompute every derived table of a site from its raw events
    async fn rebuild_site(&self, site: &str) -> StoreResult<()>;

    /// Site ids with an access log table in the database
    async fn sites(&self) -> StoreResult<Vec<String>>;

    /// Read every derived table of a site in canonical order
    async fn snapshot(&self, site: &str) -> StoreResult<SiteSnapshot>;
}
