use crate::analytics::check_timestamp;
use crate::models::LogRecord;
use crate::storage::ingest::ingest_batch;
use crate::storage::lifecycle::{self, SchemaAction};
use crate::storage::locks::SiteLocks;
use crate::storage::retention::{self, PurgeReport};
use crate::storage::schema::{self, table_exists, table_has_column};
use crate::storage::snapshot::{self, SiteSnapshot};
use crate::storage::tables::SiteTables;
use crate::storage::{LogStore, StoreError, StoreResult};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Connection, SqliteConnection, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub struct SqliteStore {
    pool: Arc<SqlitePool>,
    locks: SiteLocks,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and check it answers
    pub async fn new(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let mut conn = pool.acquire().await?;
        conn.ping().await?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
            locks: SiteLocks::new(),
        })
    }

    /// Private in-memory database
    ///
    /// Every pool connection would open its own empty database, so the pool
    /// holds exactly one connection and never recycles it.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool: Arc::new(pool),
            locks: SiteLocks::new(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        self.pool.as_ref()
    }

    async fn vacuum(&self) {
        if let Err(e) = sqlx::query("VACUUM").execute(self.pool.as_ref()).await {
            error!(error = %e, "VACUUM failed");
        }
    }
}

/// Refuse sites that are missing or still on the legacy log table
async fn require_normalized(conn: &mut SqliteConnection, tables: &SiteTables) -> StoreResult<()> {
    let logs_name = tables.logs_name();
    if !table_exists(conn, &logs_name).await? {
        return Err(StoreError::UnknownSite(tables.site().to_string()));
    }
    if !table_has_column(conn, &logs_name, "ip_id").await? {
        return Err(StoreError::LegacySchema(tables.site().to_string()));
    }
    Ok(())
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn init(&self, sites: &[String]) -> StoreResult<()> {
        for site in sites {
            let action = self.ensure_site_schema(site).await?;
            debug!(site = %site, action = ?action, "Site schema ready");
        }
        Ok(())
    }

    async fn ensure_site_schema(&self, site: &str) -> StoreResult<SchemaAction> {
        let tables = SiteTables::new(site)?;
        let _guard = self.locks.acquire(site).await;

        let mut tx = self.pool.begin().await?;
        let action = lifecycle::ensure_schema(&mut tx, &tables).await?;
        tx.commit().await?;
        Ok(action)
    }

    async fn ingest(&self, site: &str, records: &[LogRecord]) -> StoreResult<()> {
        let tables = SiteTables::new(site)?;
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            check_timestamp(record.timestamp)?;
        }
        let _guard = self.locks.acquire(site).await;

        let mut tx = self.pool.begin().await?;
        require_normalized(&mut tx, &tables).await?;
        ingest_batch(&mut tx, &tables, records).await?;
        tx.commit().await?;

        debug!(site = %site, records = records.len(), "Ingested batch");
        Ok(())
    }

    async fn purge(&self, retention_days: i64) -> StoreResult<PurgeReport> {
        self.purge_before(retention::cutoff_from_now(retention_days))
            .await
    }

    async fn purge_before(&self, cutoff: i64) -> StoreResult<PurgeReport> {
        let mut report = PurgeReport::new(cutoff);
        for site in self.sites().await? {
            let tables = SiteTables::new(&site)?;
            let _guard = self.locks.acquire(&site).await;
            report.push(retention::purge_site(self.pool.as_ref(), &tables, cutoff).await);
        }

        if report.rows_deleted > 0 {
            self.vacuum().await;
        }
        info!(
            cutoff,
            rows = report.rows_deleted,
            failures = report.failures().count(),
            "Retention cleanup finished"
        );
        Ok(report)
    }

    async fn clear_site(&self, site: &str) -> StoreResult<()> {
        let tables = SiteTables::new(site)?;
        let _guard = self.locks.acquire(site).await;

        let mut tx = self.pool.begin().await?;
        let legacy = match require_normalized(&mut tx, &tables).await {
            Ok(()) => false,
            Err(StoreError::LegacySchema(_)) => true,
            Err(e) => return Err(e),
        };

        let mut targets: Vec<&str> = vec![tables.logs.as_str()];
        if !legacy {
            targets.extend(tables.derived());
            targets.extend(tables.dimensions());
        }
        for table in targets {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(site = %site, "Cleared site data");
        Ok(())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        for site in self.sites().await? {
            self.clear_site(&site).await?;
        }
        self.vacuum().await;
        Ok(())
    }

    async fn rebuild_site(&self, site: &str) -> StoreResult<()> {
        let tables = SiteTables::new(site)?;
        let _guard = self.locks.acquire(site).await;

        let mut tx = self.pool.begin().await?;
        require_normalized(&mut tx, &tables).await?;
        lifecycle::backfill_all(&mut tx, &tables).await?;
        tx.commit().await?;

        info!(site = %site, "Rebuilt derived tables");
        Ok(())
    }

    async fn sites(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        schema::list_site_ids(&mut conn).await
    }

    async fn snapshot(&self, site: &str) -> StoreResult<SiteSnapshot> {
        let tables = SiteTables::new(site)?;
        let mut conn = self.pool.acquire().await?;
        require_normalized(&mut conn, &tables).await?;
        snapshot::read(&mut conn, &tables).await
    }
}
