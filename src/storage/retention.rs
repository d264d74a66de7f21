//! Retention cleanup
//!
//! Raw events older than the cutoff are deleted per site. The derived state
//! that depended on them is then repaired step by step, each step in its own
//! transaction. A failing step is logged and reported; the remaining steps and
//! sites still run.

use std::fmt;

use chrono::Utc;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::storage::schema::table_has_column;
use crate::storage::tables::SiteTables;
use crate::storage::{aggregate, dimension, first_seen, session, StoreResult};

pub const DEFAULT_RETENTION_DAYS: i64 = 30;

const SECONDS_PER_DAY: i64 = 86_400;

/// Non-positive horizons fall back to [`DEFAULT_RETENTION_DAYS`]
pub fn effective_retention_days(days: i64) -> i64 {
    if days > 0 {
        days
    } else {
        DEFAULT_RETENTION_DAYS
    }
}

pub fn cutoff_for(now: i64, retention_days: i64) -> i64 {
    now.saturating_sub(effective_retention_days(retention_days).saturating_mul(SECONDS_PER_DAY))
}

pub fn cutoff_from_now(retention_days: i64) -> i64 {
    cutoff_for(Utc::now().timestamp(), retention_days)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CleanupStep {
    RawEvents,
    Dimensions,
    Aggregates,
    FirstSeen,
    Sessions,
}

impl CleanupStep {
    /// Repair steps run after raw events were deleted, in order
    pub const REPAIRS: [CleanupStep; 4] = [
        CleanupStep::Dimensions,
        CleanupStep::Aggregates,
        CleanupStep::FirstSeen,
        CleanupStep::Sessions,
    ];
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CleanupStep::RawEvents => "raw events",
            CleanupStep::Dimensions => "orphan dimensions",
            CleanupStep::Aggregates => "boundary aggregates",
            CleanupStep::FirstSeen => "first-seen",
            CleanupStep::Sessions => "sessions",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: CleanupStep,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SitePurge {
    pub site: String,
    pub rows_deleted: u64,
    pub failures: Vec<StepFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub cutoff: i64,
    pub rows_deleted: u64,
    pub sites: Vec<SitePurge>,
}

impl PurgeReport {
    pub fn new(cutoff: i64) -> Self {
        Self {
            cutoff,
            rows_deleted: 0,
            sites: Vec::new(),
        }
    }

    pub fn push(&mut self, site: SitePurge) {
        self.rows_deleted += site.rows_deleted;
        self.sites.push(site);
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &StepFailure)> {
        self.sites
            .iter()
            .flat_map(|site| site.failures.iter().map(move |f| (site.site.as_str(), f)))
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

async fn delete_raw(pool: &SqlitePool, tables: &SiteTables, cutoff: i64) -> StoreResult<u64> {
    let sql = format!("DELETE FROM {} WHERE timestamp < ?", tables.logs);
    let result = sqlx::query(&sql).bind(cutoff).execute(pool).await?;
    Ok(result.rows_affected())
}

async fn apply_repair(
    conn: &mut SqliteConnection,
    tables: &SiteTables,
    step: CleanupStep,
    cutoff: i64,
) -> StoreResult<()> {
    match step {
        CleanupStep::RawEvents => Ok(()),
        CleanupStep::Dimensions => {
            let removed = dimension::sweep_orphans(conn, tables).await?;
            debug!(site = %tables.site(), removed, "Swept orphan dimension rows");
            Ok(())
        }
        CleanupStep::Aggregates => aggregate::expire_before(conn, tables, cutoff).await,
        CleanupStep::FirstSeen => first_seen::rebuild(conn, tables).await,
        CleanupStep::Sessions => session::expire_before(conn, tables, cutoff).await,
    }
}

async fn run_repair(
    pool: &SqlitePool,
    tables: &SiteTables,
    step: CleanupStep,
    cutoff: i64,
) -> StoreResult<()> {
    let mut tx = pool.begin().await?;
    apply_repair(&mut tx, tables, step, cutoff).await?;
    tx.commit().await?;
    Ok(())
}

fn record_failure(outcome: &mut SitePurge, step: CleanupStep, error: String) {
    warn!(site = %outcome.site, step = %step, error = %error, "Cleanup step failed");
    outcome.failures.push(StepFailure { step, error });
}

/// Purge one site; failures are collected, never returned
pub async fn purge_site(pool: &SqlitePool, tables: &SiteTables, cutoff: i64) -> SitePurge {
    let mut outcome = SitePurge {
        site: tables.site().to_string(),
        rows_deleted: 0,
        failures: Vec::new(),
    };

    outcome.rows_deleted = match delete_raw(pool, tables, cutoff).await {
        Ok(rows) => rows,
        Err(e) => {
            record_failure(&mut outcome, CleanupStep::RawEvents, e.to_string());
            return outcome;
        }
    };
    if outcome.rows_deleted == 0 {
        return outcome;
    }

    // Legacy-shaped tables have no derived state to repair
    let normalized = match pool.acquire().await {
        Ok(mut conn) => table_has_column(&mut conn, &tables.logs_name(), "ip_id").await,
        Err(e) => Err(e.into()),
    };
    match normalized {
        Ok(true) => {}
        Ok(false) => return outcome,
        Err(e) => {
            record_failure(&mut outcome, CleanupStep::RawEvents, e.to_string());
            return outcome;
        }
    }

    for step in CleanupStep::REPAIRS {
        if let Err(e) = run_repair(pool, tables, step, cutoff).await {
            record_failure(&mut outcome, step, e.to_string());
        }
    }

    info!(
        site = %tables.site(),
        rows = outcome.rows_deleted,
        cutoff,
        "Purged expired access logs"
    );
    outcome
}
