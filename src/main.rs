use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use logpulse::config::Config;
use logpulse::storage::{LogStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    if let Some(parent) = sqlite_parent_dir(&config.database.url) {
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }

    info!("Using SQLite storage: {}", config.database.url);
    let store: Arc<dyn LogStore> = Arc::new(
        SqliteStore::new(&config.database.url, config.database.max_connections)
            .await
            .context("opening the database")?,
    );

    if config.sites.is_empty() {
        warn!("LOGPULSE_SITES is empty; only retention cleanup of existing sites will run");
    }

    // A site that fails to migrate stays on its old schema until the next start
    for site in &config.sites {
        match store.ensure_site_schema(site).await {
            Ok(action) => info!(site = %site, action = ?action, "Site ready"),
            Err(e) => error!(site = %site, error = %e, "Schema lifecycle failed"),
        }
    }

    let mut interval =
        tokio::time::interval(Duration::from_secs(config.retention.cleanup_interval_secs));
    info!(
        retention_days = config.retention.days,
        interval_secs = config.retention.cleanup_interval_secs,
        "Retention cleanup scheduled"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match store.purge(config.retention.days).await {
                    Ok(report) => {
                        for (site, failure) in report.failures() {
                            warn!(site = %site, step = %failure.step, "Cleanup left work undone: {}", failure.error);
                        }
                    }
                    Err(e) => error!("Retention cleanup failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}

/// Directory of a file-backed `sqlite:` URL, if it has one
fn sqlite_parent_dir(url: &str) -> Option<std::path::PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    std::path::Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
}
