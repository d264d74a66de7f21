use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::storage::tables::validate_site_id;
use crate::storage::DEFAULT_RETENTION_DAYS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Tracked site ids, in the order they were listed
    pub sites: Vec<String>,
    pub retention: RetentionConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub days: i64,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub batch_size: usize,
}

impl RetentionConfig {
    const fn default_cleanup_interval_secs() -> u64 {
        3600
    }
}

impl IngestConfig {
    const fn default_batch_size() -> usize {
        1000
    }
}

/// Split a comma-separated site list, dropping blanks and duplicates
pub fn parse_sites(raw: &str) -> anyhow::Result<Vec<String>> {
    let mut sites: Vec<String> = Vec::new();
    for site in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        validate_site_id(site).with_context(|| format!("LOGPULSE_SITES entry {site:?}"))?;
        if !sites.iter().any(|known| known == site) {
            sites.push(site.to_string());
        }
    }
    Ok(sites)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://./data/logpulse.db".to_string());

        let max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "4".to_string())
            .parse::<u32>()
            .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?;

        let sites = parse_sites(&lookup("LOGPULSE_SITES").unwrap_or_default())?;

        let retention_days = match lookup("LOG_RETENTION_DAYS") {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(days) if days > 0 => days,
                _ => {
                    tracing::warn!(
                        "LOG_RETENTION_DAYS '{raw}' is not a positive number, using {DEFAULT_RETENTION_DAYS}"
                    );
                    DEFAULT_RETENTION_DAYS
                }
            },
            None => DEFAULT_RETENTION_DAYS,
        };

        let cleanup_interval_secs = lookup("CLEANUP_INTERVAL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or_else(RetentionConfig::default_cleanup_interval_secs);

        let batch_size = lookup("INGEST_BATCH_SIZE")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|size| *size > 0)
            .unwrap_or_else(IngestConfig::default_batch_size);

        Ok(Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections: max_connections.max(1),
            },
            sites,
            retention: RetentionConfig {
                days: retention_days,
                cleanup_interval_secs,
            },
            ingest: IngestConfig { batch_size },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database.url, "sqlite://./data/logpulse.db");
        assert_eq!(config.database.max_connections, 4);
        assert!(config.sites.is_empty());
        assert_eq!(config.retention.days, 30);
        assert_eq!(config.retention.cleanup_interval_secs, 3600);
        assert_eq!(config.ingest.batch_size, 1000);
    }

    #[test]
    fn test_non_positive_retention_falls_back() {
        for raw in ["0", "-5", "soon"] {
            let config = config_from(&[("LOG_RETENTION_DAYS", raw)]).unwrap();
            assert_eq!(config.retention.days, DEFAULT_RETENTION_DAYS, "input {raw}");
        }
        let config = config_from(&[("LOG_RETENTION_DAYS", "7")]).unwrap();
        assert_eq!(config.retention.days, 7);
    }

    #[test]
    fn test_sites_are_trimmed_and_deduplicated() {
        let config = config_from(&[("LOGPULSE_SITES", " blog, shop,,blog ")]).unwrap();
        assert_eq!(config.sites, vec!["blog".to_string(), "shop".to_string()]);
    }

    #[test]
    fn test_invalid_site_is_rejected() {
        assert!(config_from(&[("LOGPULSE_SITES", "blog,bad site")]).is_err());
    }

    #[test]
    fn test_bad_pool_size_is_an_error() {
        assert!(config_from(&[("DATABASE_MAX_CONNECTIONS", "many")]).is_err());
    }
}
