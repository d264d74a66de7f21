//! Per-site table naming
//!
//! Each tracked site owns an isolated set of tables whose names start with the
//! site id. Identifiers are validated once here so every SQL string built from
//! a [`SiteTables`] is safe to format.

use crate::storage::{StoreError, StoreResult};

/// Suffix of the raw access log table; also used to discover sites
pub const LOGS_SUFFIX: &str = "_access_logs";

const MAX_SITE_ID_LEN: usize = 64;

pub fn validate_site_id(site: &str) -> StoreResult<()> {
    let valid = !site.is_empty()
        && site.len() <= MAX_SITE_ID_LEN
        && site
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSiteId(site.to_string()))
    }
}

/// Quoted table identifiers for one site
#[derive(Debug, Clone)]
pub struct SiteTables {
    site: String,
    pub logs: String,
    pub logs_staging: String,
    pub dim_ip: String,
    pub dim_url: String,
    pub dim_referer: String,
    pub dim_ua: String,
    pub dim_location: String,
    pub agg_hourly: String,
    pub agg_hourly_ip: String,
    pub agg_daily: String,
    pub agg_daily_ip: String,
    pub first_seen: String,
    pub sessions: String,
    pub session_state: String,
    pub agg_session_daily: String,
    pub agg_entry_daily: String,
}

impl SiteTables {
    pub fn new(site: &str) -> StoreResult<Self> {
        validate_site_id(site)?;
        let table = |suffix: &str| format!("\"{site}{suffix}\"");
        Ok(Self {
            site: site.to_string(),
            logs: table(LOGS_SUFFIX),
            logs_staging: table("_access_logs_new"),
            dim_ip: table("_dim_ip"),
            dim_url: table("_dim_url"),
            dim_referer: table("_dim_referer"),
            dim_ua: table("_dim_ua"),
            dim_location: table("_dim_location"),
            agg_hourly: table("_agg_hourly"),
            agg_hourly_ip: table("_agg_hourly_ip"),
            agg_daily: table("_agg_daily"),
            agg_daily_ip: table("_agg_daily_ip"),
            first_seen: table("_first_seen"),
            sessions: table("_sessions"),
            session_state: table("_session_state"),
            agg_session_daily: table("_agg_session_daily"),
            agg_entry_daily: table("_agg_entry_daily"),
        })
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    /// Unquoted name of the raw log table, for catalog lookups
    pub fn logs_name(&self) -> String {
        format!("{}{LOGS_SUFFIX}", self.site)
    }

    /// Quoted index name scoped to this site
    pub fn index(&self, name: &str) -> String {
        format!("\"idx_{}_{name}\"", self.site)
    }

    pub fn dimensions(&self) -> [&str; 5] {
        [
            &self.dim_ip,
            &self.dim_url,
            &self.dim_referer,
            &self.dim_ua,
            &self.dim_location,
        ]
    }

    /// Every table derived from raw events
    pub fn derived(&self) -> [&str; 9] {
        [
            &self.agg_hourly,
            &self.agg_hourly_ip,
            &self.agg_daily,
            &self.agg_daily_ip,
            &self.first_seen,
            &self.sessions,
            &self.session_state,
            &self.agg_session_daily,
            &self.agg_entry_daily,
        ]
    }
}

/// Site id of a raw log table name, if it is one
pub fn site_from_logs_table(name: &str) -> Option<&str> {
    let site = name.strip_suffix(LOGS_SUFFIX)?;
    validate_site_id(site).ok().map(|_| site)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_id_validation() {
        assert!(validate_site_id("blog").is_ok());
        assert!(validate_site_id("my-site_2").is_ok());
        assert!(validate_site_id(&"a".repeat(64)).is_ok());

        let long = "a".repeat(65);
        for bad in ["", "a b", "x\"y", "drop;table", "é", long.as_str()] {
            assert!(
                matches!(validate_site_id(bad), Err(StoreError::InvalidSiteId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_table_names_are_quoted() {
        let tables = SiteTables::new("blog").unwrap();
        assert_eq!(tables.logs, "\"blog_access_logs\"");
        assert_eq!(tables.logs_name(), "blog_access_logs");
        assert_eq!(tables.session_state, "\"blog_session_state\"");
        assert_eq!(tables.index("timestamp"), "\"idx_blog_timestamp\"");
    }

    #[test]
    fn test_site_from_logs_table() {
        assert_eq!(site_from_logs_table("blog_access_logs"), Some("blog"));
        assert_eq!(site_from_logs_table("blog_access_logs_new"), None);
        assert_eq!(site_from_logs_table("blog_sessions"), None);
        assert_eq!(site_from_logs_table("_access_logs"), None);
    }
}
