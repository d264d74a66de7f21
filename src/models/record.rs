use serde::{Deserialize, Deserializer, Serialize};

/// One parsed access log line, as handed to the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Client address
    #[serde(default)]
    pub ip: String,

    /// Counts toward traffic and session metrics; assets and API calls do not
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub pageview: bool,

    /// Unix timestamp in seconds
    pub timestamp: i64,

    #[serde(default)]
    pub method: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub status: u16,

    #[serde(default)]
    pub bytes_sent: i64,

    #[serde(default)]
    pub referer: String,

    #[serde(default)]
    pub browser: String,

    #[serde(default)]
    pub os: String,

    #[serde(default)]
    pub device: String,

    #[serde(default)]
    pub domestic_location: String,

    #[serde(default)]
    pub global_location: String,
}

// Upstream parsers emit the flag either as a JSON bool or as 0/1.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Int(value) => value != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pageview_accepts_bool_and_int() {
        let a: LogRecord =
            serde_json::from_str(r#"{"ip":"1.2.3.4","pageview":true,"timestamp":10}"#).unwrap();
        let b: LogRecord =
            serde_json::from_str(r#"{"ip":"1.2.3.4","pageview":1,"timestamp":10}"#).unwrap();
        let c: LogRecord =
            serde_json::from_str(r#"{"ip":"1.2.3.4","pageview":0,"timestamp":10}"#).unwrap();
        assert!(a.pageview);
        assert!(b.pageview);
        assert!(!c.pageview);
    }

    #[test]
    fn test_missing_fields_default() {
        let record: LogRecord = serde_json::from_str(r#"{"timestamp":42}"#).unwrap();
        assert_eq!(record.timestamp, 42);
        assert!(!record.pageview);
        assert_eq!(record.status, 0);
        assert!(record.referer.is_empty());
    }

    #[test]
    fn test_timestamp_is_required() {
        assert!(serde_json::from_str::<LogRecord>(r#"{"ip":"1.2.3.4"}"#).is_err());
    }
}
