//! Engine statistics.
//!
//! The transport engine emits a JSON document every `statistics.interval.ms`.
//! It is parsed into [`Statistics`] and handed to
//! [`ClientContext::stats`](crate::context::ClientContext::stats) from `poll`.
//! Fields the client does not know about are kept in [`Statistics::extra`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    /// Engine instance name.
    pub name: String,
    pub client_id: String,
    /// Engine kind, e.g. `"mock"`.
    #[serde(rename = "type")]
    pub client_type: String,
    /// Engine monotonic clock, microseconds.
    pub ts: i64,
    /// Wall clock, seconds since epoch.
    pub time: i64,
    /// Responses queued or parked inside the engine.
    pub replyq: i64,
    /// Requests received.
    pub tx: u64,
    /// Responses sent.
    pub rx: u64,
    pub broker_count: usize,
    pub topic_count: usize,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Statistics {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Transport(format!("Invalid statistics: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statistics() {
        let json = r#"{"name":"c#mock-1","client_id":"c","type":"mock","ts":10,"time":1700000000,
            "replyq":2,"tx":5,"rx":4,"broker_count":3,"topic_count":1,"custom":{"a":1}}"#;
        let stats = Statistics::from_json(json).unwrap();
        assert_eq!(stats.client_type, "mock");
        assert_eq!(stats.tx, 5);
        assert_eq!(stats.broker_count, 3);
        assert!(stats.extra.contains_key("custom"));
    }

    #[test]
    fn test_missing_fields_default() {
        let stats = Statistics::from_json("{}").unwrap();
        assert_eq!(stats, Statistics::default());
        assert!(Statistics::from_json("not json").is_err());
    }
}
