use chrono::{DateTime, Utc};
use http::Method;
use serde::{Deserialize, Serialize};

/// One forwarded (or rejected) request, as reported to the activity logger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub user_id: Option<i64>,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub target_url: Option<String>,
    pub proxy_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityRecord {
    /// Record for a request whose endpoint and target are the same URL
    pub fn for_target(method: &Method, target_url: &str, status_code: u16) -> Self {
        Self {
            user_id: None,
            endpoint: target_url.to_string(),
            method: method.as_str().to_string(),
            status_code,
            target_url: Some(target_url.to_string()),
            proxy_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_proxy(mut self, proxy_id: Option<i64>, user_id: Option<i64>) -> Self {
        self.proxy_id = proxy_id;
        self.user_id = user_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_target_fills_endpoint_and_target() {
        let record = ActivityRecord::for_target(&Method::POST, "http://example.com/a", 403);
        assert_eq!(record.endpoint, "http://example.com/a");
        assert_eq!(record.target_url.as_deref(), Some("http://example.com/a"));
        assert_eq!(record.method, "POST");
        assert_eq!(record.status_code, 403);
        assert!(record.proxy_id.is_none());
        assert!(record.user_id.is_none());
    }

    #[test]
    fn test_with_proxy_attaches_ids() {
        let record = ActivityRecord::for_target(&Method::GET, "http://example.com", 200)
            .with_proxy(Some(4), Some(11));
        assert_eq!(record.proxy_id, Some(4));
        assert_eq!(record.user_id, Some(11));
    }
}
