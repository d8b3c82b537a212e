//! Access to the document search cluster.
//!
//! One request per call; the raw body is handed back undecoded. Decoding,
//! pagination and retries happen in the callers.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;

use uniquery_api::view::DeletePitsResponse;

use crate::error::QuerierError;

pub mod opensearch;

pub use opensearch::OpenSearchGateway;

/// Id accepted by the backend to address every point in time.
pub const ALL_PITS: &str = "_all";

/// Error type reported by the backend when a PIT or scroll context expired.
pub const SEARCH_CONTEXT_MISSING: &str = "search_context_missing_exception";

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, QuerierError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            log::error!("Failed to decode search response: {e}");
            QuerierError::decode(e.to_string())
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("search backend returned {status}: {message}")]
pub struct GatewayError {
    pub status: u16,
    /// Backend error type such as `search_context_missing_exception`
    pub error_type: String,
    pub message: String,
}

impl GatewayError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            error_type: String::new(),
            message: message.into(),
        }
    }

    pub fn is_search_context_missing(&self) -> bool {
        self.status == 404
            && (self.error_type == SEARCH_CONTEXT_MISSING
                || self.message.contains(SEARCH_CONTEXT_MISSING))
    }
}

/// Operations the engine issues against the search backend.
#[async_trait]
pub trait SearchGateway: Send + Sync {
    /// Run a search; with `scroll` set the response opens a scroll context.
    async fn search_submit(
        &self,
        query: &Value,
        indices: &[String],
        scroll: Option<Duration>,
        preference: &str,
        track_total_hits: bool,
    ) -> Result<GatewayResponse, GatewayError>;

    async fn scroll(
        &self,
        scroll_id: &str,
        keep_alive: Duration,
    ) -> Result<GatewayResponse, GatewayError>;

    async fn count(&self, query: &Value, indices: &[String])
    -> Result<GatewayResponse, GatewayError>;

    /// Returns the id of the new point in time.
    async fn create_point_in_time(
        &self,
        indices: &[String],
        keep_alive: Duration,
    ) -> Result<String, GatewayError>;

    /// Search pinned to the point in time carried in the query's `pit` clause.
    async fn search_with_pit(&self, query: &Value) -> Result<GatewayResponse, GatewayError>;

    /// `pit_ids == ["_all"]` releases every point in time.
    async fn delete_point_in_time(
        &self,
        pit_ids: &[String],
    ) -> Result<DeletePitsResponse, GatewayError>;

    async fn delete_scroll(&self, scroll_ids: &[String]) -> Result<GatewayResponse, GatewayError>;
}

/// Render a keep-alive the way the backend expects it (`30s`, `1500ms`).
pub fn keep_alive_param(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive_param() {
        assert_eq!(keep_alive_param(Duration::from_secs(60)), "60s");
        assert_eq!(keep_alive_param(Duration::from_millis(1500)), "1500ms");
    }

    #[test]
    fn test_search_context_missing() {
        let err = GatewayError {
            status: 404,
            error_type: SEARCH_CONTEXT_MISSING.to_string(),
            message: "No search context found for id [12]".to_string(),
        };
        assert!(err.is_search_context_missing());

        let other = GatewayError {
            status: 404,
            error_type: "index_not_found_exception".to_string(),
            message: "no such index".to_string(),
        };
        assert!(!other.is_search_context_missing());
    }

    #[test]
    fn test_response_json() {
        let response = GatewayResponse::new(200, r#"{"count": 7}"#);
        let value: Value = response.json().unwrap();
        assert_eq!(value["count"], 7);

        let broken = GatewayResponse::new(200, "{");
        assert!(matches!(
            broken.json::<Value>(),
            Err(QuerierError::Decode { .. })
        ));
    }
}
