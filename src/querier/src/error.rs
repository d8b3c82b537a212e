use uniquery_api::error::ErrorResponse;

use crate::gateway::GatewayError;

/// Stable machine readable error codes.
pub mod codes {
    pub const INVALID_PARAMETER: &str = "UniQuery.InvalidParameter";
    pub const INVALID_TIME_RANGE: &str = "UniQuery.InvalidParameter.TimeRange";
    pub const INVALID_STEP: &str = "UniQuery.InvalidParameter.Step";
    pub const INVALID_FILTER: &str = "UniQuery.InvalidParameter.Filter";
    pub const INVALID_SORT: &str = "UniQuery.InvalidParameter.Sort";
    pub const INVALID_FORMULA: &str = "UniQuery.MetricModel.InvalidParameter.FormulaConfig";
    pub const TOO_MANY_BUCKETS: &str = "UniQuery.MetricModel.CountExceeded.DateHistogramBuckets";
    pub const INVALID_SCROLL: &str = "UniQuery.DataView.InvalidParameter.Scroll";
    pub const INVALID_PIT_KEEP_ALIVE: &str = "UniQuery.DataView.InvalidParameter.PitKeepAlive";
    pub const UNSUPPORTED_QUERY_TYPE: &str = "UniQuery.DataView.InvalidParameter.QueryType";
    pub const CURSOR_ALREADY_OPEN: &str = "UniQuery.InvalidParameter.QueryId";

    pub const TRACE_NOT_FOUND: &str = "UniQuery.Trace.TraceNotFound";
    pub const TRACE_DATA_VIEW_NOT_FOUND: &str = "UniQuery.Trace.TraceDataViewNotFound";
    pub const LOG_DATA_VIEW_NOT_FOUND: &str = "UniQuery.Trace.LogDataViewNotFound";
    pub const ROOT_SPAN_NOT_FOUND: &str = "UniQuery.Trace.RootSpanNotFound";
    pub const SPAN_NOT_FOUND: &str = "UniQuery.Trace.SpanNotFound";

    pub const DATA_VIEW_NOT_FOUND: &str = "UniQuery.DataView.DataViewNotFound";
    pub const LOG_GROUP_NOT_FOUND: &str = "UniQuery.LogGroup.LogGroupNotFound";
    pub const PIT_CONTEXT_NOT_FOUND: &str = "UniQuery.DataView.PointInTimeSearchContextNotFound";
    pub const METRIC_MODEL_NOT_FOUND: &str = "UniQuery.MetricModel.MetricModelNotFound";

    pub const FORBIDDEN: &str = "UniQuery.Forbidden";

    pub const INTERNAL_ERROR: &str = "UniQuery.InternalServerError";
    pub const SEARCH_FAILED: &str = "UniQuery.InternalError.SearchSubmitFailed";
    pub const SCROLL_FAILED: &str = "UniQuery.InternalError.ScrollFailed";
    pub const COUNT_FAILED: &str = "UniQuery.InternalError.CountFailed";
    pub const CREATE_PIT_FAILED: &str = "UniQuery.DataView.InternalError.CreatePointInTimeFailed";
    pub const DELETE_PIT_FAILED: &str = "UniQuery.DataView.DeletePointInTimeFailed";
    pub const LOG_GROUP_ACCESS_FAILED: &str = "UniQuery.LogGroup.InternalError";
    pub const DECODE_FAILED: &str = "UniQuery.InternalError.UnmarshalFailed";

    pub const CANCELLED: &str = "UniQuery.RequestCancelled";
}

/// Status reported for requests abandoned by the caller.
pub const STATUS_CLIENT_CLOSED: u16 = 499;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuerierError {
    #[error("{code}: {detail}")]
    Validation { code: &'static str, detail: String },
    #[error("{code}: {detail}")]
    NotFound { code: &'static str, detail: String },
    #[error("{code}: {detail}")]
    Permission { code: &'static str, detail: String },
    #[error("{code}: {detail}")]
    Backend { code: &'static str, detail: String },
    #[error("{code}: {detail}")]
    Decode { code: &'static str, detail: String },
    #[error("{code}: {detail}")]
    Internal { code: &'static str, detail: String },
    #[error("request cancelled")]
    Cancelled,
}

impl QuerierError {
    pub fn validation(code: &'static str, detail: impl Into<String>) -> Self {
        Self::Validation {
            code,
            detail: detail.into(),
        }
    }

    pub fn not_found(code: &'static str, detail: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            detail: detail.into(),
        }
    }

    pub fn permission(detail: impl Into<String>) -> Self {
        Self::Permission {
            code: codes::FORBIDDEN,
            detail: detail.into(),
        }
    }

    /// Keeps only the backend's message; the raw body never reaches callers.
    pub fn backend(code: &'static str, err: &GatewayError) -> Self {
        Self::Backend {
            code,
            detail: err.message.clone(),
        }
    }

    pub fn decode(detail: impl Into<String>) -> Self {
        Self::Decode {
            code: codes::DECODE_FAILED,
            detail: detail.into(),
        }
    }

    pub fn internal(code: &'static str, detail: impl Into<String>) -> Self {
        Self::Internal {
            code,
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. }
            | Self::NotFound { code, .. }
            | Self::Permission { code, .. }
            | Self::Backend { code, .. }
            | Self::Decode { code, .. }
            | Self::Internal { code, .. } => code,
            Self::Cancelled => codes::CANCELLED,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::Validation { detail, .. }
            | Self::NotFound { detail, .. }
            | Self::Permission { detail, .. }
            | Self::Backend { detail, .. }
            | Self::Decode { detail, .. }
            | Self::Internal { detail, .. } => detail,
            Self::Cancelled => "the request was cancelled before it completed",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Permission { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Backend { .. } | Self::Decode { .. } | Self::Internal { .. } => 500,
            Self::Cancelled => STATUS_CLIENT_CLOSED,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Invalid parameter",
            Self::NotFound { .. } => "Resource not found",
            Self::Permission { .. } => "Forbidden",
            Self::Backend { .. } => "Search backend error",
            Self::Decode { .. } => "Failed to decode search backend response",
            Self::Internal { .. } => "Internal server error",
            Self::Cancelled => "Request cancelled",
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            status: self.status(),
            error_code: self.code().to_string(),
            description: self.description().to_string(),
            error_details: self.detail().to_string(),
        }
    }
}

impl From<serde_json::Error> for QuerierError {
    fn from(err: serde_json::Error) -> Self {
        QuerierError::decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            QuerierError::validation(codes::INVALID_STEP, "bad").status(),
            400
        );
        assert_eq!(QuerierError::permission("no").status(), 403);
        assert_eq!(
            QuerierError::not_found(codes::TRACE_NOT_FOUND, "t").status(),
            404
        );
        assert_eq!(QuerierError::decode("x").status(), 500);
        assert_eq!(QuerierError::Cancelled.status(), 499);
    }

    #[test]
    fn test_backend_error_keeps_only_message() {
        let err = GatewayError {
            status: 500,
            error_type: "search_phase_execution_exception".to_string(),
            message: "all shards failed".to_string(),
        };

        let response = QuerierError::backend(codes::SEARCH_FAILED, &err).to_response();
        assert_eq!(response.status, 500);
        assert_eq!(response.error_code, codes::SEARCH_FAILED);
        assert_eq!(response.error_details, "all shards failed");
    }

    #[test]
    fn test_to_response() {
        let response = QuerierError::not_found(
            codes::TRACE_NOT_FOUND,
            "The trace whose traceId equals abc was not found!",
        )
        .to_response();

        assert_eq!(response.status, 404);
        assert_eq!(response.error_code, "UniQuery.Trace.TraceNotFound");
        assert!(response.error_details.contains("abc"));
    }

    #[test]
    fn test_json_errors_are_decode_errors() {
        let err: QuerierError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, QuerierError::Decode { .. }));
    }
}
