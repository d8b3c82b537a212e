use serde::{Deserialize, Serialize};

/// Error body returned to callers of the engine.
///
/// Example:
/// {
///   "status": 404,
///   "error_code": "UniQuery.Trace.TraceNotFound",
///   "description": "Trace not found",
///   "error_details": "The trace whose traceId equals 4bf92f3577b34da6 was not found!"
/// }
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub status: u16,
    pub error_code: String,
    pub description: String,
    #[serde(default)]
    pub error_details: String,
}

/// Error document produced by the search backend for non-2xx responses.
///
/// Example:
/// {"status":500,"error":{"type":"UniQuery.InternalServerError","reason":"error"}}
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackendErrorBody {
    #[serde(default)]
    pub status: u16,
    pub error: BackendErrorCause,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackendErrorCause {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_body() {
        let raw = r#"{"status":500,"error":{"type":"UniQuery.InternalServerError","reason":"error"}}"#;
        let body: BackendErrorBody = serde_json::from_str(raw).unwrap();

        assert_eq!(body.status, 500);
        assert_eq!(body.error.error_type, "UniQuery.InternalServerError");
        assert_eq!(body.error.reason, "error");
    }

    #[test]
    fn test_error_response_without_details() {
        let raw = r#"{"status":400,"error_code":"UniQuery.InvalidParameter","description":"bad"}"#;
        let body: ErrorResponse = serde_json::from_str(raw).unwrap();

        assert_eq!(body.status, 400);
        assert!(body.error_details.is_empty());
    }
}
