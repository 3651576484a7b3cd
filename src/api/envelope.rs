//! Response envelope for the engine's API
//!
//! Successful responses wrap their payload as `{ "data": ..., "meta": ... }`;
//! failures map the engine's error taxonomy onto `{ "error": { "code",
//! "message" }, "meta": ... }`. The error constructors mirror how the
//! pipeline can actually fail: a malformed report, an unreachable
//! inference/embedding collaborator, a run store fault, or a run aborted on
//! an invariant violation. Handlers pick the constructor; nothing downstream
//! inspects status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

/// Metadata stamped on every response.
#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    /// UTC time the response was produced.
    pub generated_at: String,
    pub version: &'static str,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339(),
            version: "1",
        }
    }
}

/// Successful response: `{ "data": T, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Response {
        let body = Self {
            data,
            meta: ResponseMeta::default(),
        };
        (StatusCode::OK, axum::Json(body)).into_response()
    }
}

/// Error detail inside [`ApiErrorResponse`].
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Error response: `{ "error": { "code": "...", "message": "..." }, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
    pub meta: ResponseMeta,
}

impl ApiErrorResponse {
    fn build(status: StatusCode, code: &str, msg: impl Into<String>) -> Response {
        let body = Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: msg.into(),
            },
            meta: ResponseMeta::default(),
        };
        (status, axum::Json(body)).into_response()
    }

    /// A report the ingest boundary refuses: empty text, out-of-range
    /// coordinates, or a rejected embedding.
    pub fn invalid_report(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::BAD_REQUEST, "INVALID_REPORT", msg)
    }

    /// The inference or embedding collaborator could not be reached or
    /// returned garbage. The report is not stored; the caller may retry.
    pub fn collaborator_unavailable(msg: impl Into<String>) -> Response {
        Self::build(
            StatusCode::SERVICE_UNAVAILABLE,
            "COLLABORATOR_UNAVAILABLE",
            msg,
        )
    }

    /// The run store failed mid-read or mid-write. Completed runs are
    /// written atomically, so no partial run is visible to later reads.
    pub fn store_error(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", msg)
    }

    /// The clustering run aborted (invariant violation or persistence
    /// failure) and nothing was recorded.
    pub fn run_failed(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::INTERNAL_SERVER_ERROR, "RUN_FAILED", msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ok_wraps_data_with_meta() {
        let resp = ApiResponse::ok(serde_json::json!({"run_id": 7}));
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["data"]["run_id"], 7);
        assert_eq!(v["meta"]["version"], "1");
        assert!(v["meta"]["generated_at"].is_string());
    }

    #[tokio::test]
    async fn test_error_codes_map_to_statuses() {
        let cases = [
            (
                ApiErrorResponse::invalid_report("embedding dimension 10 != 768"),
                StatusCode::BAD_REQUEST,
                "INVALID_REPORT",
            ),
            (
                ApiErrorResponse::collaborator_unavailable("inference timed out"),
                StatusCode::SERVICE_UNAVAILABLE,
                "COLLABORATOR_UNAVAILABLE",
            ),
            (
                ApiErrorResponse::store_error("database error"),
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_ERROR",
            ),
            (
                ApiErrorResponse::run_failed("label 3 missing from identity map"),
                StatusCode::INTERNAL_SERVER_ERROR,
                "RUN_FAILED",
            ),
        ];

        for (resp, status, code) in cases {
            assert_eq!(resp.status(), status);
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(v["error"]["code"], code);
            assert!(v["error"]["message"].is_string());
            assert!(v.get("data").is_none());
        }
    }
}
