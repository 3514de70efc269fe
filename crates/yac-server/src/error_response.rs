//! Error-to-HTTP-response mapping (§6, grounded on
//! `original_source/app/router/error.py`'s `handle_yac`): every error
//! becomes a `{title, message}` JSON body at its taxonomy status code,
//! logging only the 500s. CORS headers are applied by the router's
//! `CorsLayer`, not repeated here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use yac_core::error::Error;

fn render(err: &Error, debug_mode: bool) -> Response {
    if err.is_server_error() {
        tracing::error!("{}: {err}", err.title());
    }
    let status = StatusCode::from_u16(err.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Json(json!({"title": err.title(), "message": err.client_message(debug_mode)}));
    (status, body).into_response()
}

/// Fallback `IntoResponse` for contexts without a `debug_mode` flag at hand
/// (extractor rejections that run before `AppState` is reachable). Hides
/// 401/500 detail unconditionally, matching the non-debug default.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        render(&self, false)
    }
}

/// An error paired with the serving process's `debug_mode`, used by every
/// handler and by `AuthUser`'s extraction (which does have `AppState`).
pub struct ApiError {
    error: Error,
    debug_mode: bool,
}

impl ApiError {
    pub fn new(error: Error, debug_mode: bool) -> Self {
        Self { error, debug_mode }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        render(&self.error, self.debug_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn hides_server_error_detail_without_debug_mode() {
        let resp = ApiError::new(Error::server("stack trace leaked"), false).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], Error::DEFAULT_MESSAGE);
    }

    #[tokio::test]
    async fn shows_detail_in_debug_mode() {
        let resp = ApiError::new(Error::request_not_found("no such host"), false).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "no such host");
    }
}
