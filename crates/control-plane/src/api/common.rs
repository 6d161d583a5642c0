// Common DTOs for public API
//
// Every route except /health answers with the same envelope:
// `{code, message, data?, error?}` where `code` mirrors the HTTP status.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use nicheflow_core::{ErrorKind, ServiceError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standard response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Mirrors the HTTP status code.
    #[schema(example = 200)]
    pub code: u16,
    /// "success", or a short description of the failure.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Underlying error message, present only on failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: "success".to_string(),
            data: Some(data),
            error: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

/// Simple `{message}` payload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Handler failure rendered as an envelope with a matching HTTP status.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn server(error: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            .with_error(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            code: self.status.as_u16(),
            message: self.message,
            data: None,
            error: self.error,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let detail = e.to_string();
        match e.kind() {
            ErrorKind::Validation => ApiError::validation(detail.clone()).with_error(detail),
            ErrorKind::Authentication => ApiError::unauthorized(detail.clone()).with_error(detail),
            ErrorKind::Authorization => ApiError::forbidden(detail.clone()).with_error(detail),
            ErrorKind::NotFound => ApiError::not_found(detail.clone()).with_error(detail),
            ErrorKind::Upstream => {
                tracing::warn!("OAuth provider request failed: {}", detail);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "OAuth provider error")
                    .with_error(detail)
            }
            ErrorKind::Server => {
                tracing::error!("Internal error: {:?}", e);
                ApiError::server(detail)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation("Invalid request body").with_error(rejection.body_text())
    }
}

/// JSON body extractor whose rejections render as the envelope
#[derive(Debug, Clone, Copy, Default, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Handler result alias
pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_success_envelope() {
        let response = ApiResponse::success(serde_json::json!({ "ok": true })).into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["code"], 200);
        assert_eq!(json["message"], "success");
        assert_eq!(json["data"]["ok"], true);
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_service_error_mapping() {
        let cases = [
            (ServiceError::validation("bad"), StatusCode::BAD_REQUEST),
            (ServiceError::SessionExpired, StatusCode::UNAUTHORIZED),
            (ServiceError::MonthlyLimitExceeded, StatusCode::FORBIDDEN),
            (ServiceError::not_found("User"), StatusCode::NOT_FOUND),
            (ServiceError::token_exchange("boom"), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ServiceError::Internal(anyhow::anyhow!("db down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            let response = ApiError::from(error).into_response();
            assert_eq!(response.status(), status);
            let json = body_json(response).await;
            assert_eq!(json["code"], status.as_u16());
            assert!(json["error"].is_string());
            assert!(json.get("data").is_none());
        }
    }

    #[tokio::test]
    async fn test_plain_error_has_no_detail() {
        let json = body_json(ApiError::too_many_requests("Too many requests").into_response()).await;
        assert_eq!(json["code"], 429);
        assert_eq!(json["message"], "Too many requests");
        assert!(json.get("error").is_none());
    }

    #[derive(Debug, Deserialize)]
    struct Named {
        #[allow(dead_code)]
        name: String,
    }

    async fn post_named(body: &'static str, content_type: &str) -> Response {
        use axum::{body::Body, http::Request, routing::post, Router};
        use tower::ServiceExt;

        let app = Router::new().route(
            "/named",
            post(|ApiJson(named): ApiJson<Named>| async move { named.name }),
        );
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri("/named")
                .header("content-type", content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_json_rejection_uses_envelope() {
        let response = post_named(r#"{"name": 5}"#, "application/json").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["code"], 400);
        assert_eq!(json["message"], "Invalid request body");
        assert!(json["error"].as_str().unwrap().contains("name"));

        let response = post_named("{not json", "application/json").await;
        assert_eq!(body_json(response).await["code"], 400);

        let response = post_named(r#"{"name": "ok"}"#, "text/plain").await;
        assert_eq!(body_json(response).await["code"], 400);
    }
}
