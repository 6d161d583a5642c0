// Admin API routes
// Decision: All /v1/admin/* routes require the admin role (AdminUser extractor)
// Decision: Verification tokens are returned to the caller; nothing is emailed

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use nicheflow_core::{SubscriptionInfo, User};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::{ApiError, ApiJson, ApiResponse, ApiResult};
use super::validation::{validate_email, validate_verification_token_minutes};
use crate::auth::middleware::{AdminUser, AuthState, FromRef};
use crate::services::UserService;

/// App state for admin routes
#[derive(Clone)]
pub struct AdminState {
    pub users: UserService,
    pub auth: AuthState,
}

impl FromRef<AdminState> for AuthState {
    fn from_ref(input: &AdminState) -> Self {
        input.auth.clone()
    }
}

/// Query parameters for listing users
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListUsersQuery {
    /// Case-insensitive match on email, username or name
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UsersResponse {
    pub users: Vec<User>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateVerificationTokenRequest {
    pub email: String,
    /// Defaults to AUTH_VERIFICATION_TOKEN_MAX_AGE
    #[serde(default)]
    pub expires_in_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerificationTokenResponse {
    pub token: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CleanupResponse {
    pub deleted: u64,
}

/// Create admin routes
pub fn routes(state: AdminState) -> Router {
    Router::new()
        .route("/v1/admin/users", get(list_users))
        .route("/v1/admin/users/:id/subscription", put(update_subscription))
        .route("/v1/admin/verification-tokens", post(create_verification_token))
        .route("/v1/admin/sessions/cleanup", post(cleanup_sessions))
        .with_state(state)
}

/// GET /v1/admin/users - List users
#[utoipa::path(
    get,
    path = "/v1/admin/users",
    params(
        ("search" = Option<String>, Query, description = "Search by email, username or name")
    ),
    responses(
        (status = 200, description = "List of users", body = ApiResponse<UsersResponse>),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin access required")
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn list_users(
    State(state): State<AdminState>,
    _admin: AdminUser,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<UsersResponse> {
    let users = state.users.list_users(query.search.as_deref()).await?;
    Ok(ApiResponse::success(UsersResponse { users }))
}

/// PUT /v1/admin/users/:id/subscription - Replace a user's subscription fields
#[utoipa::path(
    put,
    path = "/v1/admin/users/{id}/subscription",
    params(("id" = String, Path, description = "User ID")),
    request_body = SubscriptionInfo,
    responses(
        (status = 200, description = "Updated subscription", body = ApiResponse<SubscriptionInfo>),
        (status = 400, description = "Invalid user ID or dates"),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "User not found")
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn update_subscription(
    State(state): State<AdminState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    ApiJson(subscription): ApiJson<SubscriptionInfo>,
) -> ApiResult<SubscriptionInfo> {
    let user_id = Uuid::parse_str(&id).map_err(|_| ApiError::validation("Invalid user ID"))?;
    let updated = state
        .users
        .update_subscription(user_id, subscription)
        .await?;
    tracing::info!(admin_id = %admin.user.id, user_id = %user_id, "Admin updated subscription");
    Ok(ApiResponse::success(updated))
}

/// POST /v1/admin/verification-tokens - Issue an email verification token
#[utoipa::path(
    post,
    path = "/v1/admin/verification-tokens",
    request_body = CreateVerificationTokenRequest,
    responses(
        (status = 200, description = "Token issued", body = ApiResponse<VerificationTokenResponse>),
        (status = 400, description = "Invalid email or lifetime"),
        (status = 403, description = "Admin access required")
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn create_verification_token(
    State(state): State<AdminState>,
    _admin: AdminUser,
    ApiJson(req): ApiJson<CreateVerificationTokenRequest>,
) -> ApiResult<VerificationTokenResponse> {
    let email = req.email.trim();
    validate_email(email)?;

    let lifetime = match req.expires_in_minutes {
        Some(minutes) => {
            validate_verification_token_minutes(minutes)?;
            Duration::minutes(minutes)
        }
        None => Duration::from_std(state.auth.config.verification_token_max_age)
            .map_err(|e| ApiError::server(format!("Invalid verification token max age: {}", e)))?,
    };

    let row = state
        .auth
        .service
        .create_verification_token(email, Utc::now() + lifetime)
        .await?;

    Ok(ApiResponse::success(VerificationTokenResponse {
        token: row.token,
        email: row.email,
        expires_at: row.expires_at,
    }))
}

/// POST /v1/admin/sessions/cleanup - Delete expired sessions
#[utoipa::path(
    post,
    path = "/v1/admin/sessions/cleanup",
    responses(
        (status = 200, description = "Number of sessions removed", body = ApiResponse<CleanupResponse>),
        (status = 403, description = "Admin access required")
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn cleanup_sessions(
    State(state): State<AdminState>,
    _admin: AdminUser,
) -> ApiResult<CleanupResponse> {
    let deleted = state.auth.service.clean_expired_sessions().await?;
    Ok(ApiResponse::success(CleanupResponse { deleted }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_users_query_deserialize() {
        let query: ListUsersQuery = serde_json::from_str(r#"{"search": "ada"}"#).unwrap();
        assert_eq!(query.search, Some("ada".to_string()));

        let query: ListUsersQuery = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(query.search, None);
    }

    #[test]
    fn test_verification_token_request_default_lifetime() {
        let req: CreateVerificationTokenRequest =
            serde_json::from_str(r#"{"email": "ada@example.com"}"#).unwrap();
        assert!(req.expires_in_minutes.is_none());
    }
}
