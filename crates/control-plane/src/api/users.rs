// Users API routes
// Decision: Every /v1/user/* route acts on the caller resolved from the session token
// Decision: Preferences travel as a flat JSON object (built-in and custom keys together)

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Router,
};
use nicheflow_core::{Preferences, SocialAccount, SubscriptionInfo, UsageStats, User};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common::{ApiJson, ApiResponse, ApiResult, MessageResponse};
use crate::auth::middleware::{AuthState, AuthUser, FromRef};
use crate::services::UserService;

/// App state for user routes
#[derive(Clone)]
pub struct UsersState {
    pub users: UserService,
    pub auth: AuthState,
}

impl FromRef<UsersState> for AuthState {
    fn from_ref(input: &UsersState) -> Self {
        input.auth.clone()
    }
}

/// Partial profile update. Omitted fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Empty string clears the number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// Request to link an external social identity
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LinkSocialAccountRequest {
    #[schema(example = "github")]
    pub provider: String,
    /// Identifier assigned by the provider
    pub account_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Flat preference map, e.g. `{"theme": "dark", "notification_web": false, "editor": "vim"}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = Object)]
pub struct PreferencesBody(pub Preferences);

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SocialAccountsResponse {
    pub social_accounts: Vec<SocialAccount>,
}

/// Create user routes
pub fn routes(state: UsersState) -> Router {
    Router::new()
        .route("/v1/user/profile", get(get_profile).put(update_profile))
        .route(
            "/v1/user/preferences",
            get(get_preferences).put(update_preferences),
        )
        .route(
            "/v1/user/social-accounts",
            get(list_social_accounts).post(link_social_account),
        )
        .route(
            "/v1/user/social-accounts/:provider/:account_id",
            delete(unlink_social_account),
        )
        .route("/v1/user/usage", get(get_usage).post(increment_usage))
        .route("/v1/user/subscription", get(get_subscription))
        .with_state(state)
}

/// GET /v1/user/profile - Current user's profile
#[utoipa::path(
    get,
    path = "/v1/user/profile",
    responses(
        (status = 200, description = "User profile", body = ApiResponse<User>),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_profile(State(state): State<UsersState>, auth: AuthUser) -> ApiResult<User> {
    let user = state.users.get_user(auth.user.id).await?;
    Ok(ApiResponse::success(user))
}

/// PUT /v1/user/profile - Update profile fields
#[utoipa::path(
    put,
    path = "/v1/user/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile", body = ApiResponse<User>),
        (status = 400, description = "Invalid field"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn update_profile(
    State(state): State<UsersState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> ApiResult<User> {
    let user = state.users.update_profile(auth.user.id, req).await?;
    Ok(ApiResponse::success(user))
}

/// GET /v1/user/preferences - Built-in and custom preferences
#[utoipa::path(
    get,
    path = "/v1/user/preferences",
    responses(
        (status = 200, description = "Merged preferences", body = ApiResponse<PreferencesBody>),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_preferences(
    State(state): State<UsersState>,
    auth: AuthUser,
) -> ApiResult<PreferencesBody> {
    let prefs = state.users.get_preferences(auth.user.id).await?;
    Ok(ApiResponse::success(PreferencesBody(prefs)))
}

/// PUT /v1/user/preferences - Update preferences
///
/// Built-in keys update the user row; any other key is stored as a custom
/// string preference.
#[utoipa::path(
    put,
    path = "/v1/user/preferences",
    request_body = PreferencesBody,
    responses(
        (status = 200, description = "Merged preferences after the update", body = ApiResponse<PreferencesBody>),
        (status = 400, description = "Invalid key or value type"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn update_preferences(
    State(state): State<UsersState>,
    auth: AuthUser,
    ApiJson(PreferencesBody(patch)): ApiJson<PreferencesBody>,
) -> ApiResult<PreferencesBody> {
    let prefs = state.users.update_preferences(auth.user.id, patch).await?;
    Ok(ApiResponse::success(PreferencesBody(prefs)))
}

/// GET /v1/user/social-accounts - Linked social accounts
#[utoipa::path(
    get,
    path = "/v1/user/social-accounts",
    responses(
        (status = 200, description = "Linked accounts", body = ApiResponse<SocialAccountsResponse>),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list_social_accounts(
    State(state): State<UsersState>,
    auth: AuthUser,
) -> ApiResult<SocialAccountsResponse> {
    let social_accounts = state.users.list_social_accounts(auth.user.id).await?;
    Ok(ApiResponse::success(SocialAccountsResponse { social_accounts }))
}

/// POST /v1/user/social-accounts - Link a social account
#[utoipa::path(
    post,
    path = "/v1/user/social-accounts",
    request_body = LinkSocialAccountRequest,
    responses(
        (status = 200, description = "Linked account", body = ApiResponse<SocialAccount>),
        (status = 400, description = "Already linked to another user"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn link_social_account(
    State(state): State<UsersState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<LinkSocialAccountRequest>,
) -> ApiResult<SocialAccount> {
    let account = state.users.link_social_account(auth.user.id, req).await?;
    Ok(ApiResponse::success(account))
}

/// DELETE /v1/user/social-accounts/:provider/:account_id - Unlink a social account
#[utoipa::path(
    delete,
    path = "/v1/user/social-accounts/{provider}/{account_id}",
    params(
        ("provider" = String, Path, description = "Provider name"),
        ("account_id" = String, Path, description = "Provider account ID")
    ),
    responses(
        (status = 200, description = "Unlinked", body = ApiResponse<MessageResponse>),
        (status = 400, description = "Last authentication method"),
        (status = 404, description = "Social account not found")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn unlink_social_account(
    State(state): State<UsersState>,
    auth: AuthUser,
    Path((provider, account_id)): Path<(String, String)>,
) -> ApiResult<MessageResponse> {
    state
        .users
        .unlink_social_account(auth.user.id, &provider, &account_id)
        .await?;
    Ok(ApiResponse::success(MessageResponse::new(
        "Social account unlinked",
    )))
}

/// GET /v1/user/usage - Usage counters
#[utoipa::path(
    get,
    path = "/v1/user/usage",
    responses(
        (status = 200, description = "Usage counters", body = ApiResponse<UsageStats>),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_usage(State(state): State<UsersState>, auth: AuthUser) -> ApiResult<UsageStats> {
    let usage = state.users.get_usage(auth.user.id).await?;
    Ok(ApiResponse::success(usage))
}

/// POST /v1/user/usage - Record one unit of usage
#[utoipa::path(
    post,
    path = "/v1/user/usage",
    responses(
        (status = 200, description = "Counters after the increment", body = ApiResponse<UsageStats>),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Usage or monthly limit exceeded")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn increment_usage(
    State(state): State<UsersState>,
    auth: AuthUser,
) -> ApiResult<UsageStats> {
    let usage = state.users.increment_usage(auth.user.id).await?;
    Ok(ApiResponse::success(usage))
}

/// GET /v1/user/subscription - Subscription fields
#[utoipa::path(
    get,
    path = "/v1/user/subscription",
    responses(
        (status = 200, description = "Subscription", body = ApiResponse<SubscriptionInfo>),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_subscription(
    State(state): State<UsersState>,
    auth: AuthUser,
) -> ApiResult<SubscriptionInfo> {
    let subscription = state.users.get_subscription(auth.user.id).await?;
    Ok(ApiResponse::success(subscription))
}
