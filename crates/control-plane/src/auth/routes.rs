// Authentication HTTP routes
// Decision: Auth routes live under /auth/* (unversioned), matching the OAuth redirect URIs
// Decision: The callback answers with JSON and also sets an HttpOnly session cookie

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use nicheflow_core::{ServiceError, Session, User};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{
    middleware::{AuthState, AuthUser, OptionalAuthUser, SESSION_COOKIE},
    oauth::OAuthProvider,
};
use crate::api::common::{ApiError, ApiResponse, ApiResult, MessageResponse};

/// OAuth provider descriptor
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderResponse {
    #[schema(example = "google")]
    pub id: String,
    #[schema(example = "Google")]
    pub name: String,
    #[schema(example = "oauth")]
    #[serde(rename = "type")]
    pub provider_type: String,
    pub scopes: Vec<String>,
    /// True when the signed-in caller already has this provider linked
    pub linked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthUrlResponse {
    pub url: String,
}

/// Result of a successful OAuth sign-in
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub session: Session,
    pub user: User,
    /// Session token to send as `Authorization: Bearer <token>`
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub user: User,
    pub session: Session,
}

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token: Option<String>,
}

/// Create auth routes
pub fn routes(state: AuthState) -> Router {
    Router::new()
        .route("/auth/providers", get(list_providers))
        .route("/auth/url/:provider", get(get_auth_url))
        .route("/auth/callback/:provider", get(oauth_callback))
        .route("/auth/verify-email", get(verify_email))
        .route("/auth/signout", post(sign_out))
        .route("/auth/session", get(get_session))
        .with_state(state)
}

fn session_cookie(token: String, max_age_secs: i64) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

/// GET /auth/providers - List configured OAuth providers
#[utoipa::path(
    get,
    path = "/auth/providers",
    responses(
        (status = 200, description = "Configured providers", body = ApiResponse<ProvidersResponse>)
    ),
    tag = "auth"
)]
pub async fn list_providers(
    State(state): State<AuthState>,
    OptionalAuthUser(caller): OptionalAuthUser,
) -> ApiResult<ProvidersResponse> {
    let linked = match &caller {
        Some(auth) => state.service.linked_providers(auth.user.id).await?,
        None => Vec::new(),
    };

    let providers = state
        .service
        .oauth()
        .configured_providers()
        .into_iter()
        .map(|(provider, config)| ProviderResponse {
            id: provider.as_str().to_string(),
            name: provider.display_name().to_string(),
            provider_type: "oauth".to_string(),
            scopes: config.scopes.clone(),
            linked: linked.iter().any(|p| p == provider.as_str()),
        })
        .collect();

    Ok(ApiResponse::success(ProvidersResponse { providers }))
}

/// GET /auth/url/:provider - Build the provider authorization URL
#[utoipa::path(
    get,
    path = "/auth/url/{provider}",
    params(("provider" = String, Path, description = "google or github")),
    responses(
        (status = 200, description = "Authorization URL", body = ApiResponse<AuthUrlResponse>),
        (status = 400, description = "Unsupported or unconfigured provider")
    ),
    tag = "auth"
)]
pub async fn get_auth_url(
    State(state): State<AuthState>,
    Path(provider): Path<String>,
) -> ApiResult<AuthUrlResponse> {
    let url = state.service.oauth().get_auth_url(&provider)?;
    Ok(ApiResponse::success(AuthUrlResponse { url }))
}

/// GET /auth/callback/:provider - Complete the OAuth authorization-code flow
///
/// Exchanges the code, finds or creates the local user, links the provider
/// identity and opens a session.
#[utoipa::path(
    get,
    path = "/auth/callback/{provider}",
    params(
        ("provider" = String, Path, description = "google or github"),
        ("code" = String, Query, description = "Authorization code")
    ),
    responses(
        (status = 200, description = "Signed in", body = ApiResponse<AuthResponse>),
        (status = 400, description = "Missing code or unsupported provider"),
        (status = 500, description = "Provider or storage failure")
    ),
    tag = "auth"
)]
pub async fn oauth_callback(
    State(state): State<AuthState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<AuthResponse>), ApiError> {
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::validation("Authorization code is required"))?;
    let provider = OAuthProvider::parse(&provider)?;

    let user = state
        .service
        .handle_oauth_callback(provider.as_str(), &code)
        .await
        .map_err(|e| {
            tracing::warn!(provider = provider.as_str(), "OAuth callback failed: {}", e);
            ApiError::from(e)
        })?;

    let max_age = chrono::Duration::from_std(state.config.session_max_age)
        .map_err(|e| ApiError::server(format!("Invalid session max age: {}", e)))?;
    let session = state
        .service
        .create_session(user.id, Utc::now() + max_age)
        .await?;

    let jar = jar.add(session_cookie(
        session.token.clone(),
        max_age.num_seconds(),
    ));

    Ok((
        jar,
        ApiResponse::success(AuthResponse {
            access_token: session.token.clone(),
            session,
            user,
        }),
    ))
}

/// GET /auth/verify-email - Consume an email verification token
#[utoipa::path(
    get,
    path = "/auth/verify-email",
    params(("token" = String, Query, description = "Verification token")),
    responses(
        (status = 200, description = "Email verified", body = ApiResponse<MessageResponse>),
        (status = 400, description = "Token missing, expired or already used")
    ),
    tag = "auth"
)]
pub async fn verify_email(
    State(state): State<AuthState>,
    Query(query): Query<VerifyEmailQuery>,
) -> ApiResult<MessageResponse> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::validation("Verification token is required"))?;

    state.service.verify_email(&token).await.map_err(|e| match e {
        ServiceError::Internal(_) => ApiError::from(e),
        other => ApiError::validation("Email verification failed").with_error(other.to_string()),
    })?;

    Ok(ApiResponse::success(MessageResponse::new("Email verified")))
}

/// POST /auth/signout - End the current session
#[utoipa::path(
    post,
    path = "/auth/signout",
    responses(
        (status = 200, description = "Signed out", body = ApiResponse<MessageResponse>),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn sign_out(
    State(state): State<AuthState>,
    auth: AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<MessageResponse>), ApiError> {
    state.service.delete_session(&auth.session.token).await?;
    tracing::debug!(user_id = %auth.user.id, "Signed out");

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((jar, ApiResponse::success(MessageResponse::new("Signed out"))))
}

/// GET /auth/session - Current user and session
#[utoipa::path(
    get,
    path = "/auth/session",
    responses(
        (status = 200, description = "Current session", body = ApiResponse<SessionResponse>),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn get_session(auth: AuthUser) -> ApiResult<SessionResponse> {
    Ok(ApiResponse::success(SessionResponse {
        user: auth.user,
        session: auth.session,
    }))
}
