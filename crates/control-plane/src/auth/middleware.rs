// Authentication extractors
// Decision: Support both header-based (API) and cookie-based (browser) session tokens
// Decision: Role gates are extractors layered on AuthUser

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use axum_extra::extract::CookieJar;
use nicheflow_core::{ServiceError, Session, User, UserRole};

use super::config::AuthConfig;
use crate::api::common::ApiError;
use crate::services::AuthService;

/// Name of the cookie carrying the session token for browser clients
pub const SESSION_COOKIE: &str = "session_token";

/// Authenticated user context extracted from request
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub session: Session,
}

impl AuthUser {
    pub fn has_role(&self, allowed: &[UserRole]) -> bool {
        allowed.contains(&self.user.role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(&[UserRole::Admin])
    }
}

/// Auth state shared across routes
#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub service: AuthService,
}

impl AuthState {
    pub fn new(config: AuthConfig, service: AuthService) -> Self {
        Self { config, service }
    }
}

/// Helper trait for extracting AuthState from application state
pub trait FromRef<T> {
    fn from_ref(input: &T) -> Self;
}

impl FromRef<AuthState> for AuthState {
    fn from_ref(input: &AuthState) -> Self {
        input.clone()
    }
}

/// Session token from `Authorization: Bearer`, falling back to the session cookie
pub fn session_token(parts: &Parts) -> Result<Option<String>, ApiError> {
    if let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| ApiError::unauthorized("Invalid authorization header"))?;
        let token = auth_str
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Invalid authorization header"))?;
        return Ok(Some(token.to_string()));
    }

    let jar = CookieJar::from_headers(&parts.headers);
    Ok(jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty()))
}

async fn extract_auth_user(parts: &Parts, auth_state: &AuthState) -> Result<AuthUser, ApiError> {
    let token = session_token(parts)?
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let (session, user) = auth_state
        .service
        .validate_session(&token)
        .await
        .map_err(|e| match e {
            ServiceError::SessionNotFound | ServiceError::SessionExpired => {
                tracing::debug!("Session validation failed: {}", e);
                ApiError::unauthorized("Invalid or expired session").with_error(e.to_string())
            }
            other => ApiError::from(other),
        })?;

    if !user.is_active() {
        tracing::info!(user_id = %user.id, status = %user.status, "Inactive user rejected");
        return Err(ApiError::forbidden("User account is not active"));
    }

    Ok(AuthUser { user, session })
}

/// Extractor for authenticated user
/// This is required - returns 401 if not authenticated
#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);
        extract_auth_user(parts, &auth_state).await
    }
}

/// Optional auth extractor - None when credentials are missing or invalid
#[derive(Debug, Clone)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for OptionalAuthUser
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);
        Ok(OptionalAuthUser(
            extract_auth_user(parts, &auth_state).await.ok(),
        ))
    }
}

/// Check an authenticated user against a role allow-list
pub fn require_role(user: &AuthUser, allowed: &[UserRole], path: &str) -> Result<(), ApiError> {
    if user.has_role(allowed) {
        return Ok(());
    }
    tracing::warn!(
        path,
        user_id = %user.user.id,
        role = %user.user.role,
        "Role check failed"
    );
    Err(ApiError::forbidden("Insufficient permissions"))
}

/// Require admin role extractor
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        require_role(&user, &[UserRole::Admin], parts.uri.path())
            .map_err(|_| ApiError::forbidden("Admin access required"))?;
        Ok(AdminUser(user))
    }
}
