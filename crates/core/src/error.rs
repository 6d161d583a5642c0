// Error types for auth and user services

use thiserror::Error;

use crate::user::UsageRejection;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Error category, used by the HTTP layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed input
    Validation,
    /// Missing, invalid or expired credentials
    Authentication,
    /// Authenticated but not allowed
    Authorization,
    /// Resource does not exist
    NotFound,
    /// OAuth provider failure
    Upstream,
    /// Persistence or other internal failure
    Server,
}

/// Errors surfaced by the auth and user services
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unsupported OAuth provider: {0}")]
    UnsupportedProvider(String),

    #[error("OAuth provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Failed to fetch user info: {0}")]
    UserInfo(String),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Verification token expired or invalid")]
    TokenExpiredOrInvalid,

    #[error("Usage limit exceeded")]
    UsageLimitExceeded,

    #[error("Monthly usage limit exceeded")]
    MonthlyLimitExceeded,

    #[error("Account already linked to another user")]
    AccountAlreadyLinked,

    #[error("Cannot remove the last authentication method")]
    LastAuthMethod,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ServiceError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ServiceError::Validation(msg.into())
    }

    pub fn token_exchange(msg: impl Into<String>) -> Self {
        ServiceError::TokenExchange(msg.into())
    }

    pub fn user_info(msg: impl Into<String>) -> Self {
        ServiceError::UserInfo(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::UnsupportedProvider(_)
            | ServiceError::ProviderNotConfigured(_)
            | ServiceError::TokenExpiredOrInvalid
            | ServiceError::AccountAlreadyLinked
            | ServiceError::LastAuthMethod
            | ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::SessionNotFound | ServiceError::SessionExpired => {
                ErrorKind::Authentication
            }
            ServiceError::UsageLimitExceeded | ServiceError::MonthlyLimitExceeded => {
                ErrorKind::Authorization
            }
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::TokenExchange(_) | ServiceError::UserInfo(_) => ErrorKind::Upstream,
            ServiceError::Internal(_) => ErrorKind::Server,
        }
    }
}

impl From<UsageRejection> for ServiceError {
    fn from(rejection: UsageRejection) -> Self {
        match rejection {
            UsageRejection::UsageLimitExceeded => ServiceError::UsageLimitExceeded,
            UsageRejection::MonthlyLimitExceeded => ServiceError::MonthlyLimitExceeded,
        }
    }
}
