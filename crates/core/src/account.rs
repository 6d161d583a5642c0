// Linked identity types
//
// Account: an OAuth identity created by the sign-in callback.
// SocialAccount: an identity the user linked explicitly from their profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// OAuth account link. The (provider, provider_id) pair is unique across users.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Always "oauth" for accounts created by the callback.
    pub account_type: String,
    pub provider: String,
    /// Subject id assigned by the provider.
    pub provider_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Social identity linked to a user profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SocialAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub account_id: String,
    pub email: String,
    pub username: String,
    pub avatar_url: String,
    pub is_active: bool,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
