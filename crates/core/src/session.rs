// Session domain types
//
// A Session maps an opaque bearer token to a user until it expires.
// The token itself is never serialized into API responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Session {
    /// Unique identifier for the session.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Bearer token presented in `Authorization: Bearer <token>`.
    #[serde(skip_serializing, default)]
    pub token: String,
    /// The session is rejected once this instant has passed.
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
