// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use nicheflow_core::{
    Account, Session, SocialAccount, SubscriptionInfo, UsageRejection, UsageStats, User,
    DEFAULT_MONTHLY_LIMIT, DEFAULT_USAGE_LIMIT,
};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Users
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub clerk_id: Option<String>,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub image_url: String,
    pub email_verified: bool,
    pub phone_number: Option<String>,
    pub phone_verified: bool,
    pub last_sign_in_at: Option<DateTime<Utc>>,
    pub language: String,
    pub theme: String,
    pub time_zone: String,
    pub date_format: String,
    pub time_format: String,
    pub notification_email: bool,
    pub notification_mobile: bool,
    pub notification_web: bool,
    pub role: String,
    pub status: String,
    pub subscription_id: Option<String>,
    pub subscription_plan: Option<String>,
    pub subscription_status: Option<String>,
    pub subscription_start: Option<DateTime<Utc>>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub usage_limit: i32,
    pub usage_count: i32,
    pub monthly_limit: i32,
    pub monthly_count: i32,
    pub last_reset_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    /// Fresh row with column defaults, as the database would fill them in.
    pub(crate) fn from_create(input: CreateUserRow, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            clerk_id: input.clerk_id,
            email: input.email,
            username: input.username,
            first_name: input.first_name,
            last_name: input.last_name,
            image_url: input.image_url,
            email_verified: input.email_verified,
            phone_number: input.phone_number,
            phone_verified: input.phone_verified,
            last_sign_in_at: input.last_sign_in_at,
            language: "zh".to_string(),
            theme: "light".to_string(),
            time_zone: "Asia/Shanghai".to_string(),
            date_format: "YYYY-MM-DD".to_string(),
            time_format: "HH:mm".to_string(),
            notification_email: true,
            notification_mobile: true,
            notification_web: true,
            role: input.role.unwrap_or_else(|| "user".to_string()),
            status: "active".to_string(),
            subscription_id: None,
            subscription_plan: None,
            subscription_status: None,
            subscription_start: None,
            subscription_end: None,
            trial_end: None,
            usage_limit: DEFAULT_USAGE_LIMIT,
            usage_count: 0,
            monthly_limit: DEFAULT_MONTHLY_LIMIT,
            monthly_count: 0,
            last_reset_time: now,
            created_at: now,
            updated_at: now,
        }
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            clerk_id: row.clerk_id,
            email: row.email,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            image_url: row.image_url,
            email_verified: row.email_verified,
            phone_number: row.phone_number,
            phone_verified: row.phone_verified,
            last_sign_in_at: row.last_sign_in_at,
            language: row.language,
            theme: row.theme,
            time_zone: row.time_zone,
            date_format: row.date_format,
            time_format: row.time_format,
            notification_email: row.notification_email,
            notification_mobile: row.notification_mobile,
            notification_web: row.notification_web,
            role: row.role.as_str().into(),
            status: row.status.as_str().into(),
            subscription_id: row.subscription_id,
            subscription_plan: row.subscription_plan,
            subscription_status: row.subscription_status,
            subscription_start: row.subscription_start,
            subscription_end: row.subscription_end,
            trial_end: row.trial_end,
            usage_limit: row.usage_limit,
            usage_count: row.usage_count,
            monthly_limit: row.monthly_limit,
            monthly_count: row.monthly_count,
            last_reset_time: row.last_reset_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateUserRow {
    pub clerk_id: Option<String>,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub image_url: String,
    pub email_verified: bool,
    pub phone_number: Option<String>,
    pub phone_verified: bool,
    pub last_sign_in_at: Option<DateTime<Utc>>,
    /// Defaults to "user"
    pub role: Option<String>,
}

/// Partial user update. `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub clerk_id: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
    pub email_verified: Option<bool>,
    pub phone_number: Option<String>,
    pub phone_verified: Option<bool>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
}

// ============================================
// Preferences
// ============================================

/// Built-in preference columns on the user row. `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdatePreferences {
    pub language: Option<String>,
    pub theme: Option<String>,
    pub time_zone: Option<String>,
    pub date_format: Option<String>,
    pub time_format: Option<String>,
    pub notification_email: Option<bool>,
    pub notification_mobile: Option<bool>,
    pub notification_web: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserPreferenceRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Usage and subscription projections
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct UsageRow {
    pub usage_limit: i32,
    pub usage_count: i32,
    pub monthly_limit: i32,
    pub monthly_count: i32,
    pub last_reset_time: DateTime<Utc>,
}

impl From<UsageRow> for UsageStats {
    fn from(row: UsageRow) -> Self {
        UsageStats {
            usage_limit: row.usage_limit,
            usage_count: row.usage_count,
            monthly_limit: row.monthly_limit,
            monthly_count: row.monthly_count,
            last_reset_time: row.last_reset_time,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub subscription_id: Option<String>,
    pub subscription_plan: Option<String>,
    pub subscription_status: Option<String>,
    pub subscription_start: Option<DateTime<Utc>>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
}

impl From<SubscriptionRow> for SubscriptionInfo {
    fn from(row: SubscriptionRow) -> Self {
        SubscriptionInfo {
            subscription_id: row.subscription_id,
            subscription_plan: row.subscription_plan,
            subscription_status: row.subscription_status,
            subscription_start: row.subscription_start,
            subscription_end: row.subscription_end,
            trial_end: row.trial_end,
        }
    }
}

/// Result of an atomic check-and-increment of the usage counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageOutcome {
    Applied(UsageStats),
    Rejected(UsageRejection),
    UserNotFound,
}

// ============================================
// Sessions
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            user_id: row.user_id,
            token: row.token,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateSessionRow {
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================
// OAuth accounts
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_type: String,
    pub provider: String,
    pub provider_id: String,
    pub provider_account: serde_json::Value,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: row.id,
            user_id: row.user_id,
            account_type: row.account_type,
            provider: row.provider,
            provider_id: row.provider_id,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateAccountRow {
    pub user_id: Uuid,
    pub provider: String,
    pub provider_id: String,
    pub provider_account: serde_json::Value,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

/// Result of binding an external identity to a user.
#[derive(Debug, Clone)]
pub enum LinkOutcome<T> {
    /// Created, or refreshed when already bound to the same user.
    Linked(T),
    /// The identity belongs to a different user.
    AlreadyLinked,
}

// ============================================
// Verification tokens
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct VerificationTokenRow {
    pub id: Uuid,
    pub token: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateVerificationTokenRow {
    pub token: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================
// Social accounts
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct SocialAccountRow {
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
    pub updated_at: DateTime<Utc>,
}

impl From<SocialAccountRow> for SocialAccount {
    fn from(row: SocialAccountRow) -> Self {
        SocialAccount {
            id: row.id,
            user_id: row.user_id,
            provider: row.provider,
            account_id: row.account_id,
            email: row.email,
            username: row.username,
            avatar_url: row.avatar_url,
            is_active: row.is_active,
            last_used: row.last_used,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateSocialAccountRow {
    pub user_id: Uuid,
    pub provider: String,
    pub account_id: String,
    pub email: String,
    pub username: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkOutcome {
    Unlinked,
    NotFound,
    /// Removing the account would leave the user without any way to sign in.
    LastAuthMethod,
}
