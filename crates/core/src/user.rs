// User domain types
//
// The User entity carries profile fields, built-in preferences, usage counters
// and subscription fields in a single row. Projections (UsageStats,
// SubscriptionInfo) are what the usage and subscription endpoints return.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Lifetime usage allowance for a new user.
pub const DEFAULT_USAGE_LIMIT: i32 = 5;
/// Per-calendar-month usage allowance for a new user.
pub const DEFAULT_MONTHLY_LIMIT: i32 = 3;

/// Preference keys stored as columns on the user row.
/// Anything else is a custom key/value preference.
pub const BUILTIN_PREFERENCE_KEYS: &[&str] = &[
    "language",
    "theme",
    "time_zone",
    "date_format",
    "time_format",
    "notification_email",
    "notification_mobile",
    "notification_web",
];

/// Built-in preference keys whose values are booleans.
pub const BOOLEAN_PREFERENCE_KEYS: &[&str] = &[
    "notification_email",
    "notification_mobile",
    "notification_web",
];

/// Merged preference map returned by the preferences endpoint.
pub type Preferences = serde_json::Map<String, serde_json::Value>;

pub fn is_builtin_preference(key: &str) -> bool {
    BUILTIN_PREFERENCE_KEYS.contains(&key)
}

/// User role.
/// - `user`: regular account
/// - `admin`: may access /v1/admin routes
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for UserRole {
    fn from(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        }
    }
}

/// Account status. Only `active` users may authenticate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
    Deleted,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Suspended => "suspended",
            UserStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for UserStatus {
    fn from(s: &str) -> Self {
        match s {
            "inactive" => UserStatus::Inactive,
            "suspended" => UserStatus::Suspended,
            "deleted" => UserStatus::Deleted,
            _ => UserStatus::Active,
        }
    }
}

/// A NicheFlow user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct User {
    pub id: Uuid,
    /// Identifier assigned by Clerk when the user was synced from a webhook.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clerk_id: Option<String>,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub image_url: String,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub phone_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sign_in_at: Option<DateTime<Utc>>,

    pub language: String,
    pub theme: String,
    pub time_zone: String,
    pub date_format: String,
    pub time_format: String,
    pub notification_email: bool,
    pub notification_mobile: bool,
    pub notification_web: bool,

    pub role: UserRole,
    pub status: UserStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_end: Option<DateTime<Utc>>,

    pub usage_limit: i32,
    pub usage_count: i32,
    pub monthly_limit: i32,
    pub monthly_count: i32,
    pub last_reset_time: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// "First Last", falling back to the username and then the email.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if !full.is_empty() {
            full.to_string()
        } else if !self.username.is_empty() {
            self.username.clone()
        } else {
            self.email.clone()
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// True when the user can still sign in without any linked social account.
    pub fn has_verified_contact(&self) -> bool {
        let email = !self.email.is_empty() && self.email_verified;
        let phone = self
            .phone_number
            .as_deref()
            .is_some_and(|p| !p.is_empty())
            && self.phone_verified;
        email || phone
    }

    pub fn usage(&self) -> UsageStats {
        UsageStats {
            usage_limit: self.usage_limit,
            usage_count: self.usage_count,
            monthly_limit: self.monthly_limit,
            monthly_count: self.monthly_count,
            last_reset_time: self.last_reset_time,
        }
    }

    pub fn subscription(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            subscription_id: self.subscription_id.clone(),
            subscription_plan: self.subscription_plan.clone(),
            subscription_status: self.subscription_status.clone(),
            subscription_start: self.subscription_start,
            subscription_end: self.subscription_end,
            trial_end: self.trial_end,
        }
    }

    /// Built-in preferences as a JSON object keyed by preference name.
    pub fn builtin_preferences(&self) -> Preferences {
        let mut prefs = Preferences::new();
        prefs.insert("language".into(), self.language.clone().into());
        prefs.insert("theme".into(), self.theme.clone().into());
        prefs.insert("time_zone".into(), self.time_zone.clone().into());
        prefs.insert("date_format".into(), self.date_format.clone().into());
        prefs.insert("time_format".into(), self.time_format.clone().into());
        prefs.insert("notification_email".into(), self.notification_email.into());
        prefs.insert("notification_mobile".into(), self.notification_mobile.into());
        prefs.insert("notification_web".into(), self.notification_web.into());
        prefs
    }
}

/// Why a usage increment was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageRejection {
    UsageLimitExceeded,
    MonthlyLimitExceeded,
}

/// Usage counters for a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct UsageStats {
    pub usage_limit: i32,
    pub usage_count: i32,
    pub monthly_limit: i32,
    pub monthly_count: i32,
    pub last_reset_time: DateTime<Utc>,
}

impl UsageStats {
    /// True when `now` falls in a later calendar month (UTC) than the last reset.
    pub fn needs_monthly_reset(&self, now: DateTime<Utc>) -> bool {
        (now.year(), now.month()) > (self.last_reset_time.year(), self.last_reset_time.month())
    }

    /// Apply one unit of usage at `now`.
    ///
    /// The monthly counter is reset first when the month rolled over, then the
    /// lifetime limit and the monthly limit are checked in that order. On
    /// rejection nothing is returned to persist.
    pub fn try_increment(&self, now: DateTime<Utc>) -> Result<UsageStats, UsageRejection> {
        let mut next = self.clone();
        if next.needs_monthly_reset(now) {
            next.monthly_count = 0;
            next.last_reset_time = now;
        }

        if next.usage_count >= next.usage_limit {
            return Err(UsageRejection::UsageLimitExceeded);
        }
        if next.monthly_count >= next.monthly_limit {
            return Err(UsageRejection::MonthlyLimitExceeded);
        }

        next.usage_count += 1;
        next.monthly_count += 1;
        Ok(next)
    }
}

/// Subscription fields of a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SubscriptionInfo {
    pub subscription_id: Option<String>,
    pub subscription_plan: Option<String>,
    pub subscription_status: Option<String>,
    pub subscription_start: Option<DateTime<Utc>>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stats(usage: i32, monthly: i32, reset: DateTime<Utc>) -> UsageStats {
        UsageStats {
            usage_limit: DEFAULT_USAGE_LIMIT,
            usage_count: usage,
            monthly_limit: DEFAULT_MONTHLY_LIMIT,
            monthly_count: monthly,
            last_reset_time: reset,
        }
    }

    #[test]
    fn test_role_and_status_parsing() {
        assert_eq!(UserRole::from("admin"), UserRole::Admin);
        assert_eq!(UserRole::from("something"), UserRole::User);
        assert_eq!(UserStatus::from("suspended"), UserStatus::Suspended);
        assert_eq!(UserStatus::from(""), UserStatus::Active);
        assert_eq!(UserRole::Admin.to_string(), "admin");
        assert_eq!(
            serde_json::to_string(&UserStatus::Deleted).unwrap(),
            "\"deleted\""
        );
    }

    #[test]
    fn test_increment_within_limits() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let next = stats(0, 0, now).try_increment(now).unwrap();
        assert_eq!(next.usage_count, 1);
        assert_eq!(next.monthly_count, 1);
        assert_eq!(next.last_reset_time, now);
    }

    #[test]
    fn test_monthly_limit_exceeded() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let result = stats(3, 3, now).try_increment(now);
        assert_eq!(result, Err(UsageRejection::MonthlyLimitExceeded));
    }

    #[test]
    fn test_usage_limit_checked_before_monthly() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let result = stats(5, 3, now).try_increment(now);
        assert_eq!(result, Err(UsageRejection::UsageLimitExceeded));
    }

    #[test]
    fn test_month_rollover_resets_monthly_count() {
        let reset = Utc.with_ymd_and_hms(2025, 3, 31, 23, 59, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 1).unwrap();
        let next = stats(3, 3, reset).try_increment(now).unwrap();
        assert_eq!(next.monthly_count, 1);
        assert_eq!(next.usage_count, 4);
        assert_eq!(next.last_reset_time, now);
    }

    #[test]
    fn test_year_rollover_resets_even_for_earlier_month_number() {
        let reset = Utc.with_ymd_and_hms(2024, 12, 15, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        assert!(stats(0, 3, reset).needs_monthly_reset(now));
        assert!(!stats(0, 3, now).needs_monthly_reset(now));
    }

    #[test]
    fn test_rollover_does_not_bypass_lifetime_limit() {
        let reset = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let result = stats(5, 3, reset).try_increment(now);
        assert_eq!(result, Err(UsageRejection::UsageLimitExceeded));
    }

    #[test]
    fn test_builtin_preference_keys() {
        assert!(is_builtin_preference("theme"));
        assert!(is_builtin_preference("notification_web"));
        assert!(!is_builtin_preference("editor_font"));
    }
}
