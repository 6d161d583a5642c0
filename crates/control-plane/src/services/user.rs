// User service: profile, preferences, usage, subscription, social accounts
// Decision: Built-in preferences live on the user row, custom keys in user_preferences
// Decision: Usage check-and-increment is decided atomically by storage

use crate::api::users::{LinkSocialAccountRequest, UpdateProfileRequest};
use crate::api::validation::{
    validate_image_url, validate_name, validate_phone_number, validate_preference_key,
    validate_preference_value, validate_username,
};
use crate::api::webhooks::ClerkUserData;
use crate::storage::{
    CreateSocialAccountRow, CreateUserRow, LinkOutcome, StorageBackend, UnlinkOutcome,
    UpdatePreferences, UpdateUser, UsageOutcome, UserRow,
};
use chrono::Utc;
use nicheflow_core::{
    is_builtin_preference, Preferences, Result, ServiceError, SocialAccount, SubscriptionInfo,
    UsageStats, User, UserStatus,
};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone)]
pub struct UserService {
    db: StorageBackend,
}

impl UserService {
    pub fn new(db: StorageBackend) -> Self {
        Self { db }
    }

    async fn require_user(&self, id: Uuid) -> Result<UserRow> {
        self.db
            .get_user(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("User"))
    }

    // ============================================
    // Lookups
    // ============================================

    pub async fn get_user(&self, id: Uuid) -> Result<User> {
        Ok(self.require_user(id).await?.into())
    }

    /// None when no user carries this Clerk id
    pub async fn get_user_by_clerk_id(&self, clerk_id: &str) -> Result<Option<User>> {
        Ok(self.db.get_user_by_clerk_id(clerk_id).await?.map(Into::into))
    }

    /// None when no user carries this email
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.db.get_user_by_email(email).await?.map(Into::into))
    }

    pub async fn list_users(&self, search: Option<&str>) -> Result<Vec<User>> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        let rows = self.db.list_users(search).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ============================================
    // Profile
    // ============================================

    pub async fn update_profile(&self, id: Uuid, req: UpdateProfileRequest) -> Result<User> {
        if let Some(username) = req.username.as_deref() {
            validate_username(username)?;
        }
        if let Some(first_name) = req.first_name.as_deref() {
            validate_name("first_name", first_name)?;
        }
        if let Some(last_name) = req.last_name.as_deref() {
            validate_name("last_name", last_name)?;
        }
        if let Some(image_url) = req.image_url.as_deref() {
            validate_image_url(image_url)?;
        }
        if let Some(phone) = req.phone_number.as_deref() {
            validate_phone_number(phone)?;
        }

        let current = self.require_user(id).await?;
        let phone_changed = req
            .phone_number
            .as_deref()
            .is_some_and(|p| current.phone_number.as_deref() != Some(p));

        let update = UpdateUser {
            username: req.username,
            first_name: req.first_name,
            last_name: req.last_name,
            image_url: req.image_url,
            phone_number: req.phone_number,
            // A new number has to be verified again
            phone_verified: phone_changed.then_some(false),
            ..Default::default()
        };

        let row = self
            .db
            .update_user(id, update)
            .await?
            .ok_or_else(|| ServiceError::not_found("User"))?;
        Ok(row.into())
    }

    // ============================================
    // Preferences
    // ============================================

    /// Built-in preferences merged with custom key/value rows
    pub async fn get_preferences(&self, id: Uuid) -> Result<Preferences> {
        let user: User = self.require_user(id).await?.into();
        let custom = self.db.list_user_preferences(id).await?;
        Ok(merge_preferences(&user, custom.into_iter().map(|p| (p.key, p.value))))
    }

    pub async fn update_preferences(&self, id: Uuid, patch: Preferences) -> Result<Preferences> {
        let (builtin, custom) = split_preference_patch(patch)?;

        let row = self
            .db
            .update_user_preferences(id, builtin, &custom)
            .await?
            .ok_or_else(|| ServiceError::not_found("User"))?;

        let user: User = row.into();
        let rows = self.db.list_user_preferences(id).await?;
        Ok(merge_preferences(&user, rows.into_iter().map(|p| (p.key, p.value))))
    }

    // ============================================
    // Usage and subscription
    // ============================================

    /// Count one unit of usage, resetting the monthly counter on a new month
    pub async fn increment_usage(&self, id: Uuid) -> Result<UsageStats> {
        match self.db.increment_usage(id, Utc::now()).await? {
            UsageOutcome::Applied(stats) => Ok(stats),
            UsageOutcome::Rejected(rejection) => {
                tracing::info!(user_id = %id, ?rejection, "Usage increment rejected");
                Err(rejection.into())
            }
            UsageOutcome::UserNotFound => Err(ServiceError::not_found("User")),
        }
    }

    pub async fn get_usage(&self, id: Uuid) -> Result<UsageStats> {
        self.db
            .get_usage(id)
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::not_found("User"))
    }

    pub async fn get_subscription(&self, id: Uuid) -> Result<SubscriptionInfo> {
        self.db
            .get_subscription(id)
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::not_found("User"))
    }

    pub async fn update_subscription(
        &self,
        id: Uuid,
        subscription: SubscriptionInfo,
    ) -> Result<SubscriptionInfo> {
        if let (Some(start), Some(end)) = (subscription.subscription_start, subscription.subscription_end) {
            if end < start {
                return Err(ServiceError::validation(
                    "subscription_end must not be before subscription_start",
                ));
            }
        }

        let row = self
            .db
            .update_subscription(id, &subscription)
            .await?
            .ok_or_else(|| ServiceError::not_found("User"))?;
        tracing::info!(
            user_id = %id,
            plan = ?row.subscription_plan,
            status = ?row.subscription_status,
            "Subscription updated"
        );
        Ok(User::from(row).subscription())
    }

    // ============================================
    // Social accounts
    // ============================================

    pub async fn link_social_account(
        &self,
        id: Uuid,
        req: LinkSocialAccountRequest,
    ) -> Result<SocialAccount> {
        let provider = req.provider.trim().to_lowercase();
        let account_id = req.account_id.trim().to_string();
        if provider.is_empty() || account_id.is_empty() {
            return Err(ServiceError::validation(
                "provider and account_id are required",
            ));
        }
        if let Some(username) = req.username.as_deref() {
            validate_username(username)?;
        }
        if let Some(avatar_url) = req.avatar_url.as_deref() {
            validate_image_url(avatar_url)?;
        }
        self.require_user(id).await?;

        let input = CreateSocialAccountRow {
            user_id: id,
            provider,
            account_id,
            email: req.email.unwrap_or_default(),
            username: req.username.unwrap_or_default(),
            avatar_url: req.avatar_url.unwrap_or_default(),
        };

        match self.db.link_social_account(input).await? {
            LinkOutcome::Linked(row) => Ok(row.into()),
            LinkOutcome::AlreadyLinked => Err(ServiceError::AccountAlreadyLinked),
        }
    }

    /// Refuses to remove the user's last way to sign in
    pub async fn unlink_social_account(
        &self,
        id: Uuid,
        provider: &str,
        account_id: &str,
    ) -> Result<()> {
        match self
            .db
            .unlink_social_account(id, &provider.to_lowercase(), account_id)
            .await?
        {
            UnlinkOutcome::Unlinked => Ok(()),
            UnlinkOutcome::NotFound => Err(ServiceError::not_found("Social account")),
            UnlinkOutcome::LastAuthMethod => Err(ServiceError::LastAuthMethod),
        }
    }

    pub async fn list_social_accounts(&self, id: Uuid) -> Result<Vec<SocialAccount>> {
        self.require_user(id).await?;
        let rows = self.db.list_social_accounts(id).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ============================================
    // Clerk sync
    // ============================================

    /// Create or update the local user mirrored from a Clerk user.
    /// Matches by Clerk id first, then by primary email.
    pub async fn sync_clerk_user(&self, data: &ClerkUserData) -> Result<User> {
        let (email, email_verified) = data
            .primary_email()
            .ok_or_else(|| ServiceError::validation("Clerk user has no email address"))?;
        let phone = data.primary_phone();
        let last_sign_in_at = data.last_sign_in();

        let existing = match self.db.get_user_by_clerk_id(&data.id).await? {
            Some(row) => Some(row),
            None => self.db.get_user_by_email(email).await?,
        };

        let row = match existing {
            Some(row) => {
                let update = UpdateUser {
                    clerk_id: Some(data.id.clone()),
                    email: Some(email.to_string()),
                    username: data.username.clone(),
                    first_name: data.first_name.clone(),
                    last_name: data.last_name.clone(),
                    image_url: data.image_url.clone(),
                    email_verified: Some(email_verified),
                    phone_number: phone.map(|(p, _)| p.to_string()),
                    phone_verified: phone.map(|(_, verified)| verified),
                    last_sign_in_at,
                    ..Default::default()
                };
                self.db
                    .update_user(row.id, update)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("User"))?
            }
            None => {
                let row = self
                    .db
                    .create_user(CreateUserRow {
                        clerk_id: Some(data.id.clone()),
                        email: email.to_string(),
                        username: data.username.clone().unwrap_or_default(),
                        first_name: data.first_name.clone().unwrap_or_default(),
                        last_name: data.last_name.clone().unwrap_or_default(),
                        image_url: data.image_url.clone().unwrap_or_default(),
                        email_verified,
                        phone_number: phone.map(|(p, _)| p.to_string()),
                        phone_verified: phone.is_some_and(|(_, verified)| verified),
                        last_sign_in_at,
                        role: None,
                    })
                    .await?;
                tracing::info!(user_id = %row.id, clerk_id = %data.id, "User created from Clerk");
                row
            }
        };

        Ok(row.into())
    }

    /// Mark the mirrored user deleted and end its sessions.
    /// Returns false when no local user matches.
    pub async fn delete_clerk_user(&self, clerk_id: &str) -> Result<bool> {
        let Some(row) = self.db.get_user_by_clerk_id(clerk_id).await? else {
            return Ok(false);
        };

        self.db
            .update_user(
                row.id,
                UpdateUser {
                    status: Some(UserStatus::Deleted.as_str().to_string()),
                    ..Default::default()
                },
            )
            .await?;
        let sessions = self.db.delete_sessions_for_user(row.id).await?;
        tracing::info!(user_id = %row.id, clerk_id, sessions, "Clerk user deleted");
        Ok(true)
    }
}

/// Custom rows never shadow a built-in key
fn merge_preferences(user: &User, custom: impl Iterator<Item = (String, String)>) -> Preferences {
    let mut prefs = user.builtin_preferences();
    for (key, value) in custom {
        if !is_builtin_preference(&key) {
            prefs.insert(key, Value::String(value));
        }
    }
    prefs
}

fn expect_string(key: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => {
            validate_preference_value(key, &s)?;
            Ok(s)
        }
        _ => Err(ServiceError::validation(format!(
            "preference '{}' must be a string",
            key
        ))),
    }
}

fn expect_bool(key: &str, value: Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        ServiceError::validation(format!("preference '{}' must be a boolean", key))
    })
}

/// Split a preference patch into built-in column updates and custom rows
fn split_preference_patch(patch: Preferences) -> Result<(UpdatePreferences, Vec<(String, String)>)> {
    let mut builtin = UpdatePreferences::default();
    let mut custom = Vec::new();

    for (key, value) in patch {
        match key.as_str() {
            "language" => builtin.language = Some(expect_string(&key, value)?),
            "theme" => builtin.theme = Some(expect_string(&key, value)?),
            "time_zone" => builtin.time_zone = Some(expect_string(&key, value)?),
            "date_format" => builtin.date_format = Some(expect_string(&key, value)?),
            "time_format" => builtin.time_format = Some(expect_string(&key, value)?),
            "notification_email" => builtin.notification_email = Some(expect_bool(&key, value)?),
            "notification_mobile" => {
                builtin.notification_mobile = Some(expect_bool(&key, value)?)
            }
            "notification_web" => builtin.notification_web = Some(expect_bool(&key, value)?),
            _ => {
                validate_preference_key(&key)?;
                let value = expect_string(&key, value)?;
                custom.push((key, value));
            }
        }
    }

    Ok((builtin, custom))
}
