// In-memory storage implementation for dev mode
// Decision: Use parking_lot for thread-safe access
// Decision: UUIDs generated via uuid v7 (time-ordered)
//
// This implementation provides a PostgreSQL-compatible API backed by in-memory
// HashMaps, allowing the control-plane to run without a database for development
// and tests. Unique constraints of the SQL schema are enforced here too.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use nicheflow_core::{SubscriptionInfo, UsageStats, User};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::models::*;

/// In-memory database for dev mode
/// All data is stored in memory and lost on restart
#[derive(Default)]
pub struct InMemoryDatabase {
    users: RwLock<HashMap<Uuid, UserRow>>,
    preferences: RwLock<HashMap<(Uuid, String), UserPreferenceRow>>,
    sessions: RwLock<HashMap<String, SessionRow>>,
    accounts: RwLock<HashMap<(String, String), AccountRow>>,
    verification_tokens: RwLock<HashMap<String, VerificationTokenRow>>,
    social_accounts: RwLock<HashMap<(String, String), SocialAccountRow>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    // ============================================
    // Users
    // ============================================

    pub async fn create_user(&self, input: CreateUserRow) -> Result<UserRow> {
        let mut users = self.users.write();
        if users.values().any(|u| u.email == input.email) {
            return Err(anyhow!(
                "duplicate key value violates unique constraint \"users_email_key\""
            ));
        }
        if let Some(clerk_id) = input.clerk_id.as_deref() {
            if users
                .values()
                .any(|u| u.clerk_id.as_deref() == Some(clerk_id))
            {
                return Err(anyhow!(
                    "duplicate key value violates unique constraint \"users_clerk_id_key\""
                ));
            }
        }

        let row = UserRow::from_create(input, Self::now());
        users.insert(row.id, row.clone());
        Ok(row)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<UserRow>> {
        Ok(self.users.read().get(&id).cloned())
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    pub async fn get_user_by_clerk_id(&self, clerk_id: &str) -> Result<Option<UserRow>> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.clerk_id.as_deref() == Some(clerk_id))
            .cloned())
    }

    pub async fn update_user(&self, id: Uuid, input: UpdateUser) -> Result<Option<UserRow>> {
        let mut users = self.users.write();

        if let Some(email) = input.email.as_deref() {
            if users.values().any(|u| u.id != id && u.email == email) {
                return Err(anyhow!(
                    "duplicate key value violates unique constraint \"users_email_key\""
                ));
            }
        }
        if let Some(clerk_id) = input.clerk_id.as_deref() {
            if users
                .values()
                .any(|u| u.id != id && u.clerk_id.as_deref() == Some(clerk_id))
            {
                return Err(anyhow!(
                    "duplicate key value violates unique constraint \"users_clerk_id_key\""
                ));
            }
        }

        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(clerk_id) = input.clerk_id {
            user.clerk_id = Some(clerk_id);
        }
        if let Some(email) = input.email {
            user.email = email;
        }
        if let Some(username) = input.username {
            user.username = username;
        }
        if let Some(first_name) = input.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = input.last_name {
            user.last_name = last_name;
        }
        if let Some(image_url) = input.image_url {
            user.image_url = image_url;
        }
        if let Some(email_verified) = input.email_verified {
            user.email_verified = email_verified;
        }
        if let Some(phone_number) = input.phone_number {
            user.phone_number = Some(phone_number);
        }
        if let Some(phone_verified) = input.phone_verified {
            user.phone_verified = phone_verified;
        }
        if let Some(last_sign_in_at) = input.last_sign_in_at {
            user.last_sign_in_at = Some(last_sign_in_at);
        }
        if let Some(status) = input.status {
            user.status = status;
        }
        user.updated_at = Self::now();
        Ok(Some(user.clone()))
    }

    pub async fn list_users(&self, search: Option<&str>) -> Result<Vec<UserRow>> {
        let search = search.map(|s| s.to_lowercase());
        let mut rows: Vec<UserRow> = self
            .users
            .read()
            .values()
            .filter(|u| match &search {
                None => true,
                Some(q) => {
                    let full_name = format!("{} {}", u.first_name, u.last_name).to_lowercase();
                    u.email.to_lowercase().contains(q)
                        || u.username.to_lowercase().contains(q)
                        || full_name.contains(q)
                }
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    pub async fn mark_email_verified(&self, email: &str) -> Result<bool> {
        let mut users = self.users.write();
        match users.values_mut().find(|u| u.email == email) {
            Some(user) => {
                user.email_verified = true;
                user.updated_at = Self::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ============================================
    // Preferences
    // ============================================

    pub async fn update_user_preferences(
        &self,
        user_id: Uuid,
        builtin: UpdatePreferences,
        custom: &[(String, String)],
    ) -> Result<Option<UserRow>> {
        let mut users = self.users.write();
        let mut preferences = self.preferences.write();

        let Some(user) = users.get_mut(&user_id) else {
            return Ok(None);
        };
        let now = Self::now();

        if let Some(language) = builtin.language {
            user.language = language;
        }
        if let Some(theme) = builtin.theme {
            user.theme = theme;
        }
        if let Some(time_zone) = builtin.time_zone {
            user.time_zone = time_zone;
        }
        if let Some(date_format) = builtin.date_format {
            user.date_format = date_format;
        }
        if let Some(time_format) = builtin.time_format {
            user.time_format = time_format;
        }
        if let Some(enabled) = builtin.notification_email {
            user.notification_email = enabled;
        }
        if let Some(enabled) = builtin.notification_mobile {
            user.notification_mobile = enabled;
        }
        if let Some(enabled) = builtin.notification_web {
            user.notification_web = enabled;
        }
        user.updated_at = now;

        for (key, value) in custom {
            preferences
                .entry((user_id, key.clone()))
                .and_modify(|row| {
                    row.value = value.clone();
                    row.updated_at = now;
                })
                .or_insert_with(|| UserPreferenceRow {
                    id: Uuid::now_v7(),
                    user_id,
                    key: key.clone(),
                    value: value.clone(),
                    created_at: now,
                    updated_at: now,
                });
        }

        Ok(Some(user.clone()))
    }

    pub async fn list_user_preferences(&self, user_id: Uuid) -> Result<Vec<UserPreferenceRow>> {
        let mut rows: Vec<UserPreferenceRow> = self
            .preferences
            .read()
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rows)
    }

    // ============================================
    // Usage and subscription
    // ============================================

    pub async fn get_usage(&self, user_id: Uuid) -> Result<Option<UsageRow>> {
        Ok(self.users.read().get(&user_id).map(|u| UsageRow {
            usage_limit: u.usage_limit,
            usage_count: u.usage_count,
            monthly_limit: u.monthly_limit,
            monthly_count: u.monthly_count,
            last_reset_time: u.last_reset_time,
        }))
    }

    pub async fn increment_usage(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<UsageOutcome> {
        let mut users = self.users.write();
        let Some(user) = users.get_mut(&user_id) else {
            return Ok(UsageOutcome::UserNotFound);
        };

        let current = UsageStats {
            usage_limit: user.usage_limit,
            usage_count: user.usage_count,
            monthly_limit: user.monthly_limit,
            monthly_count: user.monthly_count,
            last_reset_time: user.last_reset_time,
        };

        match current.try_increment(now) {
            Ok(next) => {
                user.usage_count = next.usage_count;
                user.monthly_count = next.monthly_count;
                user.last_reset_time = next.last_reset_time;
                user.updated_at = Self::now();
                Ok(UsageOutcome::Applied(next))
            }
            Err(rejection) => Ok(UsageOutcome::Rejected(rejection)),
        }
    }

    pub async fn get_subscription(&self, user_id: Uuid) -> Result<Option<SubscriptionRow>> {
        Ok(self.users.read().get(&user_id).map(|u| SubscriptionRow {
            subscription_id: u.subscription_id.clone(),
            subscription_plan: u.subscription_plan.clone(),
            subscription_status: u.subscription_status.clone(),
            subscription_start: u.subscription_start,
            subscription_end: u.subscription_end,
            trial_end: u.trial_end,
        }))
    }

    pub async fn update_subscription(
        &self,
        user_id: Uuid,
        input: &SubscriptionInfo,
    ) -> Result<Option<UserRow>> {
        let mut users = self.users.write();
        let Some(user) = users.get_mut(&user_id) else {
            return Ok(None);
        };
        user.subscription_id = input.subscription_id.clone();
        user.subscription_plan = input.subscription_plan.clone();
        user.subscription_status = input.subscription_status.clone();
        user.subscription_start = input.subscription_start;
        user.subscription_end = input.subscription_end;
        user.trial_end = input.trial_end;
        user.updated_at = Self::now();
        Ok(Some(user.clone()))
    }

    // ============================================
    // Sessions
    // ============================================

    pub async fn create_session(&self, input: CreateSessionRow) -> Result<SessionRow> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&input.token) {
            return Err(anyhow!(
                "duplicate key value violates unique constraint \"sessions_token_key\""
            ));
        }
        let row = SessionRow {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            token: input.token,
            expires_at: input.expires_at,
            created_at: Self::now(),
        };
        sessions.insert(row.token.clone(), row.clone());
        Ok(row)
    }

    pub async fn get_session_by_token(&self, token: &str) -> Result<Option<SessionRow>> {
        Ok(self.sessions.read().get(token).cloned())
    }

    pub async fn delete_session_by_token(&self, token: &str) -> Result<bool> {
        Ok(self.sessions.write().remove(token).is_some())
    }

    pub async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - sessions.len()) as u64)
    }

    pub async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }

    // ============================================
    // OAuth accounts
    // ============================================

    pub async fn upsert_account(&self, input: CreateAccountRow) -> Result<LinkOutcome<AccountRow>> {
        let mut accounts = self.accounts.write();
        let key = (input.provider.clone(), input.provider_id.clone());
        let now = Self::now();

        if let Some(existing) = accounts.get_mut(&key) {
            if existing.user_id != input.user_id {
                return Ok(LinkOutcome::AlreadyLinked);
            }
            existing.provider_account = input.provider_account;
            existing.access_token = input.access_token;
            if input.refresh_token.is_some() {
                existing.refresh_token = input.refresh_token;
            }
            existing.expires_at = input.expires_at;
            existing.token_type = input.token_type;
            existing.scope = input.scope;
            existing.id_token = input.id_token;
            existing.updated_at = now;
            return Ok(LinkOutcome::Linked(existing.clone()));
        }

        let row = AccountRow {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            account_type: "oauth".to_string(),
            provider: input.provider,
            provider_id: input.provider_id,
            provider_account: input.provider_account,
            access_token: input.access_token,
            refresh_token: input.refresh_token,
            expires_at: input.expires_at,
            token_type: input.token_type,
            scope: input.scope,
            id_token: input.id_token,
            created_at: now,
            updated_at: now,
        };
        accounts.insert(key, row.clone());
        Ok(LinkOutcome::Linked(row))
    }

    pub async fn get_account_by_provider(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<AccountRow>> {
        Ok(self
            .accounts
            .read()
            .get(&(provider.to_string(), provider_id.to_string()))
            .cloned())
    }

    pub async fn list_accounts_for_user(&self, user_id: Uuid) -> Result<Vec<AccountRow>> {
        let mut rows: Vec<AccountRow> = self
            .accounts
            .read()
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    // ============================================
    // Verification tokens
    // ============================================

    pub async fn create_verification_token(
        &self,
        input: CreateVerificationTokenRow,
    ) -> Result<VerificationTokenRow> {
        let mut tokens = self.verification_tokens.write();
        if tokens.contains_key(&input.token) {
            return Err(anyhow!(
                "duplicate key value violates unique constraint \"verification_tokens_token_key\""
            ));
        }
        let row = VerificationTokenRow {
            id: Uuid::now_v7(),
            token: input.token,
            email: input.email,
            expires_at: input.expires_at,
            created_at: Self::now(),
        };
        tokens.insert(row.token.clone(), row.clone());
        Ok(row)
    }

    pub async fn consume_verification_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationTokenRow>> {
        let mut tokens = self.verification_tokens.write();
        match tokens.get(token) {
            Some(row) if row.expires_at > now => Ok(tokens.remove(token)),
            _ => Ok(None),
        }
    }

    // ============================================
    // Social accounts
    // ============================================

    pub async fn link_social_account(
        &self,
        input: CreateSocialAccountRow,
    ) -> Result<LinkOutcome<SocialAccountRow>> {
        let mut social = self.social_accounts.write();
        let key = (input.provider.clone(), input.account_id.clone());
        let now = Self::now();

        if let Some(existing) = social.get_mut(&key) {
            if existing.user_id != input.user_id {
                return Ok(LinkOutcome::AlreadyLinked);
            }
            existing.email = input.email;
            existing.username = input.username;
            existing.avatar_url = input.avatar_url;
            existing.is_active = true;
            existing.last_used = now;
            existing.updated_at = now;
            return Ok(LinkOutcome::Linked(existing.clone()));
        }

        let row = SocialAccountRow {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            provider: input.provider,
            account_id: input.account_id,
            email: input.email,
            username: input.username,
            avatar_url: input.avatar_url,
            is_active: true,
            last_used: now,
            created_at: now,
            updated_at: now,
        };
        social.insert(key, row.clone());
        Ok(LinkOutcome::Linked(row))
    }

    pub async fn unlink_social_account(
        &self,
        user_id: Uuid,
        provider: &str,
        account_id: &str,
    ) -> Result<UnlinkOutcome> {
        // Same lock order as update paths: users, then social accounts
        let users = self.users.read();
        let mut social = self.social_accounts.write();

        let Some(user) = users.get(&user_id) else {
            return Ok(UnlinkOutcome::NotFound);
        };

        let key = (provider.to_string(), account_id.to_string());
        match social.get(&key) {
            Some(row) if row.user_id == user_id => {}
            _ => return Ok(UnlinkOutcome::NotFound),
        }

        let count = social.values().filter(|s| s.user_id == user_id).count();
        if count <= 1 && !User::from(user.clone()).has_verified_contact() {
            return Ok(UnlinkOutcome::LastAuthMethod);
        }

        social.remove(&key);
        Ok(UnlinkOutcome::Unlinked)
    }

    pub async fn list_social_accounts(&self, user_id: Uuid) -> Result<Vec<SocialAccountRow>> {
        let mut rows: Vec<SocialAccountRow> = self
            .social_accounts
            .read()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }
}
