// Storage backend abstraction
// Decision: Use enum dispatch for simplicity over trait objects
//
// StorageBackend works with either PostgreSQL (production) or the in-memory
// database (dev mode, tests). Both variants expose the same operations.

use anyhow::Result;
use chrono::{DateTime, Utc};
use nicheflow_core::SubscriptionInfo;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::memory::InMemoryDatabase;
use super::models::*;
use super::repositories::Database;

/// Emails are stored and looked up in one canonical form
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Storage backend that can be either PostgreSQL or in-memory
#[derive(Clone)]
pub enum StorageBackend {
    /// PostgreSQL database (production)
    Postgres(Database),
    /// In-memory database (dev mode)
    InMemory(Arc<InMemoryDatabase>),
}

impl StorageBackend {
    /// Connect to PostgreSQL and apply pending migrations
    pub async fn postgres(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = Database::from_url(database_url, max_connections).await?;
        db.migrate().await?;
        Ok(Self::Postgres(db))
    }

    /// Create an in-memory storage backend
    pub fn in_memory() -> Self {
        Self::InMemory(Arc::new(InMemoryDatabase::new()))
    }

    /// Check if this is dev mode (in-memory)
    pub fn is_dev_mode(&self) -> bool {
        matches!(self, Self::InMemory(_))
    }

    /// Name reported by the health endpoint
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::InMemory(_) => "memory",
        }
    }

    /// Get the PostgreSQL pool if using PostgreSQL backend
    /// Returns None for in-memory backend
    pub fn pool(&self) -> Option<&PgPool> {
        match self {
            Self::Postgres(db) => Some(db.pool()),
            Self::InMemory(_) => None,
        }
    }

    // ============================================
    // Users
    // ============================================

    pub async fn create_user(&self, mut input: CreateUserRow) -> Result<UserRow> {
        input.email = normalize_email(&input.email);
        match self {
            Self::Postgres(db) => db.create_user(input).await,
            Self::InMemory(db) => db.create_user(input).await,
        }
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<UserRow>> {
        match self {
            Self::Postgres(db) => db.get_user(id).await,
            Self::InMemory(db) => db.get_user(id).await,
        }
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let email = normalize_email(email);
        match self {
            Self::Postgres(db) => db.get_user_by_email(&email).await,
            Self::InMemory(db) => db.get_user_by_email(&email).await,
        }
    }

    pub async fn get_user_by_clerk_id(&self, clerk_id: &str) -> Result<Option<UserRow>> {
        match self {
            Self::Postgres(db) => db.get_user_by_clerk_id(clerk_id).await,
            Self::InMemory(db) => db.get_user_by_clerk_id(clerk_id).await,
        }
    }

    pub async fn update_user(&self, id: Uuid, mut input: UpdateUser) -> Result<Option<UserRow>> {
        input.email = input.email.as_deref().map(normalize_email);
        match self {
            Self::Postgres(db) => db.update_user(id, input).await,
            Self::InMemory(db) => db.update_user(id, input).await,
        }
    }

    pub async fn list_users(&self, search: Option<&str>) -> Result<Vec<UserRow>> {
        match self {
            Self::Postgres(db) => db.list_users(search).await,
            Self::InMemory(db) => db.list_users(search).await,
        }
    }

    pub async fn mark_email_verified(&self, email: &str) -> Result<bool> {
        let email = normalize_email(email);
        match self {
            Self::Postgres(db) => db.mark_email_verified(&email).await,
            Self::InMemory(db) => db.mark_email_verified(&email).await,
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
        match self {
            Self::Postgres(db) => db.update_user_preferences(user_id, builtin, custom).await,
            Self::InMemory(db) => db.update_user_preferences(user_id, builtin, custom).await,
        }
    }

    pub async fn list_user_preferences(&self, user_id: Uuid) -> Result<Vec<UserPreferenceRow>> {
        match self {
            Self::Postgres(db) => db.list_user_preferences(user_id).await,
            Self::InMemory(db) => db.list_user_preferences(user_id).await,
        }
    }

    // ============================================
    // Usage and subscription
    // ============================================

    pub async fn get_usage(&self, user_id: Uuid) -> Result<Option<UsageRow>> {
        match self {
            Self::Postgres(db) => db.get_usage(user_id).await,
            Self::InMemory(db) => db.get_usage(user_id).await,
        }
    }

    pub async fn increment_usage(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<UsageOutcome> {
        match self {
            Self::Postgres(db) => db.increment_usage(user_id, now).await,
            Self::InMemory(db) => db.increment_usage(user_id, now).await,
        }
    }

    pub async fn get_subscription(&self, user_id: Uuid) -> Result<Option<SubscriptionRow>> {
        match self {
            Self::Postgres(db) => db.get_subscription(user_id).await,
            Self::InMemory(db) => db.get_subscription(user_id).await,
        }
    }

    pub async fn update_subscription(
        &self,
        user_id: Uuid,
        input: &SubscriptionInfo,
    ) -> Result<Option<UserRow>> {
        match self {
            Self::Postgres(db) => db.update_subscription(user_id, input).await,
            Self::InMemory(db) => db.update_subscription(user_id, input).await,
        }
    }

    // ============================================
    // Sessions
    // ============================================

    pub async fn create_session(&self, input: CreateSessionRow) -> Result<SessionRow> {
        match self {
            Self::Postgres(db) => db.create_session(input).await,
            Self::InMemory(db) => db.create_session(input).await,
        }
    }

    pub async fn get_session_by_token(&self, token: &str) -> Result<Option<SessionRow>> {
        match self {
            Self::Postgres(db) => db.get_session_by_token(token).await,
            Self::InMemory(db) => db.get_session_by_token(token).await,
        }
    }

    pub async fn delete_session_by_token(&self, token: &str) -> Result<bool> {
        match self {
            Self::Postgres(db) => db.delete_session_by_token(token).await,
            Self::InMemory(db) => db.delete_session_by_token(token).await,
        }
    }

    pub async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64> {
        match self {
            Self::Postgres(db) => db.delete_sessions_for_user(user_id).await,
            Self::InMemory(db) => db.delete_sessions_for_user(user_id).await,
        }
    }

    pub async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        match self {
            Self::Postgres(db) => db.delete_expired_sessions(now).await,
            Self::InMemory(db) => db.delete_expired_sessions(now).await,
        }
    }

    // ============================================
    // OAuth accounts
    // ============================================

    pub async fn upsert_account(&self, input: CreateAccountRow) -> Result<LinkOutcome<AccountRow>> {
        match self {
            Self::Postgres(db) => db.upsert_account(input).await,
            Self::InMemory(db) => db.upsert_account(input).await,
        }
    }

    pub async fn get_account_by_provider(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<AccountRow>> {
        match self {
            Self::Postgres(db) => db.get_account_by_provider(provider, provider_id).await,
            Self::InMemory(db) => db.get_account_by_provider(provider, provider_id).await,
        }
    }

    pub async fn list_accounts_for_user(&self, user_id: Uuid) -> Result<Vec<AccountRow>> {
        match self {
            Self::Postgres(db) => db.list_accounts_for_user(user_id).await,
            Self::InMemory(db) => db.list_accounts_for_user(user_id).await,
        }
    }

    // ============================================
    // Verification tokens
    // ============================================

    pub async fn create_verification_token(
        &self,
        mut input: CreateVerificationTokenRow,
    ) -> Result<VerificationTokenRow> {
        input.email = normalize_email(&input.email);
        match self {
            Self::Postgres(db) => db.create_verification_token(input).await,
            Self::InMemory(db) => db.create_verification_token(input).await,
        }
    }

    /// Delete and return the token if it exists and has not expired
    pub async fn consume_verification_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationTokenRow>> {
        match self {
            Self::Postgres(db) => db.consume_verification_token(token, now).await,
            Self::InMemory(db) => db.consume_verification_token(token, now).await,
        }
    }

    // ============================================
    // Social accounts
    // ============================================

    pub async fn link_social_account(
        &self,
        input: CreateSocialAccountRow,
    ) -> Result<LinkOutcome<SocialAccountRow>> {
        match self {
            Self::Postgres(db) => db.link_social_account(input).await,
            Self::InMemory(db) => db.link_social_account(input).await,
        }
    }

    pub async fn unlink_social_account(
        &self,
        user_id: Uuid,
        provider: &str,
        account_id: &str,
    ) -> Result<UnlinkOutcome> {
        match self {
            Self::Postgres(db) => {
                db.unlink_social_account(user_id, provider, account_id)
                    .await
            }
            Self::InMemory(db) => {
                db.unlink_social_account(user_id, provider, account_id)
                    .await
            }
        }
    }

    pub async fn list_social_accounts(&self, user_id: Uuid) -> Result<Vec<SocialAccountRow>> {
        match self {
            Self::Postgres(db) => db.list_social_accounts(user_id).await,
            Self::InMemory(db) => db.list_social_accounts(user_id).await,
        }
    }
}
