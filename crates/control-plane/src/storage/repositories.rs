// Repository layer for PostgreSQL
// Decision: Raw sqlx queries with FromRow rows, no ORM
// Decision: Multi-step checks (usage, preferences, unlink) run in one transaction

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use nicheflow_core::{SubscriptionInfo, User};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::*;

const USER_COLUMNS: &str = "id, clerk_id, email, username, first_name, last_name, image_url, \
    email_verified, phone_number, phone_verified, last_sign_in_at, \
    language, theme, time_zone, date_format, time_format, \
    notification_email, notification_mobile, notification_web, role, status, \
    subscription_id, subscription_plan, subscription_status, subscription_start, \
    subscription_end, trial_end, usage_limit, usage_count, monthly_limit, monthly_count, \
    last_reset_time, created_at, updated_at";

const ACCOUNT_COLUMNS: &str = "id, user_id, account_type, provider, provider_id, \
    provider_account, access_token, refresh_token, expires_at, token_type, scope, id_token, \
    created_at, updated_at";

const SOCIAL_ACCOUNT_COLUMNS: &str = "id, user_id, provider, account_id, email, username, \
    avatar_url, is_active, last_used, created_at, updated_at";

/// Escape LIKE wildcards so search terms match literally
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations from crates/control-plane/migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    // ============================================
    // Users
    // ============================================

    pub async fn create_user(&self, input: CreateUserRow) -> Result<UserRow> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, clerk_id, email, username, first_name, last_name, image_url,
                email_verified, phone_number, phone_verified, last_sign_in_at, role)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(&input.clerk_id)
        .bind(&input.email)
        .bind(&input.username)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.image_url)
        .bind(input.email_verified)
        .bind(&input.phone_number)
        .bind(input.phone_verified)
        .bind(input.last_sign_in_at)
        .bind(input.role.as_deref().unwrap_or("user"))
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_user_by_clerk_id(&self, clerk_id: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE clerk_id = $1"
        ))
        .bind(clerk_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn update_user(&self, id: Uuid, input: UpdateUser) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET
                clerk_id = COALESCE($2, clerk_id),
                email = COALESCE($3, email),
                username = COALESCE($4, username),
                first_name = COALESCE($5, first_name),
                last_name = COALESCE($6, last_name),
                image_url = COALESCE($7, image_url),
                email_verified = COALESCE($8, email_verified),
                phone_number = COALESCE($9, phone_number),
                phone_verified = COALESCE($10, phone_verified),
                last_sign_in_at = COALESCE($11, last_sign_in_at),
                status = COALESCE($12, status),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&input.clerk_id)
        .bind(&input.email)
        .bind(&input.username)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.image_url)
        .bind(input.email_verified)
        .bind(&input.phone_number)
        .bind(input.phone_verified)
        .bind(input.last_sign_in_at)
        .bind(&input.status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_users(&self, search: Option<&str>) -> Result<Vec<UserRow>> {
        let pattern = search.map(|q| format!("%{}%", escape_like(q)));
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE $1::TEXT IS NULL
                OR email ILIKE $1 ESCAPE '\'
                OR username ILIKE $1 ESCAPE '\'
                OR (first_name || ' ' || last_name) ILIKE $1 ESCAPE '\'
            ORDER BY created_at DESC
            "#
        ))
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Flip `email_verified` for the user owning `email`. Returns false if no such user.
    pub async fn mark_email_verified(&self, email: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET email_verified = TRUE, updated_at = NOW() WHERE email = $1",
        )
        .bind(email)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
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
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET
                language = COALESCE($2, language),
                theme = COALESCE($3, theme),
                time_zone = COALESCE($4, time_zone),
                date_format = COALESCE($5, date_format),
                time_format = COALESCE($6, time_format),
                notification_email = COALESCE($7, notification_email),
                notification_mobile = COALESCE($8, notification_mobile),
                notification_web = COALESCE($9, notification_web),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&builtin.language)
        .bind(&builtin.theme)
        .bind(&builtin.time_zone)
        .bind(&builtin.date_format)
        .bind(&builtin.time_format)
        .bind(builtin.notification_email)
        .bind(builtin.notification_mobile)
        .bind(builtin.notification_web)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        for (key, value) in custom {
            sqlx::query(
                r#"
                INSERT INTO user_preferences (id, user_id, key, value)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (user_id, key)
                DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(user_id)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(row))
    }

    pub async fn list_user_preferences(&self, user_id: Uuid) -> Result<Vec<UserPreferenceRow>> {
        let rows = sqlx::query_as::<_, UserPreferenceRow>(
            r#"
            SELECT id, user_id, key, value, created_at, updated_at
            FROM user_preferences
            WHERE user_id = $1
            ORDER BY key ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Usage and subscription
    // ============================================

    pub async fn get_usage(&self, user_id: Uuid) -> Result<Option<UsageRow>> {
        let row = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT usage_limit, usage_count, monthly_limit, monthly_count, last_reset_time
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Check-and-increment under a row lock so concurrent calls cannot overshoot a limit.
    pub async fn increment_usage(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<UsageOutcome> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT usage_limit, usage_count, monthly_limit, monthly_count, last_reset_time
            FROM users
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            tx.rollback().await?;
            return Ok(UsageOutcome::UserNotFound);
        };

        let next = match nicheflow_core::UsageStats::from(current).try_increment(now) {
            Ok(next) => next,
            Err(rejection) => {
                tx.rollback().await?;
                return Ok(UsageOutcome::Rejected(rejection));
            }
        };

        sqlx::query(
            r#"
            UPDATE users SET
                usage_count = $2,
                monthly_count = $3,
                last_reset_time = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(next.usage_count)
        .bind(next.monthly_count)
        .bind(next.last_reset_time)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(UsageOutcome::Applied(next))
    }

    pub async fn get_subscription(&self, user_id: Uuid) -> Result<Option<SubscriptionRow>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT subscription_id, subscription_plan, subscription_status,
                   subscription_start, subscription_end, trial_end
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn update_subscription(
        &self,
        user_id: Uuid,
        input: &SubscriptionInfo,
    ) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET
                subscription_id = $2,
                subscription_plan = $3,
                subscription_status = $4,
                subscription_start = $5,
                subscription_end = $6,
                trial_end = $7,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&input.subscription_id)
        .bind(&input.subscription_plan)
        .bind(&input.subscription_status)
        .bind(input.subscription_start)
        .bind(input.subscription_end)
        .bind(input.trial_end)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Sessions
    // ============================================

    pub async fn create_session(&self, input: CreateSessionRow) -> Result<SessionRow> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO sessions (id, user_id, token, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, token, expires_at, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.user_id)
        .bind(&input.token)
        .bind(input.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Lookup by token, expired sessions included.
    pub async fn get_session_by_token(&self, token: &str) -> Result<Option<SessionRow>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, token, expires_at, created_at
            FROM sessions
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn delete_session_by_token(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // ============================================
    // OAuth accounts
    // ============================================

    /// Insert or refresh the (provider, provider_id) link.
    /// The conflict update only fires for the same user; otherwise nothing is returned.
    pub async fn upsert_account(&self, input: CreateAccountRow) -> Result<LinkOutcome<AccountRow>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            INSERT INTO accounts (id, user_id, account_type, provider, provider_id, provider_account,
                access_token, refresh_token, expires_at, token_type, scope, id_token)
            VALUES ($1, $2, 'oauth', $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (provider, provider_id) DO UPDATE SET
                provider_account = EXCLUDED.provider_account,
                access_token = EXCLUDED.access_token,
                refresh_token = COALESCE(EXCLUDED.refresh_token, accounts.refresh_token),
                expires_at = EXCLUDED.expires_at,
                token_type = EXCLUDED.token_type,
                scope = EXCLUDED.scope,
                id_token = EXCLUDED.id_token,
                updated_at = NOW()
            WHERE accounts.user_id = EXCLUDED.user_id
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(input.user_id)
        .bind(&input.provider)
        .bind(&input.provider_id)
        .bind(&input.provider_account)
        .bind(&input.access_token)
        .bind(&input.refresh_token)
        .bind(input.expires_at)
        .bind(&input.token_type)
        .bind(&input.scope)
        .bind(&input.id_token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => LinkOutcome::Linked(row),
            None => LinkOutcome::AlreadyLinked,
        })
    }

    pub async fn get_account_by_provider(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<AccountRow>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE provider = $1 AND provider_id = $2"
        ))
        .bind(provider)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_accounts_for_user(&self, user_id: Uuid) -> Result<Vec<AccountRow>> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1 ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Verification tokens
    // ============================================

    pub async fn create_verification_token(
        &self,
        input: CreateVerificationTokenRow,
    ) -> Result<VerificationTokenRow> {
        let row = sqlx::query_as::<_, VerificationTokenRow>(
            r#"
            INSERT INTO verification_tokens (id, token, email, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, token, email, expires_at, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.token)
        .bind(&input.email)
        .bind(input.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Delete and return the token if it is still valid at `now`.
    pub async fn consume_verification_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationTokenRow>> {
        let row = sqlx::query_as::<_, VerificationTokenRow>(
            r#"
            DELETE FROM verification_tokens
            WHERE token = $1 AND expires_at > $2
            RETURNING id, token, email, expires_at, created_at
            "#,
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Social accounts
    // ============================================

    pub async fn link_social_account(
        &self,
        input: CreateSocialAccountRow,
    ) -> Result<LinkOutcome<SocialAccountRow>> {
        let row = sqlx::query_as::<_, SocialAccountRow>(&format!(
            r#"
            INSERT INTO social_accounts (id, user_id, provider, account_id, email, username, avatar_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (provider, account_id) DO UPDATE SET
                email = EXCLUDED.email,
                username = EXCLUDED.username,
                avatar_url = EXCLUDED.avatar_url,
                is_active = TRUE,
                last_used = NOW(),
                updated_at = NOW()
            WHERE social_accounts.user_id = EXCLUDED.user_id
            RETURNING {SOCIAL_ACCOUNT_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(input.user_id)
        .bind(&input.provider)
        .bind(&input.account_id)
        .bind(&input.email)
        .bind(&input.username)
        .bind(&input.avatar_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => LinkOutcome::Linked(row),
            None => LinkOutcome::AlreadyLinked,
        })
    }

    pub async fn unlink_social_account(
        &self,
        user_id: Uuid,
        provider: &str,
        account_id: &str,
    ) -> Result<UnlinkOutcome> {
        let mut tx = self.pool.begin().await?;

        // Lock the user row first so concurrent unlinks for one user serialize
        let user = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user) = user else {
            tx.rollback().await?;
            return Ok(UnlinkOutcome::NotFound);
        };

        let target: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM social_accounts
            WHERE user_id = $1 AND provider = $2 AND account_id = $3
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((target_id,)) = target else {
            tx.rollback().await?;
            return Ok(UnlinkOutcome::NotFound);
        };

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM social_accounts WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        if count <= 1 && !User::from(user).has_verified_contact() {
            tx.rollback().await?;
            return Ok(UnlinkOutcome::LastAuthMethod);
        }

        sqlx::query("DELETE FROM social_accounts WHERE id = $1")
            .bind(target_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(UnlinkOutcome::Unlinked)
    }

    pub async fn list_social_accounts(&self, user_id: Uuid) -> Result<Vec<SocialAccountRow>> {
        let rows = sqlx::query_as::<_, SocialAccountRow>(&format!(
            r#"
            SELECT {SOCIAL_ACCOUNT_COLUMNS}
            FROM social_accounts
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
