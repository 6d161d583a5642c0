// Auth service: sessions, verification tokens and OAuth sign-in
// Decision: Session and verification tokens are 32 random bytes, hex encoded
// Decision: OAuth identities resolve through their bound account first, then by email

use crate::auth::oauth::{OAuthClient, OAuthProvider, OAuthToken, OAuthUserInfo};
use crate::storage::{
    CreateAccountRow, CreateSessionRow, CreateUserRow, CreateVerificationTokenRow, LinkOutcome,
    StorageBackend, UpdateUser, VerificationTokenRow,
};
use chrono::{DateTime, Duration, Utc};
use nicheflow_core::{Result, ServiceError, Session, User};
use rand::RngCore;
use uuid::Uuid;

/// Random opaque token for sessions and email verification
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct AuthService {
    db: StorageBackend,
    oauth: OAuthClient,
}

impl AuthService {
    pub fn new(db: StorageBackend, oauth: OAuthClient) -> Self {
        Self { db, oauth }
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    // ============================================
    // Sessions
    // ============================================

    pub async fn create_session(&self, user_id: Uuid, expires_at: DateTime<Utc>) -> Result<Session> {
        let row = self
            .db
            .create_session(CreateSessionRow {
                user_id,
                token: generate_token(),
                expires_at,
            })
            .await?;
        tracing::debug!(user_id = %user_id, session_id = %row.id, "Session created");
        Ok(row.into())
    }

    /// Look up a session by token, failing when it is absent or expired
    pub async fn get_session_by_token(&self, token: &str) -> Result<Session> {
        let session: Session = self
            .db
            .get_session_by_token(token)
            .await?
            .ok_or(ServiceError::SessionNotFound)?
            .into();

        if session.is_expired(Utc::now()) {
            return Err(ServiceError::SessionExpired);
        }
        Ok(session)
    }

    /// Resolve a bearer token to its session and owning user
    pub async fn validate_session(&self, token: &str) -> Result<(Session, User)> {
        let session = self.get_session_by_token(token).await?;
        let user = self
            .db
            .get_user(session.user_id)
            .await?
            .ok_or(ServiceError::SessionNotFound)?;
        Ok((session, user.into()))
    }

    /// Idempotent
    pub async fn delete_session(&self, token: &str) -> Result<()> {
        self.db.delete_session_by_token(token).await?;
        Ok(())
    }

    pub async fn clean_expired_sessions(&self) -> Result<u64> {
        let deleted = self.db.delete_expired_sessions(Utc::now()).await?;
        if deleted > 0 {
            tracing::info!(deleted, "Expired sessions removed");
        }
        Ok(deleted)
    }

    // ============================================
    // Users
    // ============================================

    pub async fn create_user(&self, input: CreateUserRow) -> Result<User> {
        Ok(self.db.create_user(input).await?.into())
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.db
            .get_user_by_email(email)
            .await?
            .map(Into::into)
            .ok_or_else(|| ServiceError::not_found("User"))
    }

    /// Providers with an OAuth account bound to this user
    pub async fn linked_providers(&self, user_id: Uuid) -> Result<Vec<String>> {
        let accounts = self.db.list_accounts_for_user(user_id).await?;
        Ok(accounts.into_iter().map(|a| a.provider).collect())
    }

    // ============================================
    // Email verification
    // ============================================

    pub async fn create_verification_token(
        &self,
        email: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<VerificationTokenRow> {
        let row = self
            .db
            .create_verification_token(CreateVerificationTokenRow {
                token: generate_token(),
                email: email.to_string(),
                expires_at,
            })
            .await?;
        Ok(row)
    }

    /// Consume a verification token and mark its email as verified
    pub async fn verify_email(&self, token: &str) -> Result<()> {
        let row = self
            .db
            .consume_verification_token(token, Utc::now())
            .await?
            .ok_or(ServiceError::TokenExpiredOrInvalid)?;

        if !self.db.mark_email_verified(&row.email).await? {
            tracing::warn!(email = %row.email, "Verification token consumed for unknown email");
            return Err(ServiceError::TokenExpiredOrInvalid);
        }
        Ok(())
    }

    // ============================================
    // OAuth
    // ============================================

    /// Exchange the code, fetch the profile, then resolve the local user and
    /// bind the provider identity to it.
    ///
    /// An identity that is already bound signs in as its owner even when the
    /// provider-side email changed. Unbound identities are matched by email.
    /// Two concurrent first sign-ins with the same new email race on the unique
    /// email constraint; the loser fails with an internal error.
    pub async fn handle_oauth_callback(&self, provider: &str, code: &str) -> Result<User> {
        let provider = OAuthProvider::parse(provider)?;
        let token = self.oauth.exchange_code(provider.as_str(), code).await?;
        let info = self.oauth.get_user_info(provider.as_str(), &token).await?;

        let now = Utc::now();
        let bound = self
            .db
            .get_account_by_provider(provider.as_str(), &info.provider_id)
            .await?;
        let user = match bound {
            Some(account) => self.refresh_bound_user(account.user_id, &info, now).await?,
            None => self.upsert_oauth_user(&info, now).await?,
        };
        self.link_account(provider, &user, &info, token, now).await?;

        tracing::info!(
            provider = provider.as_str(),
            user_id = %user.id,
            "OAuth sign-in completed"
        );
        Ok(user)
    }

    async fn refresh_bound_user(
        &self,
        user_id: Uuid,
        info: &OAuthUserInfo,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let row = self
            .db
            .update_user(user_id, profile_update(info, now))
            .await?
            .ok_or_else(|| ServiceError::not_found("User"))?;
        Ok(row.into())
    }

    async fn upsert_oauth_user(&self, info: &OAuthUserInfo, now: DateTime<Utc>) -> Result<User> {
        if let Some(existing) = self.db.get_user_by_email(&info.email).await? {
            let update = UpdateUser {
                email_verified: info.email_verified.then_some(true),
                ..profile_update(info, now)
            };
            let row = self
                .db
                .update_user(existing.id, update)
                .await?
                .ok_or_else(|| ServiceError::not_found("User"))?;
            return Ok(row.into());
        }

        let row = self
            .db
            .create_user(CreateUserRow {
                email: info.email.clone(),
                username: info.username.clone(),
                first_name: info.first_name.clone(),
                last_name: info.last_name.clone(),
                image_url: info.avatar_url.clone(),
                email_verified: info.email_verified,
                last_sign_in_at: Some(now),
                ..Default::default()
            })
            .await?;
        tracing::info!(user_id = %row.id, "User created from OAuth profile");
        Ok(row.into())
    }

    async fn link_account(
        &self,
        provider: OAuthProvider,
        user: &User,
        info: &OAuthUserInfo,
        token: OAuthToken,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let input = CreateAccountRow {
            user_id: user.id,
            provider: provider.as_str().to_string(),
            provider_id: info.provider_id.clone(),
            provider_account: token.raw,
            access_token: Some(token.access_token),
            refresh_token: token.refresh_token,
            expires_at: token.expires_in.map(|secs| now + Duration::seconds(secs)),
            token_type: token.token_type,
            scope: token.scope,
            id_token: token.id_token,
        };

        match self.db.upsert_account(input).await? {
            LinkOutcome::Linked(_) => Ok(()),
            LinkOutcome::AlreadyLinked => {
                tracing::warn!(
                    provider = provider.as_str(),
                    user_id = %user.id,
                    "Provider identity already bound to another user"
                );
                Err(ServiceError::AccountAlreadyLinked)
            }
        }
    }
}

/// Display fields from a provider profile; the email is left untouched
fn profile_update(info: &OAuthUserInfo, now: DateTime<Utc>) -> UpdateUser {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    UpdateUser {
        username: non_empty(&info.username),
        first_name: non_empty(&info.first_name),
        last_name: non_empty(&info.last_name),
        image_url: non_empty(&info.avatar_url),
        last_sign_in_at: Some(now),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;

    fn service() -> AuthService {
        AuthService::new(
            StorageBackend::in_memory(),
            OAuthClient::new(&AuthConfig::default()),
        )
    }

    async fn user(svc: &AuthService, email: &str) -> User {
        svc.create_user(CreateUserRow {
            email: email.to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_generate_token() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let svc = service();
        let user = user(&svc, "s@example.com").await;

        let session = svc
            .create_session(user.id, Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        let (found, owner) = svc.validate_session(&session.token).await.unwrap();
        assert_eq!(found.id, session.id);
        assert_eq!(owner.id, user.id);

        svc.delete_session(&session.token).await.unwrap();
        svc.delete_session(&session.token).await.unwrap();
        assert!(matches!(
            svc.validate_session(&session.token).await,
            Err(ServiceError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_expired_session() {
        let svc = service();
        let user = user(&svc, "e@example.com").await;
        let session = svc
            .create_session(user.id, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();

        assert!(matches!(
            svc.validate_session(&session.token).await,
            Err(ServiceError::SessionExpired)
        ));
        assert_eq!(svc.clean_expired_sessions().await.unwrap(), 1);
        assert!(matches!(
            svc.validate_session(&session.token).await,
            Err(ServiceError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_get_user_by_email_not_found() {
        let svc = service();
        assert!(matches!(
            svc.get_user_by_email("missing@example.com").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_email_single_use() {
        let svc = service();
        let user = user(&svc, "v@example.com").await;
        assert!(!user.email_verified);

        let token = svc
            .create_verification_token("v@example.com", Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        svc.verify_email(&token.token).await.unwrap();

        assert!(svc.get_user_by_email("v@example.com").await.unwrap().email_verified);
        assert!(matches!(
            svc.verify_email(&token.token).await,
            Err(ServiceError::TokenExpiredOrInvalid)
        ));
    }

    #[tokio::test]
    async fn test_verify_email_expired() {
        let svc = service();
        user(&svc, "late@example.com").await;
        let token = svc
            .create_verification_token("late@example.com", Utc::now() - Duration::minutes(1))
            .await
            .unwrap();

        assert!(matches!(
            svc.verify_email(&token.token).await,
            Err(ServiceError::TokenExpiredOrInvalid)
        ));
    }

    #[tokio::test]
    async fn test_oauth_callback_rejects_unknown_provider() {
        let svc = service();
        assert!(matches!(
            svc.handle_oauth_callback("invalid", "code").await,
            Err(ServiceError::UnsupportedProvider(_))
        ));
        assert!(matches!(
            svc.handle_oauth_callback("github", "code").await,
            Err(ServiceError::ProviderNotConfigured(_))
        ));
    }
}
