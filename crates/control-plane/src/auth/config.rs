// Authentication configuration loaded from environment variables.
// Decision: AUTH_ prefix for all auth config
// Decision: A provider is enabled only when both client id and secret are non-empty
// Decision: Provider endpoints are overridable so tests can point them at a mock server

use crate::config::{read_parsed, read_var};
use std::time::Duration;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

pub const GITHUB_AUTH_URL: &str = "https://github.com/login/oauth/authorize";
pub const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
pub const GITHUB_USERINFO_URL: &str = "https://api.github.com/user";

const DEFAULT_SESSION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_VERIFICATION_TOKEN_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// OAuth provider configuration
#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

/// Complete authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Base URL for OAuth callbacks
    pub base_url: String,
    /// Lifetime of sessions created by the OAuth callback
    pub session_max_age: Duration,
    /// Default lifetime of email verification tokens
    pub verification_token_max_age: Duration,
    pub google: Option<OAuthProviderConfig>,
    pub github: Option<OAuthProviderConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            session_max_age: DEFAULT_SESSION_MAX_AGE,
            verification_token_max_age: DEFAULT_VERIFICATION_TOKEN_MAX_AGE,
            google: None,
            github: None,
        }
    }
}

impl AuthConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let lookup = |key: &str| std::env::var(key).ok();
        let app_base_url =
            read_var(&lookup, "APP_BASE_URL").unwrap_or_else(|| Self::default().base_url);
        Self::from_lookup(&lookup, &app_base_url)
    }

    pub fn from_lookup<F>(lookup: &F, app_base_url: &str) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = read_var(lookup, "AUTH_BASE_URL")
            .unwrap_or_else(|| app_base_url.to_string())
            .trim_end_matches('/')
            .to_string();

        let session_max_age = read_parsed(lookup, "AUTH_SESSION_MAX_AGE")
            .map(|mins: u64| Duration::from_secs(mins * 60))
            .unwrap_or(DEFAULT_SESSION_MAX_AGE);

        let verification_token_max_age = read_parsed(lookup, "AUTH_VERIFICATION_TOKEN_MAX_AGE")
            .map(|mins: u64| Duration::from_secs(mins * 60))
            .unwrap_or(DEFAULT_VERIFICATION_TOKEN_MAX_AGE);

        let google = provider_from_lookup(
            lookup,
            &base_url,
            ProviderDefaults {
                id: "google",
                env_prefix: "AUTH_GOOGLE",
                scopes: "openid email profile",
                auth_url: GOOGLE_AUTH_URL,
                token_url: GOOGLE_TOKEN_URL,
                userinfo_url: GOOGLE_USERINFO_URL,
            },
        );

        let github = provider_from_lookup(
            lookup,
            &base_url,
            ProviderDefaults {
                id: "github",
                env_prefix: "AUTH_GITHUB",
                scopes: "read:user user:email",
                auth_url: GITHUB_AUTH_URL,
                token_url: GITHUB_TOKEN_URL,
                userinfo_url: GITHUB_USERINFO_URL,
            },
        );

        Self {
            base_url,
            session_max_age,
            verification_token_max_age,
            google,
            github,
        }
    }

    /// Check if OAuth is available
    pub fn oauth_enabled(&self) -> bool {
        self.google.is_some() || self.github.is_some()
    }
}

struct ProviderDefaults {
    id: &'static str,
    env_prefix: &'static str,
    scopes: &'static str,
    auth_url: &'static str,
    token_url: &'static str,
    userinfo_url: &'static str,
}

fn provider_from_lookup<F>(
    lookup: &F,
    base_url: &str,
    defaults: ProviderDefaults,
) -> Option<OAuthProviderConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |suffix: &str| read_var(lookup, &format!("{}_{}", defaults.env_prefix, suffix));

    let client_id = var("CLIENT_ID")?;
    let client_secret = var("CLIENT_SECRET")?;

    let redirect_uri = var("REDIRECT_URI")
        .unwrap_or_else(|| format!("{}/api/auth/callback/{}", base_url, defaults.id));
    let scopes = var("SCOPES")
        .unwrap_or_else(|| defaults.scopes.to_string())
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    Some(OAuthProviderConfig {
        client_id,
        client_secret,
        redirect_uri,
        scopes,
        auth_url: var("AUTH_URL").unwrap_or_else(|| defaults.auth_url.to_string()),
        token_url: var("TOKEN_URL").unwrap_or_else(|| defaults.token_url.to_string()),
        userinfo_url: var("USERINFO_URL").unwrap_or_else(|| defaults.userinfo_url.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert!(!config.oauth_enabled());
        assert_eq!(config.session_max_age, Duration::from_secs(86400));
        assert_eq!(config.verification_token_max_age, Duration::from_secs(86400));
    }

    #[test]
    fn test_provider_requires_id_and_secret() {
        let lookup = lookup_from(&[
            ("AUTH_GOOGLE_CLIENT_ID", "google-id"),
            ("AUTH_GITHUB_CLIENT_ID", "github-id"),
            ("AUTH_GITHUB_CLIENT_SECRET", ""),
        ]);
        let config = AuthConfig::from_lookup(&lookup, "http://localhost:8080");
        assert!(config.google.is_none());
        assert!(config.github.is_none());
        assert!(!config.oauth_enabled());
    }

    #[test]
    fn test_google_defaults() {
        let lookup = lookup_from(&[
            ("AUTH_GOOGLE_CLIENT_ID", "google-id"),
            ("AUTH_GOOGLE_CLIENT_SECRET", "google-secret"),
        ]);
        let config = AuthConfig::from_lookup(&lookup, "https://app.example.com/");

        let google = config.google.clone().unwrap();
        assert_eq!(google.client_id, "google-id");
        assert_eq!(
            google.redirect_uri,
            "https://app.example.com/api/auth/callback/google"
        );
        assert_eq!(google.scopes, vec!["openid", "email", "profile"]);
        assert_eq!(google.token_url, GOOGLE_TOKEN_URL);
        assert!(config.oauth_enabled());
    }

    #[test]
    fn test_github_overrides() {
        let lookup = lookup_from(&[
            ("AUTH_BASE_URL", "https://auth.example.com"),
            ("AUTH_GITHUB_CLIENT_ID", "gh-id"),
            ("AUTH_GITHUB_CLIENT_SECRET", "gh-secret"),
            ("AUTH_GITHUB_SCOPES", "read:user,user:email"),
            ("AUTH_GITHUB_TOKEN_URL", "http://127.0.0.1:9999/token"),
            ("AUTH_SESSION_MAX_AGE", "30"),
        ]);
        let config = AuthConfig::from_lookup(&lookup, "http://ignored");

        let github = config.github.unwrap();
        assert_eq!(
            github.redirect_uri,
            "https://auth.example.com/api/auth/callback/github"
        );
        assert_eq!(github.scopes, vec!["read:user", "user:email"]);
        assert_eq!(github.token_url, "http://127.0.0.1:9999/token");
        assert_eq!(github.auth_url, GITHUB_AUTH_URL);
        assert_eq!(config.session_max_age, Duration::from_secs(30 * 60));
    }
}
