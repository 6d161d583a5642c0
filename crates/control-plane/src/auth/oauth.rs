// OAuth client for Google and GitHub authentication
// Decision: Manual OAuth2 authorization-code flow over a shared reqwest client
// Decision: No request timeouts or retries; provider failures surface immediately
// Decision: Google subject is read from the ID token payload without verifying its signature

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use nicheflow_core::ServiceError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::{AuthConfig, OAuthProviderConfig};

const USER_AGENT: &str = "NicheFlow";

/// OAuth provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    GitHub,
}

impl OAuthProvider {
    pub const ALL: [OAuthProvider; 2] = [OAuthProvider::Google, OAuthProvider::GitHub];

    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::GitHub => "github",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "Google",
            OAuthProvider::GitHub => "GitHub",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "google" => Some(OAuthProvider::Google),
            "github" => Some(OAuthProvider::GitHub),
            _ => None,
        }
    }

    /// Like `from_str`, failing with `UnsupportedProvider`
    pub fn parse(s: &str) -> Result<Self, ServiceError> {
        Self::from_str(s).ok_or_else(|| ServiceError::UnsupportedProvider(s.to_string()))
    }
}

/// Token endpoint response
#[derive(Debug, Clone)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: Option<String>,
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
    /// `sub` claim from the Google ID token
    pub subject: Option<String>,
    /// Full response body as returned by the provider
    pub raw: Value,
}

/// User info from OAuth provider, normalized across providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthUserInfo {
    /// Provider user ID
    pub provider_id: String,
    pub email: String,
    /// Display name, never empty
    pub name: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: String,
    pub email_verified: bool,
}

/// OAuth client shared by all requests
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    google: Option<OAuthProviderConfig>,
    github: Option<OAuthProviderConfig>,
}

impl OAuthClient {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            google: config.google.clone(),
            github: config.github.clone(),
        }
    }

    pub fn provider_config(&self, provider: OAuthProvider) -> Option<&OAuthProviderConfig> {
        match provider {
            OAuthProvider::Google => self.google.as_ref(),
            OAuthProvider::GitHub => self.github.as_ref(),
        }
    }

    /// Providers with complete client credentials
    pub fn configured_providers(&self) -> Vec<(OAuthProvider, &OAuthProviderConfig)> {
        OAuthProvider::ALL
            .into_iter()
            .filter_map(|p| self.provider_config(p).map(|c| (p, c)))
            .collect()
    }

    fn resolve(&self, provider: &str) -> Result<(OAuthProvider, &OAuthProviderConfig), ServiceError> {
        let provider = OAuthProvider::parse(provider)?;
        let config = self
            .provider_config(provider)
            .ok_or_else(|| ServiceError::ProviderNotConfigured(provider.as_str().to_string()))?;
        Ok((provider, config))
    }

    /// Build the provider authorization URL for the code flow
    pub fn get_auth_url(&self, provider: &str) -> Result<String, ServiceError> {
        let (provider, config) = self.resolve(provider)?;

        let scope = config.scopes.join(" ");
        let mut params = vec![
            ("response_type", "code"),
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("scope", scope.as_str()),
        ];
        if provider == OAuthProvider::Google {
            params.extend([
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
            ]);
        }

        let url = url::Url::parse_with_params(&config.auth_url, &params).map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!(
                "Invalid {} authorization URL: {}",
                provider.as_str(),
                e
            ))
        })?;
        Ok(url.to_string())
    }

    /// Exchange an authorization code for provider tokens
    pub async fn exchange_code(&self, provider: &str, code: &str) -> Result<OAuthToken, ServiceError> {
        let (provider, config) = self.resolve(provider)?;

        let response = self
            .http
            .post(&config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::token_exchange(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::token_exchange(format!(
                "{} token endpoint returned {}",
                provider.as_str(),
                status
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::token_exchange(format!("invalid response body: {}", e)))?;

        parse_token_response(provider, raw)
    }

    /// Fetch and normalize the provider profile for an access token
    pub async fn get_user_info(
        &self,
        provider: &str,
        token: &OAuthToken,
    ) -> Result<OAuthUserInfo, ServiceError> {
        let (provider, config) = self.resolve(provider)?;

        let body = self
            .get_json(&config.userinfo_url, &token.access_token)
            .await?;

        match provider {
            OAuthProvider::Google => normalize_google(&body, token.subject.as_deref()),
            OAuthProvider::GitHub => {
                let mut fallback_email = None;
                if non_empty_str(&body, "email").is_none() {
                    // Private GitHub emails are only listed on the emails endpoint
                    let emails_url = format!("{}/emails", config.userinfo_url.trim_end_matches('/'));
                    let emails = self.get_json(&emails_url, &token.access_token).await?;
                    fallback_email = primary_github_email(&emails);
                }
                normalize_github(&body, fallback_email)
            }
        }
    }

    async fn get_json(&self, url: &str, access_token: &str) -> Result<Value, ServiceError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| ServiceError::user_info(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::user_info(format!(
                "user info endpoint returned {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::user_info(format!("invalid response body: {}", e)))
    }
}

fn parse_token_response(provider: OAuthProvider, raw: Value) -> Result<OAuthToken, ServiceError> {
    if let Some(error) = raw.get("error").filter(|v| !v.is_null()) {
        let description = raw
            .get("error_description")
            .and_then(Value::as_str)
            .map(|d| format!(": {}", d))
            .unwrap_or_default();
        let error = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ServiceError::token_exchange(format!("{}{}", error, description)));
    }

    let str_field = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);

    let access_token = str_field("access_token")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServiceError::token_exchange("response has no access_token"))?;

    let expires_in = raw.get("expires_in").and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    });

    let id_token = str_field("id_token");
    let subject = match provider {
        OAuthProvider::Google => id_token.as_deref().and_then(id_token_subject),
        OAuthProvider::GitHub => None,
    };

    Ok(OAuthToken {
        access_token,
        token_type: str_field("token_type"),
        refresh_token: str_field("refresh_token"),
        expires_in,
        scope: str_field("scope"),
        id_token,
        subject,
        raw,
    })
}

/// Read `sub` from a JWT payload. The signature is NOT verified.
fn id_token_subject(id_token: &str) -> Option<String> {
    let mut parts = id_token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("sub").and_then(Value::as_str).map(str::to_string)
}

/// Split a display name at the first space
fn split_name(name: &str) -> (String, String) {
    match name.trim().split_once(' ') {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (name.trim().to_string(), String::new()),
    }
}

fn non_empty_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn normalize_google(body: &Value, subject: Option<&str>) -> Result<OAuthUserInfo, ServiceError> {
    let email = non_empty_str(body, "email")
        .ok_or_else(|| ServiceError::user_info("google profile has no email"))?
        .to_string();
    let provider_id = non_empty_str(body, "sub")
        .or(subject)
        .ok_or_else(|| ServiceError::user_info("google profile has no subject"))?
        .to_string();

    let username = email.split('@').next().unwrap_or_default().to_string();
    let name = non_empty_str(body, "name")
        .map(str::to_string)
        .unwrap_or_else(|| username.clone());
    let (first_name, last_name) = match (
        non_empty_str(body, "given_name"),
        non_empty_str(body, "family_name"),
    ) {
        (Some(first), last) => (first.to_string(), last.unwrap_or_default().to_string()),
        (None, _) => split_name(&name),
    };

    Ok(OAuthUserInfo {
        provider_id,
        email,
        name,
        username,
        first_name,
        last_name,
        avatar_url: non_empty_str(body, "picture").unwrap_or_default().to_string(),
        email_verified: body
            .get("email_verified")
            .and_then(Value::as_bool)
            .unwrap_or(true),
    })
}

fn normalize_github(
    body: &Value,
    fallback_email: Option<(String, bool)>,
) -> Result<OAuthUserInfo, ServiceError> {
    let provider_id = match body.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return Err(ServiceError::user_info("github profile has no id")),
    };
    let login = non_empty_str(body, "login").unwrap_or_default().to_string();

    let (email, email_verified) = match non_empty_str(body, "email") {
        Some(email) => (email.to_string(), true),
        None => fallback_email.ok_or_else(|| ServiceError::user_info("github account has no email"))?,
    };

    let name = non_empty_str(body, "name")
        .map(str::to_string)
        .unwrap_or_else(|| {
            if login.is_empty() {
                email.split('@').next().unwrap_or_default().to_string()
            } else {
                login.clone()
            }
        });
    let (first_name, last_name) = match non_empty_str(body, "name") {
        Some(full) => split_name(full),
        None => (String::new(), String::new()),
    };

    Ok(OAuthUserInfo {
        provider_id,
        email,
        name,
        username: login,
        first_name,
        last_name,
        avatar_url: non_empty_str(body, "avatar_url").unwrap_or_default().to_string(),
        email_verified,
    })
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    #[serde(default)]
    verified: bool,
}

fn primary_github_email(body: &Value) -> Option<(String, bool)> {
    let emails: Vec<GitHubEmail> = serde_json::from_value(body.clone()).ok()?;
    emails
        .into_iter()
        .find(|e| e.primary)
        .map(|e| (e.email, e.verified))
}
