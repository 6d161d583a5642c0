// Process configuration loaded from environment variables
// Decision: Every setting has a default so `cargo run` works with an empty environment
// Decision: Missing DATABASE_URL means dev mode (in-memory storage)
// Decision: Missing Redis settings means in-memory rate-limit counters
//
// `.env` is loaded by main via dotenvy before `AppConfig::from_env` runs.

use crate::auth::AuthConfig;
use std::time::Duration;

/// Read environment values through a lookup function so tests can supply their own.
pub(crate) fn read_var<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub(crate) fn read_parsed<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match read_var(lookup, key) {
        Some(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparsable environment value");
                None
            }
        },
        None => None,
    }
}

pub(crate) fn read_bool<F>(lookup: &F, key: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    read_var(lookup, key).map(|s| s.eq_ignore_ascii_case("true") || s == "1")
}

fn read_list<F>(lookup: &F, key: &str, default: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    read_var(lookup, key)
        .unwrap_or_else(|| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Application identity and listener settings
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub env: String,
    pub name: String,
    pub version: String,
    pub port: u16,
    pub base_url: String,
    /// Example: API_PREFIX="/api" results in routes like /api/v1/user/profile
    pub api_prefix: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            name: "nicheflow".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            port: 8080,
            base_url: "http://localhost:8080".to_string(),
            api_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// None selects the in-memory backend
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Maximum requests per client IP within one window
    pub limit: i64,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 100,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// A single "*" entry allows any origin
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Duration,
}

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000";
const DEFAULT_CORS_METHODS: &str = "GET,POST,PUT,PATCH,DELETE,OPTIONS";
const DEFAULT_CORS_HEADERS: &str = "Content-Type,Authorization,Accept,Origin,Cache-Control";

impl Default for CorsConfig {
    fn default() -> Self {
        let split = |s: &str| s.split(',').map(str::to_string).collect::<Vec<_>>();
        Self {
            allowed_origins: split(DEFAULT_CORS_ORIGINS),
            allowed_methods: split(DEFAULT_CORS_METHODS),
            allowed_headers: split(DEFAULT_CORS_HEADERS),
            expose_headers: Vec::new(),
            allow_credentials: true,
            max_age: Duration::from_secs(86400),
        }
    }
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClerkConfig {
    /// Svix signing secret (`whsec_...`); None disables signature checks
    pub webhook_secret: Option<String>,
}

/// Complete process configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub app: AppSettings,
    pub database: DatabaseConfig,
    /// Connection URL for Redis, None selects the in-memory cache
    pub redis_url: Option<String>,
    pub clerk: ClerkConfig,
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppSettings::default();
        let app = AppSettings {
            env: read_var(&lookup, "APP_ENV").unwrap_or(defaults.env),
            name: read_var(&lookup, "APP_NAME").unwrap_or(defaults.name),
            version: read_var(&lookup, "APP_VERSION").unwrap_or(defaults.version),
            port: read_parsed(&lookup, "APP_PORT").unwrap_or(defaults.port),
            base_url: read_var(&lookup, "APP_BASE_URL").unwrap_or(defaults.base_url),
            api_prefix: read_var(&lookup, "API_PREFIX").unwrap_or_default(),
        };

        let database = DatabaseConfig {
            url: read_var(&lookup, "DATABASE_URL"),
            max_connections: read_parsed(&lookup, "DATABASE_MAX_CONNECTIONS").unwrap_or(10),
        };

        let rate_limit = RateLimitConfig {
            enabled: read_bool(&lookup, "RATE_LIMIT_ENABLED").unwrap_or(true),
            limit: read_parsed(&lookup, "RATE_LIMIT_LIMIT").unwrap_or(100),
            window: Duration::from_secs(
                read_parsed(&lookup, "RATE_LIMIT_WINDOW_SECS").unwrap_or(60),
            ),
        };

        let cors = CorsConfig {
            allowed_origins: read_list(&lookup, "CORS_ALLOWED_ORIGINS", DEFAULT_CORS_ORIGINS),
            allowed_methods: read_list(&lookup, "CORS_ALLOWED_METHODS", DEFAULT_CORS_METHODS),
            allowed_headers: read_list(&lookup, "CORS_ALLOWED_HEADERS", DEFAULT_CORS_HEADERS),
            expose_headers: read_list(&lookup, "CORS_EXPOSE_HEADERS", ""),
            allow_credentials: read_bool(&lookup, "CORS_ALLOW_CREDENTIALS").unwrap_or(true),
            max_age: Duration::from_secs(read_parsed(&lookup, "CORS_MAX_AGE").unwrap_or(86400)),
        };

        let clerk = ClerkConfig {
            webhook_secret: read_var(&lookup, "CLERK_WEBHOOK_SECRET"),
        };

        let auth = AuthConfig::from_lookup(&lookup, &app.base_url);

        Self {
            redis_url: redis_url(&lookup),
            app,
            database,
            clerk,
            rate_limit,
            cors,
            auth,
        }
    }

    pub fn is_production(&self) -> bool {
        self.app.env.eq_ignore_ascii_case("production")
    }
}

/// REDIS_URL wins; otherwise build one from REDIS_HOST and friends.
fn redis_url<F>(lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = read_var(lookup, "REDIS_URL") {
        return Some(url);
    }

    let host = read_var(lookup, "REDIS_HOST")?;
    let port: u16 = read_parsed(lookup, "REDIS_PORT").unwrap_or(6379);
    let db: i64 = read_parsed(lookup, "REDIS_DB").unwrap_or(0);
    let scheme = if read_bool(lookup, "REDIS_TLS_ENABLE").unwrap_or(false) {
        "rediss"
    } else {
        "redis"
    };

    let mut url = match url::Url::parse(&format!("{}://{}:{}/{}", scheme, host, port, db)) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(host = %host, "Invalid REDIS_HOST, using in-memory cache: {}", e);
            return None;
        }
    };
    if let Some(password) = read_var(lookup, "REDIS_PASSWORD") {
        // Only fails for cannot-be-a-base URLs, which redis:// never is
        let _ = url.set_password(Some(&password));
    }
    Some(url.to_string())
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
    fn test_defaults_with_empty_env() {
        let config = AppConfig::from_lookup(lookup_from(&[]));

        assert_eq!(config.app.port, 8080);
        assert_eq!(config.app.base_url, "http://localhost:8080");
        assert!(config.app.api_prefix.is_empty());
        assert!(config.database.url.is_none());
        assert!(config.redis_url.is_none());
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.limit, 100);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.cors.allowed_origins, vec!["http://localhost:3000"]);
        assert!(config.cors.allow_credentials);
        assert!(config.clerk.webhook_secret.is_none());
        assert!(!config.is_production());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("APP_ENV", "production"),
            ("APP_PORT", "9090"),
            ("API_PREFIX", "/api"),
            ("DATABASE_URL", "postgres://localhost/nicheflow"),
            ("RATE_LIMIT_ENABLED", "false"),
            ("RATE_LIMIT_LIMIT", "5"),
            ("RATE_LIMIT_WINDOW_SECS", "2"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example.com, https://b.example.com"),
            ("CLERK_WEBHOOK_SECRET", "whsec_abc"),
        ]));

        assert!(config.is_production());
        assert_eq!(config.app.port, 9090);
        assert_eq!(config.app.api_prefix, "/api");
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://localhost/nicheflow")
        );
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.rate_limit.limit, 5);
        assert_eq!(config.rate_limit.window, Duration::from_secs(2));
        assert_eq!(
            config.cors.allowed_origins,
            vec!["https://a.example.com", "https://b.example.com"]
        );
        assert_eq!(config.clerk.webhook_secret.as_deref(), Some("whsec_abc"));
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("APP_PORT", "not-a-port"),
            ("RATE_LIMIT_LIMIT", "many"),
        ]));
        assert_eq!(config.app.port, 8080);
        assert_eq!(config.rate_limit.limit, 100);
    }

    #[test]
    fn test_redis_url_from_parts() {
        let url = redis_url(&lookup_from(&[
            ("REDIS_HOST", "cache.internal"),
            ("REDIS_PORT", "6380"),
            ("REDIS_PASSWORD", "s3cret"),
            ("REDIS_DB", "2"),
            ("REDIS_TLS_ENABLE", "true"),
        ]));
        assert_eq!(url.as_deref(), Some("rediss://:s3cret@cache.internal:6380/2"));
    }

    #[test]
    fn test_redis_url_wins_over_parts() {
        let url = redis_url(&lookup_from(&[
            ("REDIS_URL", "redis://primary:6379/0"),
            ("REDIS_HOST", "ignored"),
        ]));
        assert_eq!(url.as_deref(), Some("redis://primary:6379/0"));
    }

    #[test]
    fn test_cors_wildcard() {
        let config = AppConfig::from_lookup(lookup_from(&[("CORS_ALLOWED_ORIGINS", "*")]));
        assert!(config.cors.allows_any_origin());
    }
}
