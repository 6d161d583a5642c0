// Integration tests for the NicheFlow API
// Run with: cargo test -p nicheflow-control-plane --test integration_test
// Uses in-memory storage and cache; OAuth providers are mocked with wiremock.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use nicheflow_control_plane::auth::config::OAuthProviderConfig;
use nicheflow_control_plane::auth::oauth::OAuthClient;
use nicheflow_control_plane::build_app;
use nicheflow_control_plane::cache::CacheBackend;
use nicheflow_control_plane::config::AppConfig;
use nicheflow_control_plane::services::AuthService;
use nicheflow_control_plane::storage::models::CreateUserRow;
use nicheflow_control_plane::storage::StorageBackend;
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{header as header_matcher, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WEBHOOK_SECRET: &str = "whsec_dGVzdC13ZWJob29rLXNpZ25pbmctc2VjcmV0";

struct TestApp {
    app: Router,
    storage: StorageBackend,
    auth: AuthService,
}

impl TestApp {
    fn new(config: AppConfig) -> Self {
        let storage = StorageBackend::in_memory();
        let auth = AuthService::new(storage.clone(), OAuthClient::new(&config.auth));
        let app = build_app(&config, storage.clone(), CacheBackend::in_memory());
        Self { app, storage, auth }
    }

    fn with_defaults() -> Self {
        Self::new(AppConfig::default())
    }

    async fn create_user(&self, email: &str, role: Option<&str>) -> Uuid {
        self.storage
            .create_user(CreateUserRow {
                email: email.to_string(),
                username: email.split('@').next().unwrap().to_string(),
                role: role.map(str::to_string),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    async fn sign_in(&self, user_id: Uuid) -> String {
        self.auth
            .create_session(user_id, Utc::now() + Duration::hours(1))
            .await
            .unwrap()
            .token
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

fn google_config(server: &MockServer) -> OAuthProviderConfig {
    OAuthProviderConfig {
        client_id: "google-client".to_string(),
        client_secret: "google-secret".to_string(),
        redirect_uri: "http://localhost:8080/auth/callback/google".to_string(),
        scopes: vec!["openid".to_string(), "email".to_string()],
        auth_url: format!("{}/o/oauth2/v2/auth", server.uri()),
        token_url: format!("{}/token", server.uri()),
        userinfo_url: format!("{}/userinfo", server.uri()),
    }
}

async fn mount_google(server: &MockServer, email: &str, sub: &str) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "google-access-token",
            "token_type": "Bearer",
            "expires_in": 3599,
            "scope": "openid email"
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header_matcher("authorization", "Bearer google-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": sub,
            "email": email,
            "email_verified": true,
            "name": "Ada Lovelace",
            "given_name": "Ada",
            "family_name": "Lovelace",
            "picture": "https://example.com/ada.png"
        })))
        .mount(server)
        .await;
}

fn svix_signature(msg_id: &str, timestamp: &str, body: &str) -> String {
    let key = STANDARD
        .decode(WEBHOOK_SECRET.strip_prefix("whsec_").unwrap())
        .unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
    mac.update(format!("{}.{}.{}", msg_id, timestamp, body).as_bytes());
    format!("v1,{}", STANDARD.encode(mac.finalize().into_bytes()))
}

async fn post_webhook(app: &Router, body: &str, signature: Option<String>) -> StatusCode {
    let timestamp = Utc::now().timestamp().to_string();
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/v1/webhook/clerk")
        .header(header::CONTENT_TYPE, "application/json")
        .header("svix-id", "msg_1")
        .header("svix-timestamp", &timestamp);
    let signature = signature.unwrap_or_else(|| svix_signature("msg_1", &timestamp, body));
    builder = builder.header("svix-signature", signature);

    app.clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_google_sign_in_creates_user_and_session() {
    let server = MockServer::start().await;
    mount_google(&server, "ada@example.com", "google-sub-1").await;

    let mut config = AppConfig::default();
    config.auth.google = Some(google_config(&server));
    let app = TestApp::new(config);

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/callback/google?code=auth-code")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("session_token="));
    assert!(cookie.contains("HttpOnly"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], 200);
    assert!(!body["data"]["session"].is_null());
    assert_eq!(body["data"]["user"]["email"], "ada@example.com");
    assert_eq!(body["data"]["user"]["first_name"], "Ada");

    let token = body["data"]["access_token"].as_str().unwrap().to_string();
    let (status, session) = app
        .request(Method::GET, "/auth/session", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["data"]["user"]["email"], "ada@example.com");

    // A second sign-in reuses the same user
    let (status, again) = app
        .request(Method::GET, "/auth/callback/google?code=auth-code", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["data"]["user"]["id"], body["data"]["user"]["id"]);
}

#[tokio::test]
async fn test_callback_surfaces_provider_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut config = AppConfig::default();
    config.auth.google = Some(google_config(&server));
    let app = TestApp::new(config);

    let (status, body) = app
        .request(Method::GET, "/auth/callback/google?code=bad", None, None)
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["data"].is_null());

    let (status, _) = app
        .request(Method::GET, "/auth/callback/google", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bound_google_account_survives_email_change() {
    let server = MockServer::start().await;
    mount_google(&server, "old@example.com", "sub-42").await;

    let mut config = AppConfig::default();
    config.auth.google = Some(google_config(&server));
    let app = TestApp::new(config);

    let (status, first) = app
        .request(Method::GET, "/auth/callback/google?code=auth-code", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);

    // Same subject, new email at the provider
    server.reset().await;
    mount_google(&server, "new@example.com", "sub-42").await;

    let (status, second) = app
        .request(Method::GET, "/auth/callback/google?code=auth-code", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["code"], 200);
    assert_eq!(second["data"]["user"]["id"], first["data"]["user"]["id"]);
    assert_eq!(second["data"]["user"]["email"], "old@example.com");

    let users = app.storage.list_users(None).await.unwrap();
    assert_eq!(users.len(), 1);
    assert!(app
        .storage
        .get_user_by_email("new@example.com")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let app = TestApp::with_defaults();

    let (status, body) = app
        .request(Method::GET, "/v1/user/profile", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);
    assert_eq!(body["message"], "Authentication required");

    let (status, _) = app
        .request(Method::GET, "/v1/user/profile", Some("not-a-session"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_session_is_rejected() {
    let app = TestApp::with_defaults();
    let user_id = app.create_user("late@example.com", None).await;
    let token = app
        .auth
        .create_session(user_id, Utc::now() - Duration::minutes(1))
        .await
        .unwrap()
        .token;

    let (status, body) = app
        .request(Method::GET, "/v1/user/profile", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid or expired session");
}

#[tokio::test]
async fn test_sign_out_ends_session() {
    let app = TestApp::with_defaults();
    let user_id = app.create_user("bye@example.com", None).await;
    let token = app.sign_in(user_id).await;

    let (status, _) = app
        .request(Method::POST, "/auth/signout", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(Method::GET, "/auth/session", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_profile_and_preferences() {
    let app = TestApp::with_defaults();
    let user_id = app.create_user("prefs@example.com", None).await;
    let token = app.sign_in(user_id).await;

    let (status, body) = app
        .request(
            Method::PUT,
            "/v1/user/profile",
            Some(&token),
            Some(json!({ "first_name": "Grace", "last_name": "Hopper" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["first_name"], "Grace");

    let (status, body) = app
        .request(
            Method::PUT,
            "/v1/user/preferences",
            Some(&token),
            Some(json!({ "theme": "dark", "notification_email": false, "layout": "grid" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["theme"], "dark");
    assert_eq!(body["data"]["layout"], "grid");

    let (status, body) = app
        .request(Method::GET, "/v1/user/preferences", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["notification_email"], false);
}

#[tokio::test]
async fn test_malformed_json_body_uses_envelope() {
    let app = TestApp::with_defaults();
    let user_id = app.create_user("typed@example.com", None).await;
    let token = app.sign_in(user_id).await;

    let (status, body) = app
        .request(
            Method::PUT,
            "/v1/user/profile",
            Some(&token),
            Some(json!({ "username": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);
    assert_eq!(body["message"], "Invalid request body");
    assert!(body["data"].is_null());

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri("/v1/user/preferences")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"theme\":"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], 400);
}

#[tokio::test]
async fn test_monthly_limit_blocks_fourth_increment() {
    let app = TestApp::with_defaults();
    let user_id = app.create_user("usage@example.com", None).await;
    let token = app.sign_in(user_id).await;

    for expected in 1..=3 {
        let (status, body) = app
            .request(Method::POST, "/v1/user/usage", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["monthly_count"], expected);
    }

    let (status, body) = app
        .request(Method::POST, "/v1/user/usage", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 403);

    let (status, body) = app
        .request(Method::GET, "/v1/user/usage", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["monthly_count"], 3);
}

#[tokio::test]
async fn test_cannot_unlink_last_auth_method() {
    let app = TestApp::with_defaults();
    let user_id = app.create_user("social@example.com", None).await;
    let token = app.sign_in(user_id).await;

    let (status, _) = app
        .request(
            Method::POST,
            "/v1/user/social-accounts",
            Some(&token),
            Some(json!({ "provider": "GitHub", "account_id": "gh-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request(
            Method::DELETE,
            "/v1/user/social-accounts/github/gh-1",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);

    let (status, _) = app
        .request(
            Method::POST,
            "/v1/user/social-accounts",
            Some(&token),
            Some(json!({ "provider": "google", "account_id": "g-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(
            Method::DELETE,
            "/v1/user/social-accounts/github/gh-1",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request(Method::GET, "/v1/user/social-accounts", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["social_accounts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let app = TestApp::with_defaults();
    let user_id = app.create_user("member@example.com", None).await;
    let admin_id = app.create_user("admin@example.com", Some("admin")).await;
    let user_token = app.sign_in(user_id).await;
    let admin_token = app.sign_in(admin_id).await;

    let (status, body) = app
        .request(Method::GET, "/v1/admin/users", Some(&user_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 403);

    let (status, body) = app
        .request(Method::GET, "/v1/admin/users?search=member", Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let users = body["data"]["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["email"], "member@example.com");

    let start = Utc::now();
    let uri = format!("/v1/admin/users/{}/subscription", user_id);
    let (status, body) = app
        .request(
            Method::PUT,
            &uri,
            Some(&admin_token),
            Some(json!({
                "subscription_plan": "pro",
                "subscription_status": "active",
                "subscription_start": start,
                "subscription_end": start + Duration::days(30)
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["subscription_plan"], "pro");

    let (_, body) = app
        .request(Method::GET, "/v1/user/subscription", Some(&user_token), None)
        .await;
    assert_eq!(body["data"]["subscription_plan"], "pro");
}

#[tokio::test]
async fn test_email_verification_round_trip() {
    let app = TestApp::with_defaults();
    let admin_id = app.create_user("root@example.com", Some("admin")).await;
    let user_id = app.create_user("verify@example.com", None).await;
    let admin_token = app.sign_in(admin_id).await;

    let (status, body) = app
        .request(
            Method::POST,
            "/v1/admin/verification-tokens",
            Some(&admin_token),
            Some(json!({ "email": "verify@example.com", "expires_in_minutes": 10 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let uri = format!("/auth/verify-email?token={}", token);
    let (status, _) = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);

    let user = app.storage.get_user(user_id).await.unwrap().unwrap();
    assert!(user.email_verified);

    // Tokens are single use
    let (status, body) = app.request(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Email verification failed");
}

#[tokio::test]
async fn test_clerk_webhook_signature_and_sync() {
    let mut config = AppConfig::default();
    config.clerk.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    let app = TestApp::new(config);

    let body = json!({
        "type": "user.created",
        "data": {
            "id": "user_clerk_1",
            "email_addresses": [{
                "id": "idn_1",
                "email_address": "clerk@example.com",
                "verification": { "status": "verified" }
            }],
            "primary_email_address_id": "idn_1",
            "username": "clerky",
            "first_name": "Clara"
        }
    })
    .to_string();

    let status = post_webhook(&app.app, &body, Some("v1,AAAA".to_string())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app
        .storage
        .get_user_by_clerk_id("user_clerk_1")
        .await
        .unwrap()
        .is_none());

    let status = post_webhook(&app.app, &body, None).await;
    assert_eq!(status, StatusCode::OK);

    let user = app
        .storage
        .get_user_by_clerk_id("user_clerk_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.email, "clerk@example.com");
    assert!(user.email_verified);
    assert_eq!(user.first_name, "Clara");

    let deleted = json!({ "type": "user.deleted", "data": { "id": "user_clerk_1" } }).to_string();
    let status = post_webhook(&app.app, &deleted, None).await;
    assert_eq!(status, StatusCode::OK);

    let user = app
        .storage
        .get_user_by_clerk_id("user_clerk_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.status, "deleted");
}

#[tokio::test]
async fn test_clerk_webhook_extreme_timestamp_rejected() {
    let mut config = AppConfig::default();
    config.clerk.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    let app = TestApp::new(config);

    let body = json!({ "type": "user.deleted", "data": { "id": "user_clerk_9" } }).to_string();
    for timestamp in [i64::MIN.to_string(), i64::MAX.to_string()] {
        let response = app
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/v1/webhook/clerk")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header("svix-id", "msg_9")
                    .header("svix-timestamp", &timestamp)
                    .header("svix-signature", svix_signature("msg_9", &timestamp, &body))
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_rejects_then_recovers() {
    let mut config = AppConfig::default();
    config.rate_limit.limit = 2;
    config.rate_limit.window = std::time::Duration::from_secs(10);
    let app = TestApp::new(config);

    let send = |ip: &'static str| {
        let router = app.app.clone();
        async move {
            router
                .oneshot(
                    Request::builder()
                        .uri("/auth/providers")
                        .header("x-forwarded-for", ip)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap()
                .status()
        }
    };

    assert_eq!(send("203.0.113.7").await, StatusCode::OK);
    assert_eq!(send("203.0.113.7").await, StatusCode::OK);
    assert_eq!(send("203.0.113.7").await, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(send("203.0.113.8").await, StatusCode::OK);

    tokio::time::advance(std::time::Duration::from_secs(11)).await;
    assert_eq!(send("203.0.113.7").await, StatusCode::OK);
}

#[tokio::test]
async fn test_api_prefix_applies_to_api_routes_only() {
    let mut config = AppConfig::default();
    config.app.api_prefix = "/api".to_string();
    let app = TestApp::new(config);

    let (status, _) = app.request(Method::GET, "/api/auth/providers", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.request(Method::GET, "/auth/providers", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
