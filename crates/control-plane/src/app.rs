// Router assembly shared by the server binary and integration tests
// Decision: Each API module owns its state; the app merges module routers
// Decision: /health stays unprefixed and outside the rate limiter

use axum::{extract::State, middleware, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::auth::{self, oauth::OAuthClient, AuthState};
use crate::cache::CacheBackend;
use crate::config::AppConfig;
use crate::middleware::{cors_layer, preflight_no_content, rate_limit, RateLimitState};
use crate::openapi::ApiDoc;
use crate::services::{AuthService, UserService};
use crate::storage::StorageBackend;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    storage: &'static str,
}

/// State for health endpoint
#[derive(Clone)]
struct HealthState {
    version: String,
    storage: &'static str,
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version.clone(),
        storage: state.storage,
    })
}

/// Build the complete application router
pub fn build_app(config: &AppConfig, storage: StorageBackend, cache: CacheBackend) -> Router {
    let auth_service = AuthService::new(storage.clone(), OAuthClient::new(&config.auth));
    let auth_state = AuthState::new(config.auth.clone(), auth_service);
    let users = UserService::new(storage.clone());

    let users_state = api::users::UsersState {
        users: users.clone(),
        auth: auth_state.clone(),
    };
    let admin_state = api::admin::AdminState {
        users: users.clone(),
        auth: auth_state.clone(),
    };
    let webhook_state = api::webhooks::WebhookState {
        users,
        webhook_secret: config.clerk.webhook_secret.clone(),
    };
    let health_state = HealthState {
        version: config.app.version.clone(),
        storage: storage.kind_str(),
    };
    let rate_limit_state = RateLimitState {
        cache,
        config: config.rate_limit.clone(),
    };

    let api_routes = Router::new()
        .merge(auth::routes(auth_state))
        .merge(api::users::routes(users_state))
        .merge(api::admin::routes(admin_state))
        .merge(api::webhooks::routes(webhook_state));

    // Build main router with health (not prefixed) and prefixed API routes
    let app = Router::new()
        .route("/health", get(health).with_state(health_state))
        .merge(build_router_with_prefix(api_routes, &config.app.api_prefix))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    app.layer(middleware::from_fn_with_state(rate_limit_state, rate_limit))
        .layer(cors_layer(&config.cors))
        .layer(middleware::from_fn(preflight_no_content))
        .layer(TraceLayer::new_for_http())
}

/// Build router with optional API prefix (extracted for testing)
pub fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_routes() -> Router {
        Router::new().route("/v1/test", get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn test_api_prefix_empty() {
        let app = build_router_with_prefix(test_routes(), "");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_prefix_nested() {
        let app = build_router_with_prefix(test_routes(), "/api");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_reports_storage() {
        let app = build_app(
            &AppConfig::default(),
            StorageBackend::in_memory(),
            CacheBackend::in_memory(),
        );

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["storage"], "memory");
    }
}
