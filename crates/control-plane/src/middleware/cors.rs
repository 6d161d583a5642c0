// CORS from configuration
// Decision: "*" origins or headers disable credentials (browsers reject the combination)

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::config::CorsConfig;

fn parse_list<T>(values: &[String], what: &str, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .filter_map(|v| {
            let parsed = parse(v);
            if parsed.is_none() {
                tracing::warn!("Ignoring invalid CORS {}: {}", what, v);
            }
            parsed
        })
        .collect()
}

pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let any_origin = config.allows_any_origin();
    let any_header = config.allowed_headers.iter().any(|h| h.trim() == "*");

    let origin = if any_origin {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(parse_list(&config.allowed_origins, "origin", |v| {
            HeaderValue::from_str(v).ok()
        }))
    };

    let headers = if any_header {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(parse_list(&config.allowed_headers, "header", |v| {
            HeaderName::from_bytes(v.as_bytes()).ok()
        }))
    };

    let methods = parse_list(&config.allowed_methods, "method", |v| {
        Method::from_bytes(v.to_uppercase().as_bytes()).ok()
    });
    let expose = parse_list(&config.expose_headers, "expose header", |v| {
        HeaderName::from_bytes(v.as_bytes()).ok()
    });

    let credentials = config.allow_credentials && !any_origin && !any_header;
    if config.allow_credentials && !credentials {
        tracing::warn!("CORS credentials disabled because origins or headers allow \"*\"");
    }

    let layer = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(credentials)
        .max_age(config.max_age);

    if expose.is_empty() {
        layer
    } else {
        layer.expose_headers(expose)
    }
}

/// Answer successful CORS preflights with 204 No Content
pub async fn preflight_no_content(request: Request, next: Next) -> Response {
    let is_preflight = request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = next.run(request).await;
    if is_preflight && response.status().is_success() {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    fn app(config: &CorsConfig) -> Router {
        Router::new()
            .route("/v1/ping", get(|| async { "pong" }))
            .layer(cors_layer(config))
            .layer(axum::middleware::from_fn(preflight_no_content))
    }

    fn preflight(origin: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/v1/ping")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_preflight_returns_no_content() {
        let response = app(&CorsConfig::default())
            .oneshot(preflight("http://localhost:3000"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
            "true"
        );
    }

    #[tokio::test]
    async fn test_unlisted_origin_gets_no_allow_header() {
        let response = app(&CorsConfig::default())
            .oneshot(preflight("https://evil.example"))
            .await
            .unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_wildcard_origin() {
        let config = CorsConfig {
            allowed_origins: vec!["*".to_string()],
            ..Default::default()
        };
        let response = app(&config)
            .oneshot(preflight("https://anywhere.example"))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .is_none());
    }

    #[tokio::test]
    async fn test_simple_request_keeps_status() {
        let response = app(&CorsConfig::default())
            .oneshot(
                axum::http::Request::builder()
                    .uri("/v1/ping")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
