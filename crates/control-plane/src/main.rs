// NicheFlow API server
// Decision: Postgres when DATABASE_URL is set, in-memory storage otherwise (development only)
// Decision: Redis-backed rate limiting when REDIS_URL is set, in-process counters otherwise

use anyhow::{bail, Context, Result};
use nicheflow_control_plane::{
    build_app, cache::CacheBackend, config::AppConfig, storage::StorageBackend,
};
use nicheflow_core::telemetry::{init_telemetry, TelemetryConfig};
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal outside local development
    let _ = dotenvy::dotenv();

    // Configure via environment variables:
    // - OTEL_SERVICE_NAME: Service name (default: "nicheflow-control-plane")
    // - RUST_LOG / LOG_LEVEL: Log filter (default: "nicheflow_control_plane=debug,tower_http=debug")
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "nicheflow" {
        telemetry_config.service_name = "nicheflow-control-plane".to_string();
    }
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter =
            Some("nicheflow_control_plane=debug,tower_http=debug".to_string());
    }
    telemetry_config.service_version = Some(env!("CARGO_PKG_VERSION").to_string());
    init_telemetry(telemetry_config);

    let config = AppConfig::from_env();
    tracing::info!(
        env = %config.app.env,
        version = %config.app.version,
        "nicheflow-api starting..."
    );

    let storage = match &config.database.url {
        Some(url) => {
            let storage = StorageBackend::postgres(url, config.database.max_connections)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Connected to database");
            storage
        }
        None if config.is_production() => {
            bail!("DATABASE_URL environment variable required in production")
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage (data is not persisted)");
            StorageBackend::in_memory()
        }
    };

    let cache = match &config.redis_url {
        Some(url) => {
            let cache = CacheBackend::redis(url)
                .await
                .context("Failed to connect to Redis")?;
            tracing::info!("Connected to Redis");
            cache
        }
        None => {
            tracing::warn!("REDIS_URL not set, rate-limit counters are kept in process");
            CacheBackend::in_memory()
        }
    };

    if config.clerk.webhook_secret.is_none() {
        tracing::warn!("CLERK_WEBHOOK_SECRET not set, webhook signatures will not be verified");
    }

    tracing::info!(
        oauth = config.auth.oauth_enabled(),
        google = config.auth.google.is_some(),
        github = config.auth.github.is_some(),
        "Authentication configured"
    );
    tracing::info!(
        enabled = config.rate_limit.enabled,
        limit = config.rate_limit.limit,
        window_secs = config.rate_limit.window.as_secs(),
        cache = cache.kind_str(),
        "Rate limiting configured"
    );
    if !config.app.api_prefix.is_empty() {
        tracing::info!(prefix = %config.app.api_prefix, "API prefix configured");
    }

    let app = build_app(&config, storage, cache);

    // Start HTTP server
    let addr = format!("0.0.0.0:{}", config.app.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}
