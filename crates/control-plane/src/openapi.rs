// OpenAPI specification generation
//
// This module defines the OpenAPI spec for the NicheFlow API.
// It can be used by both the API server (for Swagger UI)
// and the export-openapi binary (for static spec generation).

use crate::api;
use crate::auth;
use nicheflow_core::{
    Account, Session, SocialAccount, SubscriptionInfo, UsageStats, User, UserRole, UserStatus,
};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Registers the session bearer token scheme
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation for the NicheFlow API
#[derive(OpenApi)]
#[openapi(
    paths(
        auth::routes::list_providers,
        auth::routes::get_auth_url,
        auth::routes::oauth_callback,
        auth::routes::verify_email,
        auth::routes::sign_out,
        auth::routes::get_session,
        api::users::get_profile,
        api::users::update_profile,
        api::users::get_preferences,
        api::users::update_preferences,
        api::users::list_social_accounts,
        api::users::link_social_account,
        api::users::unlink_social_account,
        api::users::get_usage,
        api::users::increment_usage,
        api::users::get_subscription,
        api::admin::list_users,
        api::admin::update_subscription,
        api::admin::create_verification_token,
        api::admin::cleanup_sessions,
        api::webhooks::clerk_webhook,
    ),
    components(
        schemas(
            User, UserRole, UserStatus, Session, Account, SocialAccount,
            UsageStats, SubscriptionInfo,
            api::MessageResponse,
            auth::routes::ProviderResponse, auth::routes::ProvidersResponse,
            auth::routes::AuthUrlResponse, auth::routes::AuthResponse,
            auth::routes::SessionResponse,
            api::users::UpdateProfileRequest, api::users::LinkSocialAccountRequest,
            api::users::PreferencesBody, api::users::SocialAccountsResponse,
            api::admin::ListUsersQuery, api::admin::UsersResponse,
            api::admin::CreateVerificationTokenRequest, api::admin::VerificationTokenResponse,
            api::admin::CleanupResponse,
            api::webhooks::ClerkWebhookEvent,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "OAuth sign-in, sessions and email verification"),
        (name = "users", description = "Profile, preferences, usage and social accounts"),
        (name = "admin", description = "Administrative endpoints (admin role required)"),
        (name = "webhooks", description = "Identity provider webhooks")
    ),
    info(
        title = "NicheFlow API",
        version = "0.1.0",
        description = "User, session, usage and subscription API for NicheFlow",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_lists_routes() {
        let json = ApiDoc::to_json().unwrap();
        assert!(json.contains("/auth/callback/{provider}"));
        assert!(json.contains("/v1/user/usage"));
        assert!(json.contains("/v1/admin/sessions/cleanup"));
        assert!(json.contains("/v1/webhook/clerk"));
        assert!(json.contains("\"bearer\""));
    }

    #[test]
    fn test_preferences_schema_is_free_form_object() {
        let spec: serde_json::Value = serde_json::from_str(&ApiDoc::to_json().unwrap()).unwrap();
        let schema = &spec["components"]["schemas"]["PreferencesBody"];
        assert_eq!(schema["type"], "object");
    }
}
