// Authentication module
// Decision: Opaque session tokens stored server-side, resolved on every request
// Decision: Google and GitHub sign-in via the OAuth2 authorization-code flow

pub mod config;
pub mod middleware;
pub mod oauth;
pub mod routes;

pub use config::AuthConfig;
pub use middleware::{AdminUser, AuthState, AuthUser, FromRef, OptionalAuthUser};
pub use routes::routes;
