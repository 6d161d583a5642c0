// HTTP middleware applied around the whole router
// Decision: Rate limiting and CORS are router layers; auth and role checks are extractors

pub mod cors;
pub mod rate_limit;

pub use cors::{cors_layer, preflight_no_content};
pub use rate_limit::{client_ip, rate_limit, RateLimitState};
