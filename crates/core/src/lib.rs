// NicheFlow Core
//
// DB-agnostic domain types shared by the control plane.
//
// Key design decisions:
// - Entities (User, Session, Account, SocialAccount) carry no storage or HTTP types
// - Usage window rules are pure functions so both storage backends apply them identically
// - ServiceError classifies failures; the HTTP layer maps the class to a status code

// Telemetry (console tracing)
pub mod telemetry;

// Domain entity types
pub mod account;
pub mod session;
pub mod user;

pub mod error;

// Re-exports for convenience
pub use account::{Account, SocialAccount};
pub use error::{ErrorKind, Result, ServiceError};
pub use session::Session;
pub use user::{
    is_builtin_preference, Preferences, SubscriptionInfo, UsageRejection, UsageStats, User, UserRole,
    UserStatus, BOOLEAN_PREFERENCE_KEYS, BUILTIN_PREFERENCE_KEYS, DEFAULT_MONTHLY_LIMIT,
    DEFAULT_USAGE_LIMIT,
};
