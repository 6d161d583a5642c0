// Services layer for business logic
// Services own business logic and validation, calling storage directly

pub mod auth;
pub mod user;

pub use auth::{generate_token, AuthService};
pub use user::UserService;
