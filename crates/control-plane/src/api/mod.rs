// HTTP API routes
//
// This module contains all HTTP route handlers for the public API.
// Each submodule handles a specific resource type with its own state.

pub mod admin;
pub mod common;
pub mod users;
pub mod validation;
pub mod webhooks;

// Re-export common types
pub use common::{ApiError, ApiJson, ApiResponse, ApiResult, MessageResponse};
