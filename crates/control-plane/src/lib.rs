// NicheFlow Control Plane Library
// Decision: Shared library for binaries (API server, OpenAPI export) and integration tests

// API routes and types (shared for OpenAPI generation)
pub mod api;

// Router assembly
pub mod app;

// Authentication module
pub mod auth;

// Rate-limit counters
pub mod cache;

pub mod config;

// Router-level middleware (rate limiting, CORS)
pub mod middleware;

// Services layer
pub mod services;

// Storage layer
pub mod storage;

// OpenAPI spec generation
pub mod openapi;

pub use app::build_app;
