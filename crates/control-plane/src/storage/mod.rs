// Storage layer for NicheFlow control-plane
// Decision: Support both PostgreSQL (production) and in-memory (dev mode)
//
// - Database: sqlx repositories over the migrations in ./migrations
// - InMemoryDatabase: HashMap-backed twin with the same constraints
// - StorageBackend: enum dispatch used by services

pub mod backend;
pub mod memory;
pub mod models;
pub mod repositories;

pub use backend::StorageBackend;
pub use memory::InMemoryDatabase;
pub use models::*;
pub use repositories::Database;
