pub mod config;
pub mod error;
pub mod models;
pub mod openapi;
pub mod rate_limit; // in-memory rate limiting
pub mod reactions;
pub mod repo;
pub mod routes;
pub mod scans;
pub mod storage; // uploads + presigned object-store URLs
pub mod tokens;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
