//! Marketplace operations layer: request gateway and database backups.

pub mod backup;
pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod store;

pub use backup::BackupOrchestrator;
pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
