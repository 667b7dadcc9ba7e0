pub mod api_observability;
pub mod app_config;
pub mod coordinator;
pub mod database;

// Re-export main types for easier imports
pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use coordinator::CoordinatorConfig;
pub use database::DatabaseConfig;
