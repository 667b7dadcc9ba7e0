pub mod manager;
pub mod mapping;
pub mod sqlite;
pub use manager::{DatabaseManager, DatabaseType};
pub use sqlite::{SqliteStore, SqliteTransaction};
