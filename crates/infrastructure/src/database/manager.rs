use coordinator_core::{config::models::DatabaseConfig, CoordinatorError, CoordinatorResult};
use coordinator_domain::CoordinatorStore;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::sqlite::SqliteStore;
use crate::in_memory_store::InMemoryStore;

/// 按连接串识别存储类型
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseType {
    Memory,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("memory://") {
            DatabaseType::Memory
        } else {
            DatabaseType::SQLite
        }
    }
}

/// 创建存储并完成迁移
pub struct DatabaseManager {
    store: Arc<dyn CoordinatorStore>,
    database_type: DatabaseType,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> CoordinatorResult<Self> {
        let database_type = DatabaseType::from_url(&config.url);
        let store: Arc<dyn CoordinatorStore> = match database_type {
            DatabaseType::Memory => Arc::new(InMemoryStore::new()),
            DatabaseType::SQLite => {
                let store = SqliteStore::new(Self::connect_sqlite(config).await?);
                sqlx::migrate!("./migrations").run(store.pool()).await?;
                Arc::new(store)
            }
        };

        info!("存储已就绪: {:?}", database_type);
        Ok(Self {
            store,
            database_type,
        })
    }

    async fn connect_sqlite(config: &DatabaseConfig) -> CoordinatorResult<sqlx::SqlitePool> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(CoordinatorError::Database)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));

        let mut pool_options =
            SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(
                config.connection_timeout_seconds,
            ));

        // 每个 :memory: 连接都是独立的数据库，只能用单连接
        if config.url.contains(":memory:") || config.url.contains("mode=memory") {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>);
        } else {
            pool_options = pool_options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                .max_lifetime(Duration::from_secs(1800));
        }

        pool_options
            .connect_with(options)
            .await
            .map_err(CoordinatorError::Database)
    }

    pub fn store(&self) -> Arc<dyn CoordinatorStore> {
        Arc::clone(&self.store)
    }

    pub fn database_type(&self) -> DatabaseType {
        self.database_type.clone()
    }

    pub async fn health_check(&self) -> CoordinatorResult<()> {
        self.store.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: url.to_string(),
            ..DatabaseConfig::default()
        }
    }

    #[test]
    fn test_database_type_from_url() {
        assert_eq!(DatabaseType::from_url("memory://"), DatabaseType::Memory);
        assert_eq!(DatabaseType::from_url("sqlite::memory:"), DatabaseType::SQLite);
        assert_eq!(
            DatabaseType::from_url("sqlite://coordinator.db?mode=rwc"),
            DatabaseType::SQLite
        );
    }

    #[tokio::test]
    async fn test_memory_store() {
        let manager = DatabaseManager::new(&config("memory://")).await.unwrap();
        assert_eq!(manager.database_type(), DatabaseType::Memory);
        manager.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_in_memory_is_migrated() {
        let manager = DatabaseManager::new(&config("sqlite::memory:")).await.unwrap();
        manager.health_check().await.unwrap();

        let store = manager.store();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.list_workers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator.db");
        let url = format!("sqlite://{}", path.display());

        let manager = DatabaseManager::new(&config(&url)).await.unwrap();
        manager.health_check().await.unwrap();
        assert!(path.exists());
    }
}
