/// Application context and dependency injection
use crate::{
    config::ServerConfig,
    db,
    error::{GuardError, GuardResult},
    flows::AuthService,
    rate_limit::RequestThrottle,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub account_db: SqlitePool,
    // Auth flows and the stores behind them
    pub auth: Arc<AuthService>,
    // Global per-IP request throttle
    pub throttle: Arc<RequestThrottle>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> GuardResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        // Initialize account database
        let account_db = db::create_pool(&config.storage.account_db, db::DatabaseOptions::default()).await?;

        // Run migrations
        db::run_migrations(&account_db).await?;

        // Test connection
        db::test_connection(&account_db).await?;

        Ok(Self::from_pool(config, account_db))
    }

    /// Wire services over an already migrated pool
    pub fn from_pool(config: ServerConfig, account_db: SqlitePool) -> Self {
        let config = Arc::new(config);

        let auth = Arc::new(AuthService::new(Arc::clone(&config), account_db.clone()));
        let throttle = Arc::new(RequestThrottle::new(&config.rate_limit));

        Self {
            config,
            account_db,
            auth,
            throttle,
        }
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> GuardResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                GuardError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }

    /// Context over a fresh in-memory database
    #[cfg(test)]
    pub async fn for_tests(config: ServerConfig) -> Self {
        let account_db = db::create_memory_pool().await.unwrap();
        db::run_migrations(&account_db).await.unwrap();
        Self::from_pool(config, account_db)
    }
}
