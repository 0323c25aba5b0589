use crate::config::{is_valid_identifier, Config};
use crate::error::{Result, StoreError};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::NoTls;
use tracing::info;

/// Owns the connection pool for the broker's configuration database.
///
/// Every connection handed out has `search_path` pinned to the configured
/// schema, so the unqualified table names in migrations, seeds and queries
/// resolve inside it.
pub struct PoolManager {
    pool: Pool,
    database: String,
    schema: String,
}

impl PoolManager {
    pub async fn new(config: &Config) -> Result<Self> {
        let manager = Self::connect(&config.database_url, &config.db_schema, config.max_connections)?;

        // Ping before handing the pool out
        let client = manager.client().await?;
        client.execute("SELECT 1", &[]).await.map_err(|e| {
            StoreError::ConnectionFailed {
                database: manager.database.clone(),
                cause: format!("Ping failed: {}", e),
            }
        })?;

        info!(
            "Connected to PostgreSQL database {} (schema {})",
            manager.database, manager.schema
        );

        Ok(manager)
    }

    /// Build the pool without touching the network.
    pub fn connect(database_url: &str, schema: &str, max_size: u32) -> Result<Self> {
        // The schema name is interpolated into DDL and connection options
        if !is_valid_identifier(schema) {
            return Err(StoreError::InvalidRequest {
                message: format!("Invalid schema name: {}", schema),
            });
        }

        let mut pg_config: tokio_postgres::Config =
            database_url.parse().map_err(|e: tokio_postgres::Error| {
                StoreError::InvalidRequest {
                    message: format!("Invalid DATABASE_URL: {}", e),
                }
            })?;

        pg_config.options(&search_path_option(schema));

        let database = pg_config
            .get_dbname()
            .map(str::to_string)
            .or_else(|| pg_config.get_user().map(str::to_string))
            .unwrap_or_else(|| "postgres".to_string());

        let pool = create_pool(pg_config, max_size)?;

        Ok(Self {
            pool,
            database,
            schema: schema.to_string(),
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                database: self.database.clone(),
                cause: e.to_string(),
            })
    }

    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }
}

fn search_path_option(schema: &str) -> String {
    format!("-c search_path={}", schema)
}

fn create_pool(pg_config: tokio_postgres::Config, max_size: u32) -> Result<Pool> {
    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );

    Pool::builder(manager)
        .max_size(max_size as usize)
        .wait_timeout(Some(Duration::from_secs(5)))
        .create_timeout(Some(Duration::from_secs(5)))
        .recycle_timeout(Some(Duration::from_secs(5)))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| StoreError::Internal(format!("Failed to create pool: {}", e)))
}
