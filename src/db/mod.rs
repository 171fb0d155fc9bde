//! Database connection pool, migrations, and health check.
//!
//! Every claim attempt and every enqueue checks out its own connection from
//! this pool; nothing shares a connection across concurrent attempts.

pub mod claim;
pub mod message;

use crate::config::DatabaseConfig;
use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Default pool size when the caller does not choose one.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Database handle. Owns the connection pool shared across all workers.
#[derive(Debug, Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a pool of `max_connections`.
    pub async fn connect_with_max(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Connect from discrete connection parameters.
    pub async fn connect_with(config: &DatabaseConfig, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(config.connect_options())
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool, e.g. for opening a notification listener.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
