//! Database pool creation.
//!
//! Uses a concrete pool type selected at compile time via feature flags
//! rather than `sqlx::AnyPool`, so `#[derive(FromRow)]` works against
//! backend-specific row types.

use crate::error::{Result, StoreError};
use tracing::info;

/// Database pool type alias.
///
/// - `sqlite` feature (default): `SqlitePool`
/// - `postgres` feature: `PgPool`
#[cfg(feature = "sqlite")]
pub type DbPool = sqlx::SqlitePool;

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DbPool = sqlx::PgPool;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Create a database pool from configuration and apply backend-specific
/// connection-level settings.
pub async fn create_pool(config: &DbConfig) -> Result<DbPool> {
    #[cfg(feature = "sqlite")]
    {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        apply_sqlite_pragmas(&pool).await?;
        info!("connected to sqlite store at {}", config.url);
        return Ok(pool);
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        info!("connected to postgres store");
        return Ok(pool);
    }

    #[allow(unreachable_code)]
    Err(StoreError::invalid_state(
        "no store backend feature compiled in (enable `sqlite` or `postgres`)",
    ))
}

#[cfg(feature = "sqlite")]
async fn apply_sqlite_pragmas(pool: &DbPool) -> Result<()> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON").execute(pool).await?;
    Ok(())
}
