use crate::config::Config;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Owner of the lead database pool.
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Connects with the pool sizing from `config` and checks the database
    /// answers before the server starts taking submissions.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let pool = pool_options(config).connect(&config.database_url).await?;

        // Fail fast if the database is unreachable
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }
}

/// Submissions wait at most `db_acquire_timeout` for a connection, so a
/// saturated pool surfaces as a persistence failure instead of a hung request.
fn pool_options(config: &Config) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout())
}
