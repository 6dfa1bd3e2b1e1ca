//! Creates the `leads` table, its indexes and constraints.
//!
//! Idempotent: every statement uses `IF NOT EXISTS`.

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;

const MIGRATION: &str = include_str!("../../migrations/001_create_leads_table.sql");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("DB_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL or DB_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    println!("Applying 001_create_leads_table.sql...");
    sqlx::raw_sql(MIGRATION).execute(&pool).await?;
    println!("✓ Schema applied");

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM leads")
        .fetch_one(&pool)
        .await?;
    println!("✓ Verified: leads table is accessible ({} rows)", count);

    Ok(())
}
