//! Postgres persistence for the streak engine.
//!
//! [`PgRemoteStore`](pg_store::PgRemoteStore) implements
//! `tether_core::store::RemoteStore` on top of the zero-sized repositories in
//! [`repositories`].

use sqlx::postgres::PgPoolOptions;

pub mod mapping;
pub mod models;
pub mod pg_store;
pub mod repositories;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to confirm the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
