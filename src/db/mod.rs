//! Catalog Store (C2): durable document-style storage over Postgres.
//!
//! The distilled spec describes the contract abstractly (insert, CAS-upsert,
//! findOne, range queries, paginated listings, multi-document transactions)
//! so that it could be satisfied by Mongo or any engine offering
//! single-document atomicity and multi-document transactions. This
//! implementation satisfies it relationally.

pub mod models;
pub mod servers;
pub mod uploads;
pub mod versions;

pub type DbPool = sqlx::PgPool;

pub async fn create_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, serde::Serialize)]
pub struct Stats {
    pub versions: i64,
    pub uploads: i64,
    pub update_files: i64,
}

pub async fn get_stats(pool: &DbPool) -> anyhow::Result<Stats> {
    let versions: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM versions")
        .fetch_one(pool)
        .await?;
    let uploads: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM uploads")
        .fetch_one(pool)
        .await?;
    let files: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM update_files")
        .fetch_one(pool)
        .await?;

    Ok(Stats {
        versions: versions.0,
        uploads: uploads.0,
        update_files: files.0,
    })
}
