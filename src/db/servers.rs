//! Servers collection: the list of update-distribution endpoints handed to
//! clients by `GET /api/v1/updates/servers/list`. A thin, rarely-written
//! table maintained by operators; the core only ever reads it.

use super::DbPool;

pub async fn list_server_urls(pool: &DbPool) -> anyhow::Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM servers ORDER BY url")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(url,)| url).collect())
}
