//! Upload and UploadChunk persistence backing the Upload Coordinator (C4).

use super::models::{chunks_count, Upload, UploadState};
use super::DbPool;
use chrono::Utc;
use uuid::Uuid;

pub async fn get_by_version(pool: &DbPool, version_id: Uuid) -> anyhow::Result<Option<Upload>> {
    let upload = sqlx::query_as::<_, Upload>(
        r#"
        SELECT id, version_id, concurrent_id, hash, chunk_size, file_size, chunks_count, state, created_at, updated_at
        FROM uploads WHERE version_id = $1
        "#,
    )
    .bind(version_id)
    .fetch_optional(pool)
    .await?;
    Ok(upload)
}

pub enum StartOutcome {
    Created(Upload),
    Resumed(Upload),
    Rotated(Upload),
}

impl StartOutcome {
    pub fn upload(&self) -> &Upload {
        match self {
            StartOutcome::Created(u) | StartOutcome::Resumed(u) | StartOutcome::Rotated(u) => u,
        }
    }

    pub fn rotated(&self) -> bool {
        matches!(self, StartOutcome::Rotated(_))
    }
}

/// StartUpload (§4.4): insert-or-reuse-or-rotate the Upload row for a
/// version, executed as a single atomic operation against the row.
pub async fn start_upload(
    pool: &DbPool,
    version_id: Uuid,
    hash: &str,
    chunk_size: i64,
    file_size: i64,
) -> anyhow::Result<StartOutcome> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query_as::<_, Upload>(
        r#"
        SELECT id, version_id, concurrent_id, hash, chunk_size, file_size, chunks_count, state, created_at, updated_at
        FROM uploads WHERE version_id = $1 FOR UPDATE
        "#,
    )
    .bind(version_id)
    .fetch_optional(&mut *tx)
    .await?;

    let count = chunks_count(file_size, chunk_size);
    let now = Utc::now();

    let outcome = match existing {
        None => {
            let upload = sqlx::query_as::<_, Upload>(
                r#"
                INSERT INTO uploads
                    (id, version_id, concurrent_id, hash, chunk_size, file_size, chunks_count, state, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
                RETURNING id, version_id, concurrent_id, hash, chunk_size, file_size, chunks_count, state, created_at, updated_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(version_id)
            .bind(Uuid::new_v4())
            .bind(hash)
            .bind(chunk_size as i32)
            .bind(file_size)
            .bind(count)
            .bind(UploadState::None as i16)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            StartOutcome::Created(upload)
        }
        Some(existing) if existing.hash == hash && existing.chunk_size as i64 == chunk_size => {
            StartOutcome::Resumed(existing)
        }
        Some(existing) => {
            // Parameters changed: rotate the epoch, drop the old epoch's chunk rows.
            sqlx::query("DELETE FROM upload_chunks WHERE upload_id = $1 AND concurrent_id = $2")
                .bind(existing.id)
                .bind(existing.concurrent_id)
                .execute(&mut *tx)
                .await?;

            let rotated = sqlx::query_as::<_, Upload>(
                r#"
                UPDATE uploads
                SET concurrent_id = $2, hash = $3, chunk_size = $4, file_size = $5,
                    chunks_count = $6, state = $7, updated_at = $8
                WHERE id = $1
                RETURNING id, version_id, concurrent_id, hash, chunk_size, file_size, chunks_count, state, created_at, updated_at
                "#,
            )
            .bind(existing.id)
            .bind(Uuid::new_v4())
            .bind(hash)
            .bind(chunk_size as i32)
            .bind(file_size)
            .bind(count)
            .bind(UploadState::None as i16)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            StartOutcome::Rotated(rotated)
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Idempotent chunk upsert: duplicate `(upload_id, concurrent_id, offset)`
/// writes are no-ops (`$setOnInsert` semantics).
pub async fn upsert_chunk(
    pool: &DbPool,
    upload_id: Uuid,
    concurrent_id: Uuid,
    offset: i32,
    length: i32,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO upload_chunks (upload_id, concurrent_id, "offset", length, created_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (upload_id, concurrent_id, "offset") DO NOTHING
        "#,
    )
    .bind(upload_id)
    .bind(concurrent_id)
    .bind(offset)
    .bind(length)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn stored_offsets(
    pool: &DbPool,
    upload_id: Uuid,
    concurrent_id: Uuid,
) -> anyhow::Result<Vec<i32>> {
    let rows: Vec<(i32,)> = sqlx::query_as(
        r#"SELECT "offset" FROM upload_chunks WHERE upload_id = $1 AND concurrent_id = $2"#,
    )
    .bind(upload_id)
    .bind(concurrent_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(o,)| o).collect())
}

pub async fn count_chunks(pool: &DbPool, upload_id: Uuid, concurrent_id: Uuid) -> anyhow::Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM upload_chunks WHERE upload_id = $1 AND concurrent_id = $2",
    )
    .bind(upload_id)
    .bind(concurrent_id)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn cas_state(
    pool: &DbPool,
    id: Uuid,
    from: UploadState,
    to: UploadState,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE uploads SET state = $3, updated_at = NOW() WHERE id = $1 AND state = $2",
    )
    .bind(id)
    .bind(from as i16)
    .bind(to as i16)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get(pool: &DbPool, id: Uuid) -> anyhow::Result<Option<Upload>> {
    let upload = sqlx::query_as::<_, Upload>(
        r#"
        SELECT id, version_id, concurrent_id, hash, chunk_size, file_size, chunks_count, state, created_at, updated_at
        FROM uploads WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(upload)
}

/// Delete an Upload's chunk rows for its current epoch (used by the pipeline
/// worker after a successful reassemble, §4.6 step 6).
pub async fn delete_chunks(pool: &DbPool, upload_id: Uuid, concurrent_id: Uuid) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM upload_chunks WHERE upload_id = $1 AND concurrent_id = $2")
        .bind(upload_id)
        .bind(concurrent_id)
        .execute(pool)
        .await?;
    Ok(())
}
