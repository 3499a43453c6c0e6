//! Version CRUD, version-number allocation, and the publish transaction.

use super::models::{UpdateFile, Version, VersionBump, VersionState};
use super::DbPool;
use chrono::Utc;
use uuid::Uuid;

/// Allocate the next `(major, minor, revision)` tuple and insert a PENDING
/// version in one transaction.
///
/// Per the design notes, the preferred allocation strategy is a
/// single-document upsert of the current max tuple rather than a dedicated
/// lock document. `version_counters` is that single row; `SELECT ... FOR
/// UPDATE` within the transaction gives the same serialization a
/// find-and-increment aggregation pipeline would, without a separate lock
/// collection.
///
/// `(0,0,0)` in that row means "nothing has ever been assigned" (no real
/// version is ever `0.0.0`): the first call of any bump kind against an
/// empty catalog allocates `1.0.0` outright, ignoring the bump kind (§8
/// scenarios 2 and 3). Every subsequent call applies the bump normally.
pub async fn create_version(
    pool: &DbPool,
    bump: VersionBump,
    description: &str,
) -> anyhow::Result<Version> {
    let mut tx = pool.begin().await?;

    let (mut major, mut minor, mut revision): (i32, i32, i32) =
        sqlx::query_as("SELECT major, minor, revision FROM version_counters WHERE id = TRUE FOR UPDATE")
            .fetch_one(&mut *tx)
            .await?;

    if (major, minor, revision) == (0, 0, 0) {
        major = 1;
    } else {
        match bump {
            VersionBump::Major => {
                major += 1;
                minor = 0;
                revision = 0;
            }
            VersionBump::Minor => {
                minor += 1;
                revision = 0;
            }
            VersionBump::Revision => {
                revision += 1;
            }
        }
    }

    sqlx::query("UPDATE version_counters SET major = $1, minor = $2, revision = $3 WHERE id = TRUE")
        .bind(major)
        .bind(minor)
        .bind(revision)
        .execute(&mut *tx)
        .await?;

    let id = Uuid::new_v4();
    let now = Utc::now();
    let version = sqlx::query_as::<_, Version>(
        r#"
        INSERT INTO versions (id, major, minor, revision, description, state, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
        RETURNING id, major, minor, revision, description, state, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(major)
    .bind(minor)
    .bind(revision)
    .bind(description)
    .bind(VersionState::Pending as i16)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(version)
}

pub async fn get_version(pool: &DbPool, id: Uuid) -> anyhow::Result<Option<Version>> {
    let version = sqlx::query_as::<_, Version>(
        r#"
        SELECT id, major, minor, revision, description, state, created_at, updated_at
        FROM versions WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(version)
}

pub async fn edit_description(pool: &DbPool, id: Uuid, description: &str) -> anyhow::Result<bool> {
    let result = sqlx::query("UPDATE versions SET description = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(description)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_versions(
    pool: &DbPool,
    page: i64,
    size: i64,
) -> anyhow::Result<(Vec<Version>, i64)> {
    let versions = sqlx::query_as::<_, Version>(
        r#"
        SELECT id, major, minor, revision, description, state, created_at, updated_at
        FROM versions
        ORDER BY created_at DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(size)
    .bind(page * size)
    .fetch_all(pool)
    .await?;

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM versions")
        .fetch_one(pool)
        .await?;

    Ok((versions, total.0))
}

/// Compare-and-set the version state. Returns `true` iff this call performed
/// the transition (CAS winner). Enforces the monotonicity invariant: the
/// `WHERE state = $from` guard means a stale caller can never move state
/// backward or re-apply a transition that already happened.
pub async fn cas_state(
    pool: &DbPool,
    id: Uuid,
    from: VersionState,
    to: VersionState,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE versions SET state = $3, updated_at = NOW() WHERE id = $1 AND state = $2",
    )
    .bind(id)
    .bind(from as i16)
    .bind(to as i16)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Versions strictly newer than the client's tuple, in ascending `created_at`,
/// restricted to READY. Used by the manifest resolver (C7 step 1).
pub async fn list_ready_versions_after(
    pool: &DbPool,
    major: i32,
    minor: i32,
    revision: i32,
) -> anyhow::Result<Vec<Version>> {
    let versions = sqlx::query_as::<_, Version>(
        r#"
        SELECT id, major, minor, revision, description, state, created_at, updated_at
        FROM versions
        WHERE state = $4
          AND (major, minor, revision) > ($1, $2, $3)
        ORDER BY created_at ASC
        "#,
    )
    .bind(major)
    .bind(minor)
    .bind(revision)
    .bind(VersionState::Ready as i16)
    .fetch_all(pool)
    .await?;
    Ok(versions)
}

/// The publish transaction (§4.6 step 8): insert every UpdateFile row for
/// this version and flip the version to READY atomically. No resolver can
/// observe a READY version without also observing all of its files, because
/// both writes commit in the same transaction.
pub async fn publish_files_and_ready(
    pool: &DbPool,
    version_id: Uuid,
    files: &[NewUpdateFile],
) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await?;

    for file in files {
        sqlx::query(
            r#"
            INSERT INTO update_files
                (id, version_id, category, file_name, extension, local_path, packed_size, file_size, crc32, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (version_id, local_path, category) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(version_id)
        .bind(file.category)
        .bind(&file.file_name)
        .bind(&file.extension)
        .bind(&file.local_path)
        .bind(file.packed_size)
        .bind(file.file_size)
        .bind(&file.crc32)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
    }

    let result = sqlx::query(
        "UPDATE versions SET state = $3, updated_at = NOW() WHERE id = $1 AND state = $2",
    )
    .bind(version_id)
    .bind(VersionState::Processing as i16)
    .bind(VersionState::Ready as i16)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        // Another caller already moved this version past PROCESSING, or it
        // never reached PROCESSING. Abort rather than leave files orphaned
        // from a READY flip that didn't happen.
        tx.rollback().await?;
        return Ok(false);
    }

    tx.commit().await?;
    Ok(true)
}

pub struct NewUpdateFile {
    pub category: i16,
    pub file_name: String,
    pub extension: String,
    pub local_path: String,
    pub packed_size: i64,
    pub file_size: i64,
    pub crc32: String,
}

/// Stream UpdateFile rows for the given versions restricted to a relevant
/// category set (C7 step 4).
pub async fn files_for_versions(
    pool: &DbPool,
    version_ids: &[Uuid],
    categories: &[i16],
) -> anyhow::Result<Vec<(UpdateFile, Version)>> {
    let rows = sqlx::query_as::<_, UpdateFileWithVersion>(
        r#"
        SELECT
            f.id, f.version_id, f.category, f.file_name, f.extension, f.local_path,
            f.packed_size, f.file_size, f.crc32, f.created_at,
            v.id as v_id, v.major, v.minor, v.revision, v.description, v.state,
            v.created_at as v_created_at, v.updated_at as v_updated_at
        FROM update_files f
        JOIN versions v ON v.id = f.version_id
        WHERE f.version_id = ANY($1) AND f.category = ANY($2)
        "#,
    )
    .bind(version_ids)
    .bind(categories)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.split()).collect())
}

#[derive(sqlx::FromRow)]
struct UpdateFileWithVersion {
    id: Uuid,
    version_id: Uuid,
    category: i16,
    file_name: String,
    extension: String,
    local_path: String,
    packed_size: i64,
    file_size: i64,
    crc32: String,
    created_at: chrono::DateTime<Utc>,
    v_id: Uuid,
    major: i32,
    minor: i32,
    revision: i32,
    description: String,
    state: i16,
    v_created_at: chrono::DateTime<Utc>,
    v_updated_at: chrono::DateTime<Utc>,
}

impl UpdateFileWithVersion {
    fn split(self) -> (UpdateFile, Version) {
        (
            UpdateFile {
                id: self.id,
                version_id: self.version_id,
                category: self.category,
                file_name: self.file_name,
                extension: self.extension,
                local_path: self.local_path,
                packed_size: self.packed_size,
                file_size: self.file_size,
                crc32: self.crc32,
                created_at: self.created_at,
            },
            Version {
                id: self.v_id,
                major: self.major,
                minor: self.minor,
                revision: self.revision,
                description: self.description,
                state: self.state,
                created_at: self.v_created_at,
                updated_at: self.v_updated_at,
            },
        )
    }
}
