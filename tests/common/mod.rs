//! Shared fixtures for the DB/Redis-gated integration tests (§10.4).
//!
//! Every test in this directory requires a live Postgres reachable via
//! `DATABASE_URL` and a live Redis reachable via `REDIS_URL`. Run them with:
//!
//! ```bash
//! DATABASE_URL=postgres://... REDIS_URL=redis://... cargo test -- --ignored --test-threads=1
//! ```
//!
//! `--test-threads=1` matters: `setup()` resets the shared `version_counters`
//! row and truncates the version-scoped catalog tables so every test starts
//! from an empty catalog and can assert literal `(major,minor,revision)`
//! tuples (§8 scenarios 2 and 3) rather than only relative deltas. Each test
//! still gets its own queue namespace and its own local storage root, so
//! only the catalog reset needs serialization.

use eupdate::cache::ManifestCache;
use eupdate::config::{StorageConfig, StorageProvider};
use eupdate::db::{self, DbPool};
use eupdate::queue::JobQueue;
use eupdate::storage::Storage;
use std::sync::Arc;

pub struct Fixture {
    pub db: DbPool,
    pub storage: Arc<Storage>,
    pub queue: JobQueue,
    pub cache: ManifestCache,
    // Held for its Drop impl; the directory backs the Local storage provider.
    pub _scratch: tempfile::TempDir,
}

pub async fn setup() -> Fixture {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set to run the DB/Redis-gated integration tests");
    let redis_url = std::env::var("REDIS_URL")
        .expect("REDIS_URL must be set to run the DB/Redis-gated integration tests");

    let pool = db::create_pool(&database_url)
        .await
        .expect("connect to postgres");
    db::run_migrations(&pool).await.expect("run migrations");

    sqlx::query("TRUNCATE TABLE versions CASCADE")
        .execute(&pool)
        .await
        .expect("truncate versions for a clean catalog");
    sqlx::query("UPDATE version_counters SET major = 0, minor = 0, revision = 0 WHERE id = TRUE")
        .execute(&pool)
        .await
        .expect("reset the version counter for a clean catalog");

    let redis_client = redis::Client::open(redis_url.as_str()).expect("parse REDIS_URL");
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .expect("connect to redis");

    let scratch = tempfile::tempdir().expect("create scratch dir");
    let storage_cfg = StorageConfig {
        provider: StorageProvider::Local,
        bucket: scratch.path().to_string_lossy().to_string(),
        subpath: String::new(),
    };
    let storage = Storage::new(&storage_cfg, &storage_cfg).expect("build local storage backend");

    let queue_name = format!("test-{}", uuid::Uuid::new_v4());
    let queue = JobQueue::new(redis_conn.clone(), queue_name);
    let cache = ManifestCache::new(redis_conn);

    Fixture {
        db: pool,
        storage: Arc::new(storage),
        queue,
        cache,
        _scratch: scratch,
    }
}

/// Build a zip archive in memory with the given `(entry_path, content)`
/// pairs, padded with a trailing comment so small fixtures still clear the
/// 1 KiB minimum upload size (§4.4 validation).
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options =
            zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            zip.start_file(*name, options).expect("start zip entry");
            std::io::Write::write_all(&mut zip, content).expect("write zip entry");
        }
        zip.set_comment("x".repeat(2048));
        zip.finish().expect("finish zip archive");
    }
    buffer.into_inner()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Poll `f` every 100ms until it returns `Some`, panicking after `timeout`.
pub async fn poll_until<T, F, Fut>(timeout: std::time::Duration, mut f: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = f().await {
            return value;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for condition");
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}
