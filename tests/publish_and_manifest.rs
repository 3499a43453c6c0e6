//! End-to-end coverage of the pipeline worker (C6) and manifest resolver
//! (C7): upload a zip, let a worker reassemble and publish it, then resolve
//! a manifest against it (§8).
//!
//! Requires `DATABASE_URL` and `REDIS_URL`; run with
//! `cargo test -- --ignored`.

mod common;

use eupdate::db::models::{Os, Texture, VersionBump, VersionState};
use eupdate::db::versions;
use eupdate::manifest;
use eupdate::pipeline::Worker;
use eupdate::upload::{self, StartUploadRequest, UploadChunkRequest};
use std::time::Duration;

#[tokio::test]
#[ignore]
async fn publishing_a_version_makes_its_files_resolvable_by_category() {
    let fx = common::setup().await;

    let version = versions::create_version(&fx.db, VersionBump::Revision, "publish test")
        .await
        .expect("create version");

    let zip_bytes = common::build_zip(&[
        ("general/readme.txt", b"hello from general"),
        ("windows/game.exe", b"pretend windows binary"),
        ("bc7/terrain.ktx", b"pretend bc7 texture data"),
        ("etc2/terrain.ktx", b"pretend etc2 texture data"),
        ("unmatched-folder/ignored.bin", b"should be dropped by classify"),
    ]);
    let hash = common::sha256_hex(&zip_bytes);
    let chunk_size = 16 * 1024_i64;
    let file_size = zip_bytes.len() as i64;

    let start = upload::start_upload(
        &fx.db,
        &fx.storage,
        StartUploadRequest {
            version_id: version.id,
            hash,
            chunk_size,
            file_size,
        },
    )
    .await
    .expect("start upload");
    assert_eq!(start.missing_ranges.len(), 1, "fixture is smaller than one chunk");

    let response = upload::upload_chunk(
        &fx.db,
        &fx.storage,
        &fx.queue,
        UploadChunkRequest {
            upload_id: start.upload_id,
            concurrent_id: start.concurrent_id,
            offset: 0,
            data: zip_bytes,
        },
    )
    .await
    .expect("upload the single chunk");
    assert!(response.finished);

    let worker = Worker {
        db: fx.db.clone(),
        storage: fx.storage.clone(),
        queue: fx.queue.clone(),
        cache: fx.cache.clone(),
    };
    let worker_handle = tokio::spawn(worker.run());

    // The reassemble job flips the Upload to READY; once it has, enqueue the
    // publish job exactly as the `process_version` handlers do.
    common::poll_until(Duration::from_secs(20), || {
        let db = fx.db.clone();
        let upload_id = start.upload_id;
        async move {
            let upload = eupdate::db::uploads::get(&db, upload_id).await.ok()??;
            (upload.state() == eupdate::db::models::UploadState::Ready).then_some(())
        }
    })
    .await;

    let job_id = format!("version-{}", version.id);
    fx.queue
        .enqueue(&job_id, eupdate::queue::JobPayload::ProcessPublish { version_id: version.id })
        .await
        .expect("enqueue publish job");

    let ready_version = common::poll_until(Duration::from_secs(20), || {
        let db = fx.db.clone();
        let version_id = version.id;
        async move {
            let v = versions::get_version(&db, version_id).await.ok()??;
            (v.state() == VersionState::Ready).then_some(v)
        }
    })
    .await;

    worker_handle.abort();
    assert_eq!(ready_version.state(), VersionState::Ready);

    // A client tuple guaranteed to sort before any real version, regardless
    // of how far the shared `version_counters` row has already advanced from
    // other tests.
    let manifest = manifest::resolve(&fx.db, &fx.cache, -1, 0, 0, Os::Windows, Texture::Bc7)
    .await
    .expect("resolve manifest");

    let local_paths: Vec<&str> = manifest.files.iter().map(|f| f.local_path.as_str()).collect();
    assert!(local_paths.contains(&"readme.txt"), "general files are always relevant");
    assert!(local_paths.contains(&"game.exe"), "windows files are relevant to a Windows client");
    assert!(local_paths.contains(&"terrain.ktx"), "bc7 texture matches the requested texture format");
    assert_eq!(
        manifest.files.iter().filter(|f| f.local_path == "terrain.ktx").count(),
        1,
        "the etc2 variant of the same local_path must not also appear for a bc7 client"
    );
    assert!(
        !local_paths.iter().any(|p| p.contains("ignored.bin")),
        "entries outside every category folder are dropped during classification"
    );
}
