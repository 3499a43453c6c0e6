//! End-to-end coverage of the catalog store (C2), upload coordinator (C4),
//! and manifest resolver (C7) against a live Postgres/Redis (§8).
//!
//! Requires `DATABASE_URL` and `REDIS_URL`; run with
//! `cargo test -- --ignored`.

mod common;

use eupdate::db::models::{Os, Texture, VersionBump, VersionState};
use eupdate::db::versions;
use eupdate::manifest;
use eupdate::upload::{self, StartUploadRequest, UploadChunkRequest};

#[tokio::test]
#[ignore]
async fn empty_catalog_resolve_returns_empty_manifest_for_current_version() {
    let fx = common::setup().await;

    let manifest = manifest::resolve(&fx.db, &fx.cache, 9_000, 0, 0, Os::Windows, Texture::Bc7)
        .await
        .expect("resolve against an unreachable client version");

    assert!(manifest.files.is_empty());
    assert_eq!(manifest.version, "9000.0.0");
}

#[tokio::test]
#[ignore]
async fn fresh_version_can_be_created_and_fetched() {
    let fx = common::setup().await;

    // §8 scenario 2: the first-ever CreateVersion(MAJOR) on an empty
    // catalog yields 1.0.0, regardless of bump kind.
    let version = versions::create_version(&fx.db, VersionBump::Major, "integration test build")
        .await
        .expect("create version");
    assert_eq!(version.state(), VersionState::Pending);
    assert_eq!(version.semver(), "1.0.0");

    let fetched = versions::get_version(&fx.db, version.id)
        .await
        .expect("get_version")
        .expect("version exists");
    assert_eq!(fetched.id, version.id);
    assert_eq!(fetched.description, "integration test build");
}

#[tokio::test]
#[ignore]
async fn sequential_revision_bumps_on_an_empty_catalog_yield_the_scenario_3_tuples() {
    let fx = common::setup().await;

    // §8 scenario 3: three CreateVersion(REVISION) on an empty catalog
    // yield 1.0.0, 1.0.1, 1.0.2 — the first call is forced to 1.0.0
    // regardless of its bump kind, then REVISION bumps apply normally.
    let first = versions::create_version(&fx.db, VersionBump::Revision, "first")
        .await
        .expect("first revision bump");
    let second = versions::create_version(&fx.db, VersionBump::Revision, "second")
        .await
        .expect("second revision bump");
    let third = versions::create_version(&fx.db, VersionBump::Revision, "third")
        .await
        .expect("third revision bump");

    assert_eq!(first.semver(), "1.0.0");
    assert_eq!(second.semver(), "1.0.1");
    assert_eq!(third.semver(), "1.0.2");
}

#[tokio::test]
#[ignore]
async fn sequential_bumps_carry_forward_the_shared_counter() {
    let fx = common::setup().await;

    let major = versions::create_version(&fx.db, VersionBump::Major, "major bump")
        .await
        .expect("major bump");
    assert_eq!(major.semver(), "1.0.0");

    let minor = versions::create_version(&fx.db, VersionBump::Minor, "minor bump")
        .await
        .expect("minor bump");
    let revision = versions::create_version(&fx.db, VersionBump::Revision, "revision bump")
        .await
        .expect("revision bump");

    assert_eq!(minor.major, major.major);
    assert_eq!(minor.minor, major.minor + 1);
    assert_eq!(minor.revision, 0);

    assert_eq!(revision.major, minor.major);
    assert_eq!(revision.minor, minor.minor);
    assert_eq!(revision.revision, minor.revision + 1);
}

#[tokio::test]
#[ignore]
async fn chunked_upload_in_reverse_arrival_order_finishes_on_the_last_missing_chunk() {
    let fx = common::setup().await;
    let version = versions::create_version(&fx.db, VersionBump::Revision, "chunked upload test")
        .await
        .expect("create version");

    let chunk_size = 16 * 1024_i64;
    let file_size = chunk_size * 2 + 4096; // 3 chunks, last one partial
    let content = vec![0x5Au8; file_size as usize];
    let hash = common::sha256_hex(&content);

    let start = upload::start_upload(
        &fx.db,
        &fx.storage,
        StartUploadRequest {
            version_id: version.id,
            hash: hash.clone(),
            chunk_size,
            file_size,
        },
    )
    .await
    .expect("start upload");
    assert_eq!(start.missing_ranges.len(), 1);
    assert_eq!(start.missing_ranges[0].start, 0);
    assert_eq!(start.missing_ranges[0].end, 2);

    // Arrive in reverse: chunk 2, then 1, then 0.
    let chunk_at = |offset: i64| -> Vec<u8> {
        let start = offset * chunk_size;
        let end = ((offset + 1) * chunk_size).min(file_size);
        content[start as usize..end as usize].to_vec()
    };

    for offset in [2, 1] {
        let response = upload::upload_chunk(
            &fx.db,
            &fx.storage,
            &fx.queue,
            UploadChunkRequest {
                upload_id: start.upload_id,
                concurrent_id: start.concurrent_id,
                offset,
                data: chunk_at(offset),
            },
        )
        .await
        .expect("upload chunk");
        assert!(!response.finished);
    }

    let response = upload::upload_chunk(
        &fx.db,
        &fx.storage,
        &fx.queue,
        UploadChunkRequest {
            upload_id: start.upload_id,
            concurrent_id: start.concurrent_id,
            offset: 0,
            data: chunk_at(0),
        },
    )
    .await
    .expect("upload final chunk");
    assert!(response.finished);

    // Exactly one reassemble job was enqueued, and it's for this upload's
    // current epoch.
    let jobs = fx.queue.list_jobs().await.expect("list jobs");
    assert_eq!(jobs.len(), 1);
    match &jobs[0].payload {
        eupdate::queue::JobPayload::ProcessUpload {
            upload_id,
            concurrent_id,
            ..
        } => {
            assert_eq!(*upload_id, start.upload_id);
            assert_eq!(*concurrent_id, start.concurrent_id);
        }
        other => panic!("expected a ProcessUpload job, got {other:?}"),
    }
}

#[tokio::test]
#[ignore]
async fn changing_upload_parameters_mid_upload_rotates_the_epoch() {
    let fx = common::setup().await;
    let version = versions::create_version(&fx.db, VersionBump::Revision, "epoch rotation test")
        .await
        .expect("create version");

    let first_chunk_size = 16 * 1024_i64;
    let first_file_size = first_chunk_size * 3;
    let first_hash = common::sha256_hex(&vec![0xAAu8; first_file_size as usize]);

    let first = upload::start_upload(
        &fx.db,
        &fx.storage,
        StartUploadRequest {
            version_id: version.id,
            hash: first_hash,
            chunk_size: first_chunk_size,
            file_size: first_file_size,
        },
    )
    .await
    .expect("start first epoch");

    upload::upload_chunk(
        &fx.db,
        &fx.storage,
        &fx.queue,
        UploadChunkRequest {
            upload_id: first.upload_id,
            concurrent_id: first.concurrent_id,
            offset: 0,
            data: vec![0xAAu8; first_chunk_size as usize],
        },
    )
    .await
    .expect("upload first chunk of the first epoch");

    // Caller restarts with a different chunk size: the whole upload rotates.
    let second_chunk_size = 32 * 1024_i64;
    let second_file_size = second_chunk_size * 2;
    let second_hash = common::sha256_hex(&vec![0xBBu8; second_file_size as usize]);

    let second = upload::start_upload(
        &fx.db,
        &fx.storage,
        StartUploadRequest {
            version_id: version.id,
            hash: second_hash,
            chunk_size: second_chunk_size,
            file_size: second_file_size,
        },
    )
    .await
    .expect("start rotated epoch");

    assert_ne!(second.concurrent_id, first.concurrent_id);
    assert_eq!(second.upload_id, first.upload_id, "same Upload row, new epoch");
    assert_eq!(second.missing_ranges.len(), 1);
    assert_eq!(second.missing_ranges[0], upload::Range { start: 0, end: 1 });

    // A chunk uploaded under the old epoch is now rejected.
    let stale = upload::upload_chunk(
        &fx.db,
        &fx.storage,
        &fx.queue,
        UploadChunkRequest {
            upload_id: first.upload_id,
            concurrent_id: first.concurrent_id,
            offset: 1,
            data: vec![0xAAu8; first_chunk_size as usize],
        },
    )
    .await;
    assert!(stale.is_err());
}
