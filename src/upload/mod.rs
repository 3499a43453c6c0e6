//! Upload Coordinator (C4): chunked-upload state machine, epoch resolution,
//! range tracking.

use crate::db::models::{
    chunks_count, UploadState, MAX_CHUNK_SIZE, MAX_FILE_SIZE, MIN_CHUNK_SIZE, MIN_FILE_SIZE,
};
use crate::db::{uploads, versions, DbPool};
use crate::error::{AppError, AppResult};
use crate::queue::{JobPayload, JobQueue};
use crate::storage::{Storage, StoreKind};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i32,
    pub end: i32,
}

/// Minimal list of maximal contiguous intervals of `{0..N-1} \ S`, sorted
/// ascending. `S` need not be sorted or deduplicated on input.
pub fn missing_ranges(present: &[i32], n: i32) -> Vec<Range> {
    if n <= 0 {
        return Vec::new();
    }
    let mut present: Vec<i32> = present.iter().copied().filter(|&o| o >= 0 && o < n).collect();
    present.sort_unstable();
    present.dedup();

    let mut ranges = Vec::new();
    let mut cursor = 0i32;
    for offset in present {
        if offset > cursor {
            ranges.push(Range {
                start: cursor,
                end: offset - 1,
            });
        }
        cursor = offset + 1;
    }
    if cursor <= n - 1 {
        ranges.push(Range {
            start: cursor,
            end: n - 1,
        });
    }
    ranges
}

pub struct StartUploadRequest {
    pub version_id: Uuid,
    pub hash: String,
    pub chunk_size: i64,
    pub file_size: i64,
}

pub struct StartUploadResponse {
    pub upload_id: Uuid,
    pub concurrent_id: Uuid,
    pub missing_ranges: Vec<Range>,
}

fn validate_hash(hash: &str) -> AppResult<()> {
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
        return Err(AppError::Validation(
            "hash must be 64 lowercase hex characters".into(),
        ));
    }
    Ok(())
}

fn validate_sizes(chunk_size: i64, file_size: i64) -> AppResult<()> {
    if !chunk_size.is_power_of_two() || !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
        return Err(AppError::Validation(format!(
            "chunk_size must be a power of two in [{MIN_CHUNK_SIZE}, {MAX_CHUNK_SIZE}]"
        )));
    }
    if !(MIN_FILE_SIZE..=MAX_FILE_SIZE).contains(&file_size) {
        return Err(AppError::Validation(format!(
            "file_size must be in [{MIN_FILE_SIZE}, {MAX_FILE_SIZE}]"
        )));
    }
    Ok(())
}

pub async fn start_upload(
    pool: &DbPool,
    storage: &Storage,
    req: StartUploadRequest,
) -> AppResult<StartUploadResponse> {
    validate_hash(&req.hash)?;
    validate_sizes(req.chunk_size, req.file_size)?;

    if versions::get_version(pool, req.version_id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("version not found".into()));
    }

    let outcome = uploads::start_upload(pool, req.version_id, &req.hash, req.chunk_size, req.file_size)
        .await?;

    if outcome.rotated() {
        let upload = outcome.upload();
        // The epoch just rotated: old blobs under the previous hash prefix
        // are orphaned. Best-effort cleanup; a dangling prefix is harmless
        // garbage, never a correctness hazard, so failures here are logged
        // and swallowed rather than propagated to the caller.
        if let Err(err) = storage
            .delete_folder(StoreKind::Input, &format!("{}/", upload.id))
            .await
        {
            tracing::warn!("failed to clean up rotated upload prefix: {err}");
        }
    }

    let upload = outcome.upload();
    let present = uploads::stored_offsets(pool, upload.id, upload.concurrent_id).await?;
    let ranges = missing_ranges(&present, upload.chunks_count);

    Ok(StartUploadResponse {
        upload_id: upload.id,
        concurrent_id: upload.concurrent_id,
        missing_ranges: ranges,
    })
}

pub struct UploadChunkRequest {
    pub upload_id: Uuid,
    pub concurrent_id: Uuid,
    pub offset: i32,
    pub data: Vec<u8>,
}

pub struct UploadChunkResponse {
    pub finished: bool,
}

pub async fn upload_chunk(
    pool: &DbPool,
    storage: &Storage,
    queue: &JobQueue,
    req: UploadChunkRequest,
) -> AppResult<UploadChunkResponse> {
    let upload = uploads::get(pool, req.upload_id)
        .await?
        .ok_or_else(|| AppError::NotFound("upload not found".into()))?;

    if upload.concurrent_id != req.concurrent_id {
        return Err(AppError::Conflict(
            "concurrent_id does not match current epoch".into(),
        ));
    }
    if req.offset < 0 || req.offset >= upload.chunks_count {
        return Err(AppError::Validation("offset out of range".into()));
    }

    let expected_len = if req.offset == upload.chunks_count - 1 {
        upload.file_size - upload.chunk_size as i64 * (upload.chunks_count as i64 - 1)
    } else {
        upload.chunk_size as i64
    };
    if req.data.len() as i64 != expected_len {
        return Err(AppError::Validation(format!(
            "chunk {} expected {} bytes, got {}",
            req.offset,
            expected_len,
            req.data.len()
        )));
    }

    let key = format!("{}/{}/{:08}.data", upload.id, upload.hash, req.offset);
    storage
        .upload_buffer(StoreKind::Input, &req.data, &key, |_| {})
        .await
        .map_err(AppError::from)?;

    uploads::upsert_chunk(pool, upload.id, upload.concurrent_id, req.offset, req.data.len() as i32)
        .await?;

    let count = uploads::count_chunks(pool, upload.id, upload.concurrent_id).await?;
    let finished = count == upload.chunks_count as i64;

    if finished
        && uploads::cas_state(pool, upload.id, UploadState::None, UploadState::Pending).await?
    {
        let job_id = format!(
            "version-{}-{}-{}",
            upload.version_id, upload.id, upload.concurrent_id
        );
        queue
            .enqueue(
                &job_id,
                JobPayload::ProcessUpload {
                    version_id: upload.version_id,
                    upload_id: upload.id,
                    concurrent_id: upload.concurrent_id,
                },
            )
            .await?;
    }

    Ok(UploadChunkResponse { finished })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_present_covers_whole_range() {
        let ranges = missing_ranges(&[], 5);
        assert_eq!(ranges, vec![Range { start: 0, end: 4 }]);
    }

    #[test]
    fn full_present_leaves_nothing_missing() {
        let ranges = missing_ranges(&[0, 1, 2], 3);
        assert!(ranges.is_empty());
    }

    #[test]
    fn holes_produce_multiple_ranges() {
        let ranges = missing_ranges(&[0, 2, 5], 7);
        assert_eq!(
            ranges,
            vec![
                Range { start: 1, end: 1 },
                Range { start: 3, end: 4 },
                Range { start: 6, end: 6 },
            ]
        );
    }

    #[test]
    fn unsorted_and_duplicated_input_is_normalized() {
        let ranges = missing_ranges(&[2, 0, 0, 2], 3);
        assert_eq!(ranges, vec![Range { start: 1, end: 1 }]);
    }

    #[test]
    fn missing_ranges_is_inverse_of_fill() {
        let n = 20;
        let present: Vec<i32> = vec![0, 1, 2, 5, 6, 10, 19];
        let ranges = missing_ranges(&present, n);

        let mut filled: std::collections::BTreeSet<i32> = present.iter().copied().collect();
        for r in &ranges {
            for o in r.start..=r.end {
                filled.insert(o);
            }
        }
        let all: std::collections::BTreeSet<i32> = (0..n).collect();
        assert_eq!(filled, all);
    }

    #[test]
    fn single_chunk_file_has_no_missing_after_upload() {
        let ranges = missing_ranges(&[0], 1);
        assert!(ranges.is_empty());
    }

    #[test]
    fn chunks_count_handles_exact_and_remainder_sizes() {
        assert_eq!(chunks_count(48 * 1024, 16 * 1024), 3);
        assert_eq!(chunks_count(48 * 1024 + 1, 16 * 1024), 4);
        assert_eq!(chunks_count(1, 16 * 1024), 1);
    }
}
