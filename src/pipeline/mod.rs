//! Update Pipeline Worker (C6): reassembly, extraction, classification,
//! compression, publish transaction.
//!
//! Executes one job at a time per worker instance; the queue guarantees
//! at-most-one active lease per `job_id` (§4.6, §5).

pub mod category;

use crate::cache::ManifestCache;
use crate::db::models::{UploadState, VersionState};
use crate::db::{uploads, versions, DbPool};
use crate::error::{AppError, AppResult};
use crate::queue::{JobLease, JobPayload, JobQueue};
use crate::storage::{StoreKind, Storage};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct Worker {
    pub db: DbPool,
    pub storage: Arc<Storage>,
    pub queue: JobQueue,
    pub cache: ManifestCache,
}

impl Worker {
    /// Runs forever, leasing and executing jobs one at a time. Callers spawn
    /// one of these per worker instance; `UPDATES_QUEUE_PROCESS` controls how
    /// many run in a given process.
    pub async fn run(self) {
        loop {
            match self.queue.lease_next().await {
                Ok(Some(lease)) => {
                    let job_id = lease.record.id.clone();
                    if let Err(err) = self.execute(lease).await {
                        tracing::error!(job_id, "pipeline job failed: {err}");
                    }
                }
                Ok(None) => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(err) => {
                    tracing::warn!("failed to lease next job: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    async fn execute(&self, lease: JobLease) -> AppResult<()> {
        match lease.payload().clone() {
            JobPayload::ProcessUpload {
                version_id,
                upload_id,
                concurrent_id,
            } => {
                let result = self
                    .process_upload(version_id, upload_id, concurrent_id, &lease)
                    .await;
                match result {
                    Ok(()) => lease.complete().await,
                    Err(err) => lease.fail(err).await,
                }
            }
            JobPayload::ProcessPublish { version_id } => {
                let result = self.process_publish(version_id, &lease).await;
                match result {
                    Ok(()) => lease.complete().await,
                    Err(err) => lease.fail(err).await,
                }
            }
        }
    }

    /// §4.6 ProcessUpload.
    async fn process_upload(
        &self,
        version_id: Uuid,
        upload_id: Uuid,
        concurrent_id: Uuid,
        lease: &JobLease,
    ) -> AppResult<()> {
        let upload = uploads::get(&self.db, upload_id)
            .await?
            .ok_or_else(|| AppError::NotFound("upload not found".into()))?;
        if upload.version_id != version_id || upload.concurrent_id != concurrent_id {
            return Err(AppError::Conflict(
                "upload no longer matches the requested epoch".into(),
            ));
        }

        if !uploads::cas_state(&self.db, upload.id, UploadState::Pending, UploadState::Processing).await? {
            return Err(AppError::Conflict(
                "upload was not in PENDING state at reassembly time".into(),
            ));
        }

        let scratch = tempfile::tempdir().map_err(|e| AppError::component("pipeline", e))?;
        let result: AppResult<()> = async {
            let chunk_prefix = format!("{}/{}/", upload.id, upload.hash);
            self.storage
                .download_folder(StoreKind::Input, &chunk_prefix, scratch.path(), &|pct| {
                    let _ = lease;
                    tracing::debug!("download chunks progress: {:.0}%", pct * 50.0);
                })
                .await?;
            lease.update_progress(50.0).await?;

            let assembled_path = scratch.path().join("update.zip");
            concatenate_chunks(scratch.path(), &assembled_path, upload.chunks_count).await?;
            lease.update_progress(90.0).await?;

            let digest = sha256_file(&assembled_path).await?;
            if digest != upload.hash {
                return Err(AppError::Integrity(format!(
                    "reassembled hash {digest} does not match declared hash {}",
                    upload.hash
                )));
            }

            let dst_key = format!("{}.zip", upload.version_id.to_string().to_uppercase());
            self.storage
                .upload_file(StoreKind::Input, &assembled_path, &dst_key, &|_| {})
                .await?;
            lease.update_progress(100.0).await?;
            Ok(())
        }
        .await;

        result?;

        if !uploads::cas_state(&self.db, upload.id, UploadState::Processing, UploadState::Ready).await? {
            return Err(AppError::Conflict("upload state advanced unexpectedly".into()));
        }

        self.storage
            .delete_folder(StoreKind::Input, &format!("{}/{}/", upload.id, upload.hash))
            .await?;
        uploads::delete_chunks(&self.db, upload.id, upload.concurrent_id).await?;

        Ok(())
    }

    /// §4.6 ProcessPublish.
    async fn process_publish(&self, version_id: Uuid, lease: &JobLease) -> AppResult<()> {
        let version = versions::get_version(&self.db, version_id)
            .await?
            .ok_or_else(|| AppError::NotFound("version not found".into()))?;
        if version.state() == VersionState::Ready {
            return Err(AppError::Conflict("version is already READY".into()));
        }

        if !versions::cas_state(&self.db, version_id, VersionState::Pending, VersionState::Processing).await?
        {
            return Err(AppError::Conflict(
                "version was not in PENDING state at publish time".into(),
            ));
        }

        let scratch = tempfile::tempdir().map_err(|e| AppError::component("pipeline", e))?;
        let decompressed = scratch.path().join("decompressed");
        let processed = scratch.path().join("processed");
        tokio::fs::create_dir_all(&decompressed)
            .await
            .map_err(|e| AppError::component("pipeline", e))?;
        tokio::fs::create_dir_all(&processed)
            .await
            .map_err(|e| AppError::component("pipeline", e))?;

        let src_key = format!("{}.zip", version_id.to_string().to_uppercase());
        let zip_path = scratch.path().join("update.zip");
        self.storage
            .download_file(StoreKind::Input, &src_key, &zip_path, &|pct| {
                tracing::debug!("download zip progress: {:.0}%", pct * 20.0);
            })
            .await?;
        lease.update_progress(20.0).await?;

        let entry_count = extract_zip(&zip_path, &decompressed)?;
        let _ = entry_count;
        lease.update_progress(25.0).await?;

        let files = compress_and_classify(&decompressed, &processed, lease).await?;
        if files.is_empty() {
            return Err(AppError::Validation("empty update folder".into()));
        }
        lease.update_progress(50.0).await?;

        self.storage
            .upload_folder(StoreKind::Output, &processed, &format!("publish/{}", version_id.to_string().to_uppercase()), &|pct| {
                tracing::debug!("publish upload progress: {:.0}%", 50.0 + pct * 40.0);
            })
            .await?;
        lease.update_progress(90.0).await?;

        let new_files: Vec<versions::NewUpdateFile> = files
            .into_iter()
            .map(|f| versions::NewUpdateFile {
                category: f.category as i16,
                file_name: f.file_name,
                extension: ".eupdz".to_string(),
                local_path: f.local_path,
                packed_size: f.packed_size,
                file_size: f.file_size,
                crc32: f.crc32,
            })
            .collect();

        let committed = versions::publish_files_and_ready(&self.db, version_id, &new_files).await?;
        if !committed {
            return Err(AppError::Conflict(
                "version moved out of PROCESSING before the publish transaction committed".into(),
            ));
        }
        lease.update_progress(100.0).await?;

        Ok(())
    }
}

/// Concatenate chunk files in offset order. Filenames are zero-padded so a
/// lexical sort yields numerical order (§4.6 step 3).
async fn concatenate_chunks(scratch_dir: &Path, dst: &Path, chunks_count: i32) -> AppResult<()> {
    let mut names: Vec<String> = (0..chunks_count).map(|i| format!("{i:08}.data")).collect();
    names.sort();

    let mut out = tokio::fs::File::create(dst)
        .await
        .map_err(|e| AppError::component("pipeline", e))?;
    use tokio::io::AsyncWriteExt;
    for name in names {
        let chunk_path = scratch_dir.join(&name);
        let bytes = tokio::fs::read(&chunk_path)
            .await
            .map_err(|e| AppError::component("pipeline", format!("missing chunk {name}: {e}")))?;
        out.write_all(&bytes)
            .await
            .map_err(|e| AppError::component("pipeline", e))?;
    }
    out.flush().await.map_err(|e| AppError::component("pipeline", e))?;
    Ok(())
}

async fn sha256_file(path: &Path) -> AppResult<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::component("pipeline", e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Decompress the archive entirely into `dst_dir`. Returns the number of
/// file entries extracted.
fn extract_zip(zip_path: &Path, dst_dir: &Path) -> AppResult<usize> {
    let file = std::fs::File::open(zip_path).map_err(|e| AppError::component("pipeline", e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| AppError::component("pipeline", e))?;

    let mut count = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| AppError::component("pipeline", e))?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dst_dir.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| AppError::component("pipeline", e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::component("pipeline", e))?;
        }
        let mut out_file = std::fs::File::create(&out_path).map_err(|e| AppError::component("pipeline", e))?;
        std::io::copy(&mut entry, &mut out_file).map_err(|e| AppError::component("pipeline", e))?;
        count += 1;
    }
    Ok(count)
}

struct PackedFile {
    category: crate::db::models::Category,
    local_path: String,
    file_name: String,
    packed_size: i64,
    file_size: i64,
    crc32: String,
}

/// §4.6 step 6: classify, CRC, zlib-deflate level 9, name, write. Runs
/// single-threaded within the job; reports progress every 100 files and once
/// at the end (progress 20-50 of the publish job, linear in processed/total).
async fn compress_and_classify(
    decompressed_dir: &Path,
    processed_dir: &Path,
    lease: &JobLease,
) -> AppResult<Vec<PackedFile>> {
    let entries: Vec<_> = walkdir::WalkDir::new(decompressed_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .collect();
    let total = entries.len().max(1);
    let mut files = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let relative = entry
            .path()
            .strip_prefix(decompressed_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        let Some((category, local_path)) = category::classify(&relative) else {
            continue;
        };

        let bytes = tokio::fs::read(entry.path())
            .await
            .map_err(|e| AppError::component("pipeline", e))?;

        let mut crc = crc32fast::Hasher::new();
        crc.update(&bytes);
        let crc32_hex = format!("{:08x}", crc.finalize());

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(9));
        encoder
            .write_all(&bytes)
            .map_err(|e| AppError::component("pipeline", e))?;
        let compressed = encoder.finish().map_err(|e| AppError::component("pipeline", e))?;

        let file_name = format!("{}_{}", Uuid::new_v4().simple(), crc32_hex).to_uppercase();
        let out_path = processed_dir.join(category.folder());
        tokio::fs::create_dir_all(&out_path)
            .await
            .map_err(|e| AppError::component("pipeline", e))?;
        let out_file = out_path.join(format!("{file_name}.eupdz"));
        tokio::fs::write(&out_file, &compressed)
            .await
            .map_err(|e| AppError::component("pipeline", e))?;

        files.push(PackedFile {
            category,
            local_path,
            file_name,
            packed_size: compressed.len() as i64,
            file_size: bytes.len() as i64,
            crc32: crc32_hex,
        });

        if (i + 1) % 100 == 0 || i + 1 == entries.len() {
            let pct = 20.0 + 30.0 * ((i + 1) as f32 / total as f32);
            lease.update_progress(pct).await?;
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[tokio::test]
    async fn concatenate_orders_chunks_numerically_by_zero_padded_name() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("00000002.data"), b"C").await.unwrap();
        tokio::fs::write(dir.path().join("00000000.data"), b"A").await.unwrap();
        tokio::fs::write(dir.path().join("00000001.data"), b"B").await.unwrap();

        let dst = dir.path().join("assembled.bin");
        concatenate_chunks(dir.path(), &dst, 3).await.unwrap();

        let content = tokio::fs::read(&dst).await.unwrap();
        assert_eq!(content, b"ABC");
    }

    #[tokio::test]
    async fn sha256_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        tokio::fs::write(&path, b"").await.unwrap();
        let digest = sha256_file(&path).await.unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn zlib_deflate_then_inflate_round_trips_bytes() {
        let original = b"hello, update distribution world!".repeat(10);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(9));
        encoder.write_all(&original).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decoder = flate2::read::ZlibDecoder::new(&compressed[..]);
        let mut restored = Vec::new();
        decoder.read_to_end(&mut restored).unwrap();

        assert_eq!(restored, original);
    }
}
