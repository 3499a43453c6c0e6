//! Storage Abstraction (C1): uniform blob operations over pluggable backends.
//!
//! The backend set is a closed union — `Local`, `Aws`, `Gcp` — modeled as a
//! tagged variant with a single dispatch table (§9 "Polymorphism") rather
//! than as a trait-object hierarchy. Two independent namespaces exist: Input
//! (transient upload chunks, reassembled zips) and Output (published packed
//! files), each backed by its own `object_store::ObjectStore`.

use crate::config::{StorageConfig, StorageProvider};
use crate::error::{AppError, AppResult};
use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder};
use object_store::{ObjectStore, PutPayload};
use std::path::Path;
use std::sync::Arc;

/// Bounded fan-out for folder transfers (§4.1, §5).
const FOLDER_TRANSFER_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Input,
    Output,
}

/// A progress callback. Implementations report monotonically non-decreasing
/// values in `[0.0, 1.0]`, at least once on completion.
pub type ProgressCb<'a> = &'a (dyn Fn(f32) + Send + Sync);

fn normalize_key(key: &str) -> String {
    key.replace('\\', "/")
}

fn build_backend(cfg: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match cfg.provider {
        StorageProvider::Local => {
            let root = if cfg.subpath.is_empty() {
                cfg.bucket.clone()
            } else {
                format!("{}/{}", cfg.bucket, cfg.subpath)
            };
            std::fs::create_dir_all(&root)?;
            Ok(Arc::new(LocalFileSystem::new_with_prefix(root)?))
        }
        StorageProvider::Aws => {
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(&cfg.bucket);
            if !cfg.subpath.is_empty() {
                // object_store has no first-class "subpath" concept; callers
                // prefix every key with it instead (see `prefixed`).
            }
            builder = builder.with_allow_http(false);
            Ok(Arc::new(builder.build()?))
        }
        StorageProvider::Gcp => {
            let builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&cfg.bucket);
            Ok(Arc::new(builder.build()?))
        }
    }
}

struct BackendHandle {
    store: Arc<dyn ObjectStore>,
    subpath: String,
}

impl BackendHandle {
    fn key(&self, dst_key: &str) -> ObjectPath {
        let dst_key = normalize_key(dst_key);
        if self.subpath.is_empty() {
            ObjectPath::from(dst_key)
        } else {
            ObjectPath::from(format!("{}/{}", self.subpath.trim_matches('/'), dst_key))
        }
    }
}

/// The C1 contract: `delete_folder`, `download_file`, `download_folder`,
/// `upload_file`, `upload_buffer`, `upload_folder`, each over the Input or
/// Output namespace named by `StoreKind`.
pub struct Storage {
    input: BackendHandle,
    output: BackendHandle,
}

impl Storage {
    pub fn new(input: &StorageConfig, output: &StorageConfig) -> anyhow::Result<Self> {
        let input_subpath = if input.provider == StorageProvider::Local {
            String::new()
        } else {
            input.subpath.clone()
        };
        let output_subpath = if output.provider == StorageProvider::Local {
            String::new()
        } else {
            output.subpath.clone()
        };
        Ok(Self {
            input: BackendHandle {
                store: build_backend(input)?,
                subpath: input_subpath,
            },
            output: BackendHandle {
                store: build_backend(output)?,
                subpath: output_subpath,
            },
        })
    }

    fn handle(&self, store: StoreKind) -> &BackendHandle {
        match store {
            StoreKind::Input => &self.input,
            StoreKind::Output => &self.output,
        }
    }

    /// Idempotent recursive delete of every blob under `prefix`.
    pub async fn delete_folder(&self, store: StoreKind, prefix: &str) -> AppResult<()> {
        let handle = self.handle(store);
        let root = handle.key(prefix);
        let mut listing = handle.store.list(Some(&root));
        let mut keys = Vec::new();
        while let Some(meta) = listing.next().await {
            let meta = meta.map_err(AppError::from)?;
            keys.push(meta.location);
        }
        for key in keys {
            match handle.store.delete(&key).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(AppError::from(e)),
            }
        }
        Ok(())
    }

    /// Atomic download to a local path. On failure the partial destination
    /// is removed.
    pub async fn download_file(
        &self,
        store: StoreKind,
        src_key: &str,
        dst_path: &Path,
        progress_cb: ProgressCb<'_>,
    ) -> AppResult<()> {
        let handle = self.handle(store);
        let key = handle.key(src_key);
        let result = self.download_file_inner(handle, &key, dst_path, progress_cb).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dst_path).await;
        }
        result
    }

    async fn download_file_inner(
        &self,
        handle: &BackendHandle,
        key: &ObjectPath,
        dst_path: &Path,
        progress_cb: ProgressCb<'_>,
    ) -> AppResult<()> {
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::component("storage", format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let get_result = handle.store.get(key).await.map_err(AppError::from)?;
        let total = get_result.meta.size.max(1);
        let mut stream = get_result.into_stream();
        let tmp_path = dst_path.with_extension("tmp-download");
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| AppError::component("storage", e))?;
        let mut written: usize = 0;
        use tokio::io::AsyncWriteExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(AppError::from)?;
            written += chunk.len();
            file.write_all(&chunk).await.map_err(|e| AppError::component("storage", e))?;
            progress_cb((written as f32 / total as f32).min(1.0));
        }
        file.flush().await.map_err(|e| AppError::component("storage", e))?;
        drop(file);
        tokio::fs::rename(&tmp_path, dst_path)
            .await
            .map_err(|e| AppError::component("storage", e))?;
        progress_cb(1.0);
        Ok(())
    }

    /// Parallel download of every blob under `src_prefix` into `dst_dir`,
    /// bounded fan-out of `FOLDER_TRANSFER_CONCURRENCY`. A single failed
    /// member is fatal to the whole call.
    pub async fn download_folder(
        &self,
        store: StoreKind,
        src_prefix: &str,
        dst_dir: &Path,
        progress_cb: ProgressCb<'_>,
    ) -> AppResult<()> {
        let handle = self.handle(store);
        let root = handle.key(src_prefix);
        let mut listing = handle.store.list(Some(&root));
        let mut entries = Vec::new();
        while let Some(meta) = listing.next().await {
            entries.push(meta.map_err(AppError::from)?.location);
        }
        let total = entries.len().max(1);
        let completed = std::sync::atomic::AtomicUsize::new(0);

        stream::iter(entries.into_iter().map(|key| {
            let relative = key
                .as_ref()
                .strip_prefix(root.as_ref())
                .unwrap_or(key.as_ref())
                .trim_start_matches('/')
                .to_string();
            let dst_path = dst_dir.join(relative);
            let completed = &completed;
            async move {
                self.download_file_inner(handle, &key, &dst_path, &|_| {}).await?;
                let done = completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                progress_cb((done as f32 / total as f32).min(1.0));
                Ok::<(), AppError>(())
            }
        }))
        .buffer_unordered(FOLDER_TRANSFER_CONCURRENCY)
        .try_collect::<Vec<()>>()
        .await?;

        Ok(())
    }

    /// Single-object PUT from a local path.
    pub async fn upload_file(
        &self,
        store: StoreKind,
        src_path: &Path,
        dst_key: &str,
        progress_cb: ProgressCb<'_>,
    ) -> AppResult<()> {
        let bytes = tokio::fs::read(src_path)
            .await
            .map_err(|e| AppError::component("storage", e))?;
        self.upload_buffer(store, &bytes, dst_key, progress_cb).await
    }

    /// Single-object PUT from an in-memory buffer.
    pub async fn upload_buffer(
        &self,
        store: StoreKind,
        bytes: &[u8],
        dst_key: &str,
        progress_cb: ProgressCb<'_>,
    ) -> AppResult<()> {
        let handle = self.handle(store);
        let key = handle.key(dst_key);
        handle
            .store
            .put(&key, PutPayload::from(bytes.to_vec()))
            .await
            .map_err(AppError::from)?;
        progress_cb(1.0);
        Ok(())
    }

    /// Parallel upload of every file under `src_dir` to `dst_prefix`, same
    /// bounded fan-out as `download_folder`.
    pub async fn upload_folder(
        &self,
        store: StoreKind,
        src_dir: &Path,
        dst_prefix: &str,
        progress_cb: ProgressCb<'_>,
    ) -> AppResult<()> {
        let handle = self.handle(store);
        let entries: Vec<_> = walkdir::WalkDir::new(src_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .collect();
        let total = entries.len().max(1);
        let completed = std::sync::atomic::AtomicUsize::new(0);
        let dst_prefix = dst_prefix.trim_end_matches('/');

        stream::iter(entries.into_iter().map(|entry| {
            let path = entry.path().to_path_buf();
            let relative = path
                .strip_prefix(src_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            let dst_key = format!("{dst_prefix}/{relative}");
            let completed = &completed;
            async move {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| AppError::component("storage", e))?;
                let key = handle.key(&dst_key);
                handle
                    .store
                    .put(&key, PutPayload::from(bytes))
                    .await
                    .map_err(AppError::from)?;
                let done = completed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                progress_cb((done as f32 / total as f32).min(1.0));
                Ok::<(), AppError>(())
            }
        }))
        .buffer_unordered(FOLDER_TRANSFER_CONCURRENCY)
        .try_collect::<Vec<()>>()
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StorageConfig, StorageProvider};

    fn local_cfg(path: &Path) -> StorageConfig {
        StorageConfig {
            provider: StorageProvider::Local,
            bucket: path.to_string_lossy().to_string(),
            subpath: String::new(),
        }
    }

    #[tokio::test]
    async fn upload_then_download_roundtrips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(&local_cfg(dir.path()), &local_cfg(dir.path())).unwrap();

        storage
            .upload_buffer(StoreKind::Input, b"hello world", "a/b/c.data", &|_| {})
            .await
            .unwrap();

        let dst = dir.path().join("downloaded.data");
        storage
            .download_file(StoreKind::Input, "a/b/c.data", &dst, &|_| {})
            .await
            .unwrap();

        let content = std::fs::read(&dst).unwrap();
        assert_eq!(content, b"hello world");
    }

    #[tokio::test]
    async fn delete_folder_removes_every_blob_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(&local_cfg(dir.path()), &local_cfg(dir.path())).unwrap();

        storage
            .upload_buffer(StoreKind::Input, b"1", "up/00000000.data", &|_| {})
            .await
            .unwrap();
        storage
            .upload_buffer(StoreKind::Input, b"2", "up/00000001.data", &|_| {})
            .await
            .unwrap();

        storage.delete_folder(StoreKind::Input, "up/").await.unwrap();

        let dst = dir.path().join("should-not-exist.data");
        let result = storage
            .download_file(StoreKind::Input, "up/00000000.data", &dst, &|_| {})
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn upload_folder_then_download_folder_roundtrips_tree() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("nested")).unwrap();
        std::fs::write(src.path().join("a.txt"), b"a").unwrap();
        std::fs::write(src.path().join("nested/b.txt"), b"b").unwrap();

        let store_dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(&local_cfg(store_dir.path()), &local_cfg(store_dir.path())).unwrap();

        storage
            .upload_folder(StoreKind::Output, src.path(), "publish/V1", &|_| {})
            .await
            .unwrap();

        let dst = tempfile::tempdir().unwrap();
        storage
            .download_folder(StoreKind::Output, "publish/V1", dst.path(), &|_| {})
            .await
            .unwrap();

        assert_eq!(std::fs::read(dst.path().join("a.txt")).unwrap(), b"a");
        assert_eq!(std::fs::read(dst.path().join("nested/b.txt")).unwrap(), b"b");
    }
}
