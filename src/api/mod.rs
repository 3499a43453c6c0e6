pub mod grpc;
pub mod rest;

use crate::cache::ManifestCache;
use crate::config::Config;
use crate::db::DbPool;
use crate::queue::JobQueue;
use crate::storage::Storage;
use std::sync::Arc;

/// Shared application state handed to every request handler. The
/// DB/cache/storage/queue clients are process-singletons initialized once at
/// startup (§9 "Global state") and injected here as long-lived handles.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub storage: Arc<Storage>,
    pub queue: JobQueue,
    pub cache: ManifestCache,
    pub config: Config,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        db: DbPool,
        storage: Arc<Storage>,
        queue: JobQueue,
        cache: ManifestCache,
        config: Config,
    ) -> Self {
        Self {
            db,
            storage,
            queue,
            cache,
            config,
            http: reqwest::Client::new(),
        }
    }
}
