//! Manifest Cache (C3): keyed byte-store with TTL for computed manifests.
//!
//! Keys are `update-{from}-{to}-{os}-{texture}`; values are the serialized
//! manifest. TTL is 8 hours. Reads never block writes; a miss is silent. A
//! successful compute always writes back regardless of concurrent writers,
//! since all writers compute the same value under the §3 invariants
//! (last-write-wins is acceptable).

use crate::error::{AppError, AppResult};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

/// §4.3: TTL for computed manifests.
pub const MANIFEST_TTL_SECONDS: u64 = 8 * 60 * 60;

#[derive(Clone)]
pub struct ManifestCache {
    redis: ConnectionManager,
}

impl ManifestCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub fn key(source: &str, target: &str, os: i32, texture: i32) -> String {
        format!("update-{source}-{target}-{os}-{texture}")
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(key).await.map_err(AppError::from)?;
        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw).map_err(|e| AppError::Internal(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let mut conn = self.redis.clone();
        let serialized = serde_json::to_string(value).map_err(|e| AppError::Internal(e.to_string()))?;
        let _: () = conn
            .set_ex(key, serialized, MANIFEST_TTL_SECONDS)
            .await
            .map_err(AppError::from)?;
        Ok(())
    }

    /// Liveness check for `/healthz`.
    pub async fn ping(&self) -> bool {
        let mut conn = self.redis.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_matches_the_documented_shape() {
        let key = ManifestCache::key("0.0.0", "1.2.3", 0, 2);
        assert_eq!(key, "update-0.0.0-1.2.3-0-2");
    }
}
