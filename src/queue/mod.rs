//! Job Queue (C5): durable FIFO of work items with retry, dedup-by-id,
//! progress.
//!
//! The distillation names a BullMQ-style queue (it references the bull-board
//! operator dashboard as an out-of-scope collaborator) backed by Redis, which
//! is already a required external dependency for the manifest cache. This
//! implements the same list+hash shape BullMQ uses: a hash per job carrying
//! payload/status/progress, a list holding the FIFO of queued job ids, and a
//! set tracking which ids are currently "live" (queued or active) so
//! `enqueue` can dedup against it.

use crate::error::{AppError, AppResult};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JobPayload {
    ProcessUpload {
        version_id: Uuid,
        upload_id: Uuid,
        concurrent_id: Uuid,
    },
    ProcessPublish {
        version_id: Uuid,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Active,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub progress: f32,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct JobQueue {
    redis: ConnectionManager,
    queue_name: String,
}

fn job_key(id: &str) -> String {
    format!("job:{id}")
}

impl JobQueue {
    pub fn new(redis: ConnectionManager, queue_name: String) -> Self {
        Self { redis, queue_name }
    }

    fn live_set(&self) -> String {
        format!("queue:{}:live", self.queue_name)
    }

    fn list_key(&self) -> String {
        format!("queue:{}:waiting", self.queue_name)
    }

    /// No-op if a live (queued or active) job with this id exists. If a
    /// failed job with this id exists it is removed first, then
    /// re-enqueued.
    pub async fn enqueue(&self, job_id: &str, payload: JobPayload) -> AppResult<()> {
        let mut conn = self.redis.clone();
        let is_live: bool = conn.sismember(self.live_set(), job_id).await.map_err(AppError::from)?;
        if is_live {
            return Ok(());
        }

        // A failed job with this id is retained for inspection; re-enqueuing
        // clears it first.
        let _: () = conn.del(job_key(job_id)).await.map_err(AppError::from)?;

        let record = JobRecord {
            id: job_id.to_string(),
            payload,
            status: JobStatus::Queued,
            progress: 0.0,
            error: None,
        };
        let serialized = serde_json::to_string(&record).map_err(|e| AppError::Internal(e.to_string()))?;

        let _: () = conn.set(job_key(job_id), serialized).await.map_err(AppError::from)?;
        let _: () = conn.sadd(self.live_set(), job_id).await.map_err(AppError::from)?;
        let _: () = conn.rpush(self.list_key(), job_id).await.map_err(AppError::from)?;
        Ok(())
    }

    /// Lease the next queued job, if any, marking it active.
    pub async fn lease_next(&self) -> AppResult<Option<JobLease>> {
        let mut conn = self.redis.clone();
        let job_id: Option<String> = conn.lpop(self.list_key(), None).await.map_err(AppError::from)?;
        let Some(job_id) = job_id else {
            return Ok(None);
        };

        let mut record = self.get_record(&job_id).await?;
        record.status = JobStatus::Active;
        self.save_record(&record).await?;

        Ok(Some(JobLease {
            queue: self.clone(),
            record,
        }))
    }

    async fn get_record(&self, job_id: &str) -> AppResult<JobRecord> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(job_key(job_id)).await.map_err(AppError::from)?;
        let raw = raw.ok_or_else(|| AppError::NotFound(format!("job {job_id} not found")))?;
        serde_json::from_str(&raw).map_err(|e| AppError::Internal(e.to_string()))
    }

    async fn save_record(&self, record: &JobRecord) -> AppResult<()> {
        let mut conn = self.redis.clone();
        let serialized = serde_json::to_string(record).map_err(|e| AppError::Internal(e.to_string()))?;
        let _: () = conn.set(job_key(&record.id), serialized).await.map_err(AppError::from)?;
        Ok(())
    }

    /// Active jobs plus the waiting (queued) list, for the operator
    /// dashboard's job listing surface.
    pub async fn list_jobs(&self) -> AppResult<Vec<JobRecord>> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn.smembers(self.live_set()).await.map_err(AppError::from)?;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(record) = self.get_record(&id).await {
                jobs.push(record);
            }
        }
        Ok(jobs)
    }
}

/// A leased job handle. Progress is a real in `[0, 100]`.
pub struct JobLease {
    queue: JobQueue,
    pub record: JobRecord,
}

impl JobLease {
    pub fn payload(&self) -> &JobPayload {
        &self.record.payload
    }

    pub async fn update_progress(&self, pct: f32) -> AppResult<()> {
        let mut conn = self.queue.redis.clone();
        let mut record = self.record.clone();
        record.progress = pct.clamp(0.0, 100.0);
        let serialized = serde_json::to_string(&record).map_err(|e| AppError::Internal(e.to_string()))?;
        let _: () = conn.set(job_key(&record.id), serialized).await.map_err(AppError::from)?;
        Ok(())
    }

    /// Removes the job entirely on completion.
    pub async fn complete(self) -> AppResult<()> {
        let mut conn = self.queue.redis.clone();
        let _: () = conn.del(job_key(&self.record.id)).await.map_err(AppError::from)?;
        let _: () = conn
            .srem(self.queue.live_set(), &self.record.id)
            .await
            .map_err(AppError::from)?;
        Ok(())
    }

    /// Retains the job for operator inspection.
    pub async fn fail(self, err: impl std::fmt::Display) -> AppResult<()> {
        let mut conn = self.queue.redis.clone();
        let mut record = self.record;
        record.status = JobStatus::Failed;
        record.error = Some(err.to_string());
        let serialized = serde_json::to_string(&record).map_err(|e| AppError::Internal(e.to_string()))?;
        let _: () = conn.set(job_key(&record.id), serialized).await.map_err(AppError::from)?;
        let _: () = conn.srem(self.queue.live_set(), &record.id).await.map_err(AppError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_payload_round_trips_through_json() {
        let payload = JobPayload::ProcessUpload {
            version_id: Uuid::new_v4(),
            upload_id: Uuid::new_v4(),
            concurrent_id: Uuid::new_v4(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: JobPayload = serde_json::from_str(&json).unwrap();
        match (payload, back) {
            (
                JobPayload::ProcessUpload { version_id: a, .. },
                JobPayload::ProcessUpload { version_id: b, .. },
            ) => assert_eq!(a, b),
            _ => panic!("variant mismatch"),
        }
    }
}
