//! `/api/v1/updates/manager/version/*` — the version-management group.
//! Every write path requires `update:edit`, every read path `update:view`
//! (§4.8), resolved through the external token-introspection adapter.

use crate::api::AppState;
use crate::auth::{authorize, Capability};
use crate::db::models::{Version, VersionBump};
use crate::db::versions;
use crate::error::{AppError, AppResult};
use crate::queue::JobPayload;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct VersionDocument {
    pub id: Uuid,
    pub version: String,
    pub description: String,
    pub state: &'static str,
    pub files_count: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

fn state_name(v: &Version) -> &'static str {
    match v.state() {
        crate::db::models::VersionState::Pending => "PENDING",
        crate::db::models::VersionState::Processing => "PROCESSING",
        crate::db::models::VersionState::Ready => "READY",
    }
}

impl VersionDocument {
    fn from_version(v: Version, files_count: i64) -> Self {
        Self {
            id: v.id,
            version: v.semver(),
            description: v.description.clone(),
            state: state_name(&v),
            files_count,
            created_at: v.created_at,
            updated_at: v.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    #[serde(rename = "type")]
    pub bump: i16,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub id: Uuid,
    pub version: String,
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRequest>,
) -> AppResult<Json<CreateResponse>> {
    authorize(&state.http, &state.config, &headers, Capability::Edit).await?;

    if req.description.is_empty() || req.description.len() > 256 {
        return Err(AppError::Validation(
            "description must be 1..256 characters".into(),
        ));
    }
    let bump = VersionBump::try_from(req.bump).map_err(|e| AppError::Validation(e.to_string()))?;

    let version = versions::create_version(&state.db, bump, &req.description).await?;
    Ok(Json(CreateResponse {
        id: version.id,
        version: version.semver(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub id: Uuid,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct EditResponse {
    pub success: bool,
}

pub async fn edit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EditRequest>,
) -> AppResult<Json<EditResponse>> {
    authorize(&state.http, &state.config, &headers, Capability::Edit).await?;

    if req.description.is_empty() || req.description.len() > 256 {
        return Err(AppError::Validation(
            "description must be 1..256 characters".into(),
        ));
    }
    let success = versions::edit_description(&state.db, req.id, &req.description).await?;
    Ok(Json(EditResponse { success }))
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub job_id: String,
}

pub async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ProcessRequest>,
) -> AppResult<Json<ProcessResponse>> {
    authorize(&state.http, &state.config, &headers, Capability::Edit).await?;

    let version = versions::get_version(&state.db, req.id)
        .await?
        .ok_or_else(|| AppError::NotFound("version not found".into()))?;
    if version.state() != crate::db::models::VersionState::Pending {
        return Err(AppError::Conflict(
            "version is not PENDING and cannot be (re-)published from here".into(),
        ));
    }

    let job_id = format!("version-{}", version.id);
    state
        .queue
        .enqueue(&job_id, JobPayload::ProcessPublish { version_id: version.id })
        .await?;

    Ok(Json(ProcessResponse { job_id }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
}

fn default_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub versions: Vec<VersionDocument>,
    pub total: i64,
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ListResponse>> {
    authorize(&state.http, &state.config, &headers, Capability::View).await?;

    if query.page < 0 || !(4..=50).contains(&query.size) {
        return Err(AppError::Validation(
            "page must be >= 0 and size must be in [4, 50]".into(),
        ));
    }

    let (rows, total) = versions::list_versions(&state.db, query.page, query.size).await?;
    let mut out = Vec::with_capacity(rows.len());
    for version in rows {
        let files_count = files_count_for(&state, version.id).await?;
        out.push(VersionDocument::from_version(version, files_count));
    }

    Ok(Json(ListResponse { versions: out, total }))
}

pub async fn fetch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<VersionDocument>> {
    authorize(&state.http, &state.config, &headers, Capability::View).await?;

    let version = versions::get_version(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("version not found".into()))?;
    let files_count = files_count_for(&state, version.id).await?;
    Ok(Json(VersionDocument::from_version(version, files_count)))
}

async fn files_count_for(state: &AppState, version_id: Uuid) -> AppResult<i64> {
    let all_categories: Vec<i16> = crate::db::models::Category::ALL_DESCENDING
        .iter()
        .map(|&c| c as i16)
        .collect();
    let rows = versions::files_for_versions(&state.db, &[version_id], &all_categories).await?;
    Ok(rows.len() as i64)
}

pub async fn jobs(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<serde_json::Value>> {
    authorize(&state.http, &state.config, &headers, Capability::View).await?;

    let jobs = state.queue.list_jobs().await?;
    Ok(Json(serde_json::json!({ "jobs": jobs })))
}
