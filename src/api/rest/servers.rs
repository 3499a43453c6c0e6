//! `GET /api/v1/updates/servers/list` — unauthenticated.

use crate::api::AppState;
use crate::db::servers;
use crate::error::AppResult;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

pub async fn list(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let urls = servers::list_server_urls(&state.db).await.map_err(crate::error::AppError::from)?;
    Ok(Json(json!({ "servers": urls })))
}
