//! `GET /api/v1/updates/list/:version/:os/:texture/:offset` — unauthenticated
//! (§6). `offset` has no counterpart in the C7 resolver contract (§4.7) and is
//! not named by any other part of the distillation; it is accepted and
//! validated as a non-negative integer for path-shape compatibility with the
//! reference route but does not affect resolution (see DESIGN.md).

use crate::api::AppState;
use crate::db::models::{Os, Texture};
use crate::error::{AppError, AppResult};
use crate::manifest;
use axum::extract::{Path, State};
use axum::Json;
use std::sync::OnceLock;

fn version_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"^\d{1,2}\.\d{1,3}\.\d{1,5}$").unwrap())
}

fn parse_version(raw: &str) -> AppResult<(i32, i32, i32)> {
    if !version_pattern().is_match(raw) {
        return Err(AppError::Validation(
            "version must match \\d{1,2}.\\d{1,3}.\\d{1,5}".into(),
        ));
    }
    let mut parts = raw.split('.');
    let major = parts.next().unwrap().parse().unwrap();
    let minor = parts.next().unwrap().parse().unwrap();
    let revision = parts.next().unwrap().parse().unwrap();
    Ok((major, minor, revision))
}

pub async fn resolve(
    State(state): State<AppState>,
    Path((version, os, texture, offset)): Path<(String, i32, i32, i32)>,
) -> AppResult<Json<manifest::Manifest>> {
    let (major, minor, revision) = parse_version(&version)?;

    let os = Os::try_from(os).map_err(|e| AppError::Validation(e.to_string()))?;
    let texture = Texture::try_from(texture).map_err(|e| AppError::Validation(e.to_string()))?;
    if offset < 0 {
        return Err(AppError::Validation("offset must be non-negative".into()));
    }

    let manifest = manifest::resolve(&state.db, &state.cache, major, minor, revision, os, texture).await?;
    Ok(Json(manifest))
}
