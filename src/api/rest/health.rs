//! Liveness/readiness endpoint (§10.6 supplement — not in the distilled
//! HTTP table, but required for deployment behind a standard orchestrator).

use crate::api::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::{http::StatusCode, Json};

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let cache_ok = state.cache.ping().await;

    let status = if db_ok && cache_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "db": db_ok,
            "cache": cache_ok,
        })),
    )
}
