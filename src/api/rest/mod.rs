//! REST API module (C8 HTTP transport, §6).
//!
//! Organized into domain-specific submodules for maintainability.

mod health;
mod manifest;
mod servers;
mod versions;

use crate::api::AppState;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/api/v1/updates/servers/list", get(servers::list))
        .route(
            "/api/v1/updates/list/:version/:os/:texture/:offset",
            get(manifest::resolve),
        )
        .route(
            "/api/v1/updates/manager/version/create",
            post(versions::create),
        )
        .route(
            "/api/v1/updates/manager/version/edit",
            post(versions::edit),
        )
        .route(
            "/api/v1/updates/manager/version/process",
            put(versions::process),
        )
        .route(
            "/api/v1/updates/manager/version/list",
            get(versions::list),
        )
        .route(
            "/api/v1/updates/manager/version/fetch/:id",
            get(versions::fetch),
        )
        .route(
            "/api/v1/updates/manager/version/jobs",
            get(versions::jobs),
        )
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let cors_origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    tracing::info!("CORS allowed origins: {:?}", cors_origins);

    let cors = CorsLayer::new()
        .allow_origin(cors_origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
        .expose_headers(vec![header::HeaderName::from_static("x-request-id")]);

    // Update ZIPs arrive over gRPC chunked upload, not HTTP; 8MiB is enough
    // headroom for the JSON bodies this surface actually accepts.
    let body_limit = DefaultBodyLimit::max(8 * 1024 * 1024);

    let x_request_id = header::HeaderName::from_static("x-request-id");

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().include_headers(true).level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let app = routes()
        .layer(cors)
        .layer(body_limit)
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(trace_layer)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        },
    }
}
