//! gRPC transport (C8): the `UpdateService` surface mirroring the HTTP
//! contracts of §6, routed through the same C4/C5/C6/C7 calls and the same
//! `AppError` taxonomy (§7, §10.3) so the two transports never disagree on
//! what a given failure means to a caller.

use crate::api::AppState;
use crate::auth::{authorize_grpc, Capability};
use crate::db::models::{Category, Version, VersionState};
use crate::db::versions;
use crate::error::AppError;
use crate::queue::JobPayload;
use crate::upload::{self, StartUploadRequest, UploadChunkRequest};
use std::net::SocketAddr;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use uuid::Uuid;

pub mod proto {
    tonic::include_proto!("eupdate.v1");
}

use proto::update_service_server::{UpdateService, UpdateServiceServer};
use proto::*;

pub struct UpdateServiceImpl {
    state: AppState,
}

impl UpdateServiceImpl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    async fn require(&self, md: &tonic::metadata::MetadataMap, cap: Capability) -> Result<(), Status> {
        authorize_grpc(&self.state.http, &self.state.config, md, cap)
            .await
            .map_err(Status::from)
    }
}

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(raw).map_err(|_| Status::invalid_argument(format!("malformed {field}")))
}

fn version_state_name(state: VersionState) -> &'static str {
    match state {
        VersionState::Pending => "PENDING",
        VersionState::Processing => "PROCESSING",
        VersionState::Ready => "READY",
    }
}

fn upload_state_name(state: crate::db::models::UploadState) -> &'static str {
    use crate::db::models::UploadState;
    match state {
        UploadState::None => "NONE",
        UploadState::Pending => "PENDING",
        UploadState::Processing => "PROCESSING",
        UploadState::Ready => "READY",
    }
}

async fn files_count(state: &AppState, version_id: Uuid) -> Result<i64, Status> {
    let all_categories: Vec<i16> = Category::ALL_DESCENDING.iter().map(|&c| c as i16).collect();
    let rows = versions::files_for_versions(&state.db, &[version_id], &all_categories)
        .await
        .map_err(AppError::from)?;
    Ok(rows.len() as i64)
}

async fn to_message(state: &AppState, v: Version) -> Result<VersionMessage, Status> {
    let count = files_count(state, v.id).await?;
    Ok(VersionMessage {
        id: v.id.to_string(),
        version: v.semver(),
        description: v.description.clone(),
        state: version_state_name(v.state()).to_string(),
        files_count: count,
        created_at: v.created_at.to_rfc3339(),
        updated_at: v.updated_at.to_rfc3339(),
    })
}

#[tonic::async_trait]
impl UpdateService for UpdateServiceImpl {
    async fn create_version(
        &self,
        request: Request<CreateVersionRequest>,
    ) -> Result<Response<CreateVersionResponse>, Status> {
        self.require(request.metadata(), Capability::Edit).await?;
        let req = request.into_inner();

        if req.description.is_empty() || req.description.len() > 256 {
            return Err(Status::invalid_argument("description must be 1..256 characters"));
        }
        let bump = crate::db::models::VersionBump::try_from(req.r#type as i16)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let version = versions::create_version(&self.state.db, bump, &req.description)
            .await
            .map_err(AppError::from)?;

        Ok(Response::new(CreateVersionResponse {
            id: version.id.to_string(),
            version: version.semver(),
        }))
    }

    async fn edit_version(
        &self,
        request: Request<EditVersionRequest>,
    ) -> Result<Response<EditVersionResponse>, Status> {
        self.require(request.metadata(), Capability::Edit).await?;
        let req = request.into_inner();

        if req.description.is_empty() || req.description.len() > 256 {
            return Err(Status::invalid_argument("description must be 1..256 characters"));
        }
        let id = parse_uuid(&req.id, "id")?;

        let success = versions::edit_description(&self.state.db, id, &req.description)
            .await
            .map_err(AppError::from)?;

        Ok(Response::new(EditVersionResponse { success }))
    }

    async fn fetch_version(
        &self,
        request: Request<FetchVersionRequest>,
    ) -> Result<Response<VersionMessage>, Status> {
        self.require(request.metadata(), Capability::View).await?;
        let id = parse_uuid(&request.into_inner().id, "id")?;

        let version = versions::get_version(&self.state.db, id)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| Status::from(AppError::NotFound("version not found".into())))?;

        Ok(Response::new(to_message(&self.state, version).await?))
    }

    async fn list_versions(
        &self,
        request: Request<ListVersionsRequest>,
    ) -> Result<Response<ListVersionsResponse>, Status> {
        self.require(request.metadata(), Capability::View).await?;
        let req = request.into_inner();

        if req.page < 0 || !(4..=50).contains(&req.size) {
            return Err(Status::invalid_argument("page must be >= 0 and size must be in [4, 50]"));
        }

        let (rows, total) = versions::list_versions(&self.state.db, req.page, req.size)
            .await
            .map_err(AppError::from)?;

        let mut messages = Vec::with_capacity(rows.len());
        for v in rows {
            messages.push(to_message(&self.state, v).await?);
        }

        Ok(Response::new(ListVersionsResponse {
            versions: messages,
            total,
        }))
    }

    async fn fetch_uploads(
        &self,
        request: Request<FetchUploadsRequest>,
    ) -> Result<Response<FetchUploadsResponse>, Status> {
        self.require(request.metadata(), Capability::View).await?;
        let version_id = parse_uuid(&request.into_inner().version_id, "version_id")?;

        // At most one Upload row per version_id (§3 Upload invariant); the
        // RPC returns it as a singleton list to mirror the reference schema.
        let upload = crate::db::uploads::get_by_version(&self.state.db, version_id)
            .await
            .map_err(AppError::from)?;

        let uploads = upload
            .into_iter()
            .map(|u| UploadMessage {
                id: u.id.to_string(),
                version_id: u.version_id.to_string(),
                concurrent_id: u.concurrent_id.to_string(),
                hash: u.hash.clone(),
                chunk_size: u.chunk_size,
                file_size: u.file_size,
                chunks_count: u.chunks_count,
                state: upload_state_name(u.state()).to_string(),
            })
            .collect();

        Ok(Response::new(FetchUploadsResponse { uploads }))
    }

    async fn start_upload_version(
        &self,
        request: Request<StartUploadVersionRequest>,
    ) -> Result<Response<StartUploadVersionResponse>, Status> {
        self.require(request.metadata(), Capability::Edit).await?;
        let req = request.into_inner();
        let version_id = parse_uuid(&req.version_id, "version_id")?;

        let response = upload::start_upload(
            &self.state.db,
            &self.state.storage,
            StartUploadRequest {
                version_id,
                hash: req.hash,
                chunk_size: req.chunk_size,
                file_size: req.file_size,
            },
        )
        .await
        .map_err(Status::from)?;

        Ok(Response::new(StartUploadVersionResponse {
            upload_id: response.upload_id.to_string(),
            concurrent_id: response.concurrent_id.to_string(),
            missing_ranges: response
                .missing_ranges
                .into_iter()
                .map(|r| ChunkRange { start: r.start, end: r.end })
                .collect(),
        }))
    }

    async fn upload_version_chunk(
        &self,
        request: Request<UploadVersionChunkRequest>,
    ) -> Result<Response<UploadVersionChunkResponse>, Status> {
        self.require(request.metadata(), Capability::Edit).await?;
        let req = request.into_inner();
        let upload_id = parse_uuid(&req.upload_id, "upload_id")?;
        let concurrent_id = parse_uuid(&req.concurrent_id, "concurrent_id")?;

        let response = upload::upload_chunk(
            &self.state.db,
            &self.state.storage,
            &self.state.queue,
            UploadChunkRequest {
                upload_id,
                concurrent_id,
                offset: req.offset,
                data: req.data,
            },
        )
        .await
        .map_err(Status::from)?;

        Ok(Response::new(UploadVersionChunkResponse {
            finished: response.finished,
        }))
    }

    async fn process_version(
        &self,
        request: Request<ProcessVersionRequest>,
    ) -> Result<Response<ProcessVersionResponse>, Status> {
        self.require(request.metadata(), Capability::Edit).await?;
        let id = parse_uuid(&request.into_inner().id, "id")?;

        let version = versions::get_version(&self.state.db, id)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| Status::from(AppError::NotFound("version not found".into())))?;
        if version.state() != VersionState::Pending {
            return Err(Status::from(AppError::Conflict(
                "version is not PENDING and cannot be (re-)published from here".into(),
            )));
        }

        let job_id = format!("version-{}", version.id);
        self.state
            .queue
            .enqueue(&job_id, JobPayload::ProcessPublish { version_id: version.id })
            .await
            .map_err(Status::from)?;

        Ok(Response::new(ProcessVersionResponse { job_id }))
    }
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let service = UpdateServiceImpl::new(state);

    Server::builder()
        .add_service(UpdateServiceServer::new(service))
        .serve(addr)
        .await?;

    Ok(())
}
