//! # Context API
//!
//! Lets external collaborators feed project context that later stages
//! retrieve, and inspect what a query would return.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use blueprint_core::error::ContextError;
use blueprint_core::memory::ContextStore;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::TenantId;
use crate::error::ApiError;
use crate::state::SharedState;

const MAX_TOP_K: usize = 50;

#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestRequest {
    /// Free-form label, e.g. `note`, `research`, `document`
    pub chunk_type: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IngestResponse {
    pub id: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ContextSearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ContextResult {
    pub chunk_type: String,
    pub content: String,
    pub score: Option<f32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ContextSearchResponse {
    pub results: Vec<ContextResult>,
}

fn context_error(e: ContextError) -> ApiError {
    match e {
        ContextError::MissingScope(field) => ApiError::BadRequest(format!("{} is required", field)),
        ContextError::Backend(detail) => ApiError::Internal(detail),
    }
}

/// Add a context chunk to a project
#[utoipa::path(
    post,
    path = "/api/v1/projects/{project_id}/context",
    tag = "context",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("x-tenant-id" = String, Header, description = "Tenant id")
    ),
    request_body = IngestRequest,
    responses(
        (status = 201, description = "Chunk stored", body = IngestResponse),
        (status = 400, description = "Empty content", body = crate::error::ErrorBody)
    )
)]
pub async fn ingest(
    State(state): State<SharedState>,
    TenantId(tenant_id): TenantId,
    Path(project_id): Path<String>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".to_string()));
    }
    let chunk_type = match req.chunk_type.trim() {
        "" => "note",
        t => t,
    };

    let id = state
        .context
        .ingest(&tenant_id, &project_id, chunk_type, &req.content)
        .map_err(context_error)?;
    tracing::debug!(tenant_id = %tenant_id, project_id = %project_id, id, "context chunk ingested");

    Ok((StatusCode::CREATED, Json(IngestResponse { id })))
}

/// Rank a project's context chunks against a query
#[utoipa::path(
    post,
    path = "/api/v1/projects/{project_id}/context/search",
    tag = "context",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("x-tenant-id" = String, Header, description = "Tenant id")
    ),
    request_body = ContextSearchRequest,
    responses(
        (status = 200, description = "Ranked chunks", body = ContextSearchResponse)
    )
)]
pub async fn search(
    State(state): State<SharedState>,
    TenantId(tenant_id): TenantId,
    Path(project_id): Path<String>,
    Json(req): Json<ContextSearchRequest>,
) -> Result<Json<ContextSearchResponse>, ApiError> {
    let top_k = req
        .top_k
        .unwrap_or(state.coordinator.config().context_top_k)
        .min(MAX_TOP_K);

    let chunks = state
        .context
        .query(&tenant_id, &project_id, &req.query, top_k)
        .await
        .map_err(context_error)?;

    let results = chunks
        .into_iter()
        .map(|c| ContextResult {
            chunk_type: c.chunk_type,
            content: c.content,
            score: c.score,
        })
        .collect();
    Ok(Json(ContextSearchResponse { results }))
}
