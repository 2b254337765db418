//! # Documents API
//!
//! Read-only access to document versions and the execution audit trail.

use axum::{
    extract::{Path, State},
    Json,
};
use blueprint_core::state::{AgentExecution, DocumentVersion};
use blueprint_core::swarm::Stage;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use super::TenantId;
use crate::error::ApiError;
use crate::state::SharedState;

/// One persisted document version
#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentView {
    pub project_id: String,
    pub document_type: String,
    pub version: u32,
    pub content: String,
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub correlation_id: String,
    pub created_at: String,
}

impl From<DocumentVersion> for DocumentView {
    fn from(doc: DocumentVersion) -> Self {
        Self {
            project_id: doc.project_id,
            document_type: doc.document_type,
            version: doc.version,
            content: doc.content,
            metadata: doc.metadata,
            correlation_id: doc.correlation_id,
            created_at: doc.created_at.to_rfc3339(),
        }
    }
}

/// Audit row of one stage invocation. Failure detail stays in the server logs.
#[derive(Debug, Serialize, ToSchema)]
pub struct ExecutionView {
    pub id: String,
    pub project_id: String,
    pub agent_type: String,
    pub step: u8,
    pub correlation_id: String,
    pub status: String,
    pub attempts: u32,
    #[schema(value_type = Object)]
    pub input_snapshot: Value,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl From<AgentExecution> for ExecutionView {
    fn from(exec: AgentExecution) -> Self {
        Self {
            id: exec.id,
            project_id: exec.project_id,
            agent_type: exec.agent_type,
            step: exec.step,
            correlation_id: exec.correlation_id,
            status: exec.status.as_str().to_string(),
            attempts: exec.attempts,
            input_snapshot: exec.input_snapshot,
            started_at: exec.started_at.to_rfc3339(),
            completed_at: exec.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

fn document_stage(document_type: &str) -> Result<Stage, ApiError> {
    Stage::from_document_type(document_type)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown document type '{}'", document_type)))
}

/// List every version of a document, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/documents/{document_type}/versions",
    tag = "documents",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("document_type" = String, Path, description = "about, standards, architecture or plan"),
        ("x-tenant-id" = String, Header, description = "Tenant id")
    ),
    responses(
        (status = 200, description = "All versions", body = Vec<DocumentView>),
        (status = 404, description = "Unknown document type", body = crate::error::ErrorBody)
    )
)]
pub async fn list_versions(
    State(state): State<SharedState>,
    TenantId(tenant_id): TenantId,
    Path((project_id, document_type)): Path<(String, String)>,
) -> Result<Json<Vec<DocumentView>>, ApiError> {
    let stage = document_stage(&document_type)?;
    let versions = state
        .versions
        .list_versions(&tenant_id, &project_id, stage.document_type())
        .await?;
    Ok(Json(versions.into_iter().map(DocumentView::from).collect()))
}

/// Latest version of a document
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/documents/{document_type}/latest",
    tag = "documents",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("document_type" = String, Path, description = "about, standards, architecture or plan"),
        ("x-tenant-id" = String, Header, description = "Tenant id")
    ),
    responses(
        (status = 200, description = "Latest version", body = DocumentView),
        (status = 404, description = "No version yet", body = crate::error::ErrorBody)
    )
)]
pub async fn latest_version(
    State(state): State<SharedState>,
    TenantId(tenant_id): TenantId,
    Path((project_id, document_type)): Path<(String, String)>,
) -> Result<Json<DocumentView>, ApiError> {
    let stage = document_stage(&document_type)?;
    state
        .versions
        .latest(&tenant_id, &project_id, stage.document_type())
        .await?
        .map(|doc| Json(DocumentView::from(doc)))
        .ok_or_else(|| {
            ApiError::NotFound(format!("No '{}' document for this project yet", stage))
        })
}

/// Stage executions of a project, newest first
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/executions",
    tag = "documents",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("x-tenant-id" = String, Header, description = "Tenant id")
    ),
    responses(
        (status = 200, description = "Execution audit trail", body = Vec<ExecutionView>)
    )
)]
pub async fn list_executions(
    State(state): State<SharedState>,
    TenantId(tenant_id): TenantId,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<ExecutionView>>, ApiError> {
    let executions = state.versions.list_executions(&tenant_id, &project_id).await?;
    Ok(Json(executions.into_iter().map(ExecutionView::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/v1/executions/{execution_id}",
    tag = "documents",
    params(
        ("execution_id" = String, Path, description = "Execution id"),
        ("x-tenant-id" = String, Header, description = "Tenant id")
    ),
    responses(
        (status = 200, description = "Execution", body = ExecutionView),
        (status = 404, description = "Not found in this tenant", body = crate::error::ErrorBody)
    )
)]
pub async fn get_execution(
    State(state): State<SharedState>,
    TenantId(tenant_id): TenantId,
    Path(execution_id): Path<String>,
) -> Result<Json<ExecutionView>, ApiError> {
    state
        .versions
        .get_execution(&tenant_id, &execution_id)
        .await?
        .map(|exec| Json(ExecutionView::from(exec)))
        .ok_or_else(|| ApiError::NotFound("Execution not found".to_string()))
}
