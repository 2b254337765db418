//! # Stages API
//!
//! Stage invocation and the per-project progress stream.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use blueprint_core::swarm::{ExecutionContext, ProjectScope, StageOutcome, StageRequest};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use super::documents::DocumentView;
use super::TenantId;
use crate::error::ApiError;
use crate::state::SharedState;

/// Heartbeat interval of the progress stream
const HEARTBEAT: Duration = Duration::from_secs(15);

fn default_wait() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RunStageRequest {
    /// Stage-specific fields, e.g. `{"idea_description": "..."}` for step 1
    #[serde(default)]
    #[schema(value_type = Object)]
    pub input: Value,
    #[serde(default)]
    pub regenerate_on_invalid: bool,
    /// Output language, defaults to `en`
    pub language: Option<String>,
    /// Wait for the result (default) or return 202 immediately
    #[serde(default = "default_wait")]
    pub wait: bool,
    /// Caller-supplied correlation id
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StageResponse {
    pub correlation_id: String,
    pub execution_id: String,
    pub attempts: u32,
    pub document: DocumentView,
}

impl From<StageOutcome> for StageResponse {
    fn from(outcome: StageOutcome) -> Self {
        Self {
            correlation_id: outcome.correlation_id,
            execution_id: outcome.execution_id,
            attempts: outcome.attempts,
            document: DocumentView::from(outcome.document),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AcceptedResponse {
    pub correlation_id: String,
}

/// Run one stage of the pipeline for a project
#[utoipa::path(
    post,
    path = "/api/v1/projects/{project_id}/stages/{step}",
    tag = "stages",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("step" = u8, Path, description = "1 about, 2 standards, 3 architecture, 4 plan"),
        ("x-tenant-id" = String, Header, description = "Tenant id")
    ),
    request_body = RunStageRequest,
    responses(
        (status = 200, description = "Stage succeeded", body = StageResponse),
        (status = 202, description = "Stage accepted", body = AcceptedResponse),
        (status = 409, description = "Previous stage has no version", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid input", body = crate::error::ErrorBody),
        (status = 502, description = "Generation failed", body = crate::error::ErrorBody),
        (status = 503, description = "Circuit open", body = crate::error::ErrorBody)
    )
)]
pub async fn run_stage(
    State(state): State<SharedState>,
    TenantId(tenant_id): TenantId,
    Path((project_id, step)): Path<(String, u8)>,
    Json(req): Json<RunStageRequest>,
) -> Result<Response, ApiError> {
    let mut builder = ExecutionContext::builder(tenant_id, project_id, step);
    if let Some(language) = req.language {
        builder = builder.language(language);
    }
    if let Some(id) = req.correlation_id {
        builder = builder.correlation_id(id);
    }
    let ctx = builder.build()?;
    let correlation_id = ctx.correlation_id().to_string();

    let request = StageRequest {
        input: req.input,
        regenerate_on_invalid: req.regenerate_on_invalid,
    };

    // Detached so a dropped connection never abandons a half-run stage
    let coordinator = Arc::clone(&state.coordinator);
    let task = tokio::spawn(async move { coordinator.run_stage(&ctx, request).await });

    if !req.wait {
        return Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { correlation_id })).into_response());
    }

    let outcome = task
        .await
        .map_err(|e| ApiError::Internal(format!("stage task {} aborted: {}", correlation_id, e)))??;
    Ok(Json(StageResponse::from(outcome)).into_response())
}

/// SSE stream of progress events for one project, with heartbeat
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/events",
    tag = "stages",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("x-tenant-id" = String, Header, description = "Tenant id (or `tenant_id` query parameter)")
    ),
    responses(
        (status = 200, description = "text/event-stream of progress events")
    )
)]
pub async fn events(
    State(state): State<SharedState>,
    TenantId(tenant_id): TenantId,
    Path(project_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let scope = ProjectScope::new(tenant_id, project_id);
    let subscription = state.bus.subscribe(scope.clone());
    tracing::debug!(
        tenant_id = %scope.tenant_id,
        project_id = %scope.project_id,
        subscribers = state.bus.subscriber_count(&scope),
        "progress stream opened"
    );

    let stream = stream::unfold(subscription, |mut subscription| async move {
        match tokio::time::timeout(HEARTBEAT, subscription.recv()).await {
            Ok(Some(event)) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().data(json)), subscription))
            }
            Ok(None) => None, // Channel closed
            Err(_) => Some((Ok(Event::default().comment("heartbeat")), subscription)),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
