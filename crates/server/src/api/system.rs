//! # System API
//!
//! Health and the OpenAPI document.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use blueprint_core::resilience::BreakerState;
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::state::SharedState;
use crate::ApiDoc;

#[derive(Debug, Serialize, ToSchema)]
pub struct DependencyHealth {
    pub dependency: String,
    /// `closed`, `open` or `half_open`
    pub breaker: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `ok`, or `degraded` while any breaker is open
    pub status: String,
    pub version: String,
    pub dependencies: Vec<DependencyHealth>,
    /// Projects with at least one open progress stream
    pub progress_channels: usize,
}

fn breaker_label(state: BreakerState) -> &'static str {
    match state {
        BreakerState::Closed => "closed",
        BreakerState::Open => "open",
        BreakerState::HalfOpen => "half_open",
    }
}

/// Service health and model dependency breakers
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses(
        (status = 200, description = "Health report", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let mut breakers = state.coordinator.breaker_states();
    breakers.sort_by(|a, b| a.0.cmp(&b.0));

    let degraded = breakers.iter().any(|(_, s)| *s == BreakerState::Open);
    let dependencies = breakers
        .into_iter()
        .map(|(dependency, s)| DependencyHealth {
            dependency,
            breaker: breaker_label(s).to_string(),
        })
        .collect();

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dependencies,
        progress_channels: state.bus.channel_count(),
    })
}

pub async fn serve_openapi() -> impl IntoResponse {
    match ApiDoc::openapi().to_json() {
        Ok(doc) => Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(doc))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(e) => {
            tracing::error!(error = %e, "failed to render OpenAPI document");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
