//! # API
//!
//! All routes live under `/api/v1`. Every project-scoped route needs the
//! caller's tenant, sent as the `x-tenant-id` header by the gateway.

pub mod context;
pub mod documents;
pub mod stages;
pub mod system;

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use serde::Deserialize;

use crate::error::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant of the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantId(pub String);

#[derive(Deserialize)]
struct TenantQuery {
    tenant_id: Option<String>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for TenantId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        // EventSource cannot set headers, so the stream accepts a query parameter
        let tenant = from_header.or_else(|| {
            Query::<TenantQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|q| q.0.tenant_id)
                .filter(|t| !t.trim().is_empty())
        });

        tenant.map(TenantId).ok_or(ApiError::MissingTenant)
    }
}
