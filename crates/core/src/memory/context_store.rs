//! # Context Store
//!
//! Read-only retrieval of prior project content, always scoped to a
//! `(tenant_id, project_id)` pair.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ContextError;

/// A retrieved fragment of earlier project content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextChunk {
    pub tenant_id: String,
    pub project_id: String,
    pub chunk_type: String,
    pub content: String,
    /// Stored vector; kept in memory only, never sent over the wire
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Similarity to the query, when produced by a ranked search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Semantic search over project context
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Top `top_k` chunks for `text`, most relevant first.
    ///
    /// Fails with [`ContextError::MissingScope`] when either id is empty;
    /// an unscoped search is never issued.
    async fn query(
        &self,
        tenant_id: &str,
        project_id: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<ContextChunk>, ContextError>;
}

/// Reject queries that would not be filtered by tenant and project
pub fn require_scope(tenant_id: &str, project_id: &str) -> Result<(), ContextError> {
    if tenant_id.trim().is_empty() {
        return Err(ContextError::MissingScope("tenant_id"));
    }
    if project_id.trim().is_empty() {
        return Err(ContextError::MissingScope("project_id"));
    }
    Ok(())
}
