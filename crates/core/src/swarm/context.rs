//! # Execution Context
//!
//! Tenant/project-scoped context built once per stage invocation and threaded
//! through every component. Fields are private so a context cannot be mutated
//! mid-flight.

use serde::Serialize;
use uuid::Uuid;

use super::pipeline::Stage;
use crate::error::StageError;

/// Default output language for generated documents
pub const DEFAULT_LANGUAGE: &str = "en";

/// Identity of a project within a tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProjectScope {
    pub tenant_id: String,
    pub project_id: String,
}

impl ProjectScope {
    pub fn new(tenant_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
        }
    }
}

/// Immutable per-invocation context
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    scope: ProjectScope,
    stage: Stage,
    correlation_id: String,
    language: String,
}

impl ExecutionContext {
    /// Create a context for `step` with a fresh correlation id
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        step: u8,
    ) -> Result<Self, StageError> {
        Self::builder(tenant_id, project_id, step).build()
    }

    pub fn builder(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        step: u8,
    ) -> ExecutionContextBuilder {
        ExecutionContextBuilder {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            step,
            correlation_id: None,
            language: None,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.scope.tenant_id
    }

    pub fn project_id(&self) -> &str {
        &self.scope.project_id
    }

    pub fn scope(&self) -> &ProjectScope {
        &self.scope
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn step(&self) -> u8 {
        self.stage.step()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

/// Builder for [`ExecutionContext`]; validation happens in `build`
#[derive(Debug)]
pub struct ExecutionContextBuilder {
    tenant_id: String,
    project_id: String,
    step: u8,
    correlation_id: Option<String>,
    language: Option<String>,
}

impl ExecutionContextBuilder {
    /// Reuse a caller-provided correlation id
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn build(self) -> Result<ExecutionContext, StageError> {
        let correlation_id = self
            .correlation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let invalid = |message: String| StageError::Validation {
            correlation_id: correlation_id.clone(),
            message,
        };

        if self.tenant_id.trim().is_empty() {
            return Err(invalid("tenant_id is required".to_string()));
        }
        if self.project_id.trim().is_empty() {
            return Err(invalid("project_id is required".to_string()));
        }
        let stage = Stage::from_step(self.step)
            .ok_or_else(|| invalid(format!("step must be 1-4, got {}", self.step)))?;

        let language = self
            .language
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        Ok(ExecutionContext {
            scope: ProjectScope::new(self.tenant_id, self.project_id),
            stage,
            correlation_id,
            language,
        })
    }
}
