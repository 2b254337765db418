//! # Error Taxonomy
//!
//! Typed errors for each component plus the stage-level [`StageError`] the
//! coordinator returns. Internal detail stays in `Display`/`source` for logs;
//! [`StageError::public`] is the only form that crosses the external boundary.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::swarm::pipeline::Stage;

/// Failure of a single external model call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    /// Timeouts, 5xx, rate limiting, dropped connections
    #[error("transient model error: {0}")]
    Transient(String),
    /// Malformed requests, bad credentials, unknown model
    #[error("model request rejected: {0}")]
    Fatal(String),
}

impl ModelError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Schema or completeness check failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Context Store Adapter failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("context query is missing required scope field `{0}`")]
    MissingScope(&'static str),
    #[error("vector store query failed: {0}")]
    Backend(String),
}

/// Version Store Adapter failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("persistence failure: {0}")]
pub struct PersistenceError(pub String);

impl From<rusqlite::Error> for PersistenceError {
    fn from(e: rusqlite::Error) -> Self {
        Self(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        Self(format!("snapshot serialization: {}", e))
    }
}

/// Outcome of one guarded agent invocation attempt
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvocationError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    /// Output failed validation; `regenerate` marks it as worth another attempt
    #[error("generated output rejected: {source}")]
    InvalidOutput {
        source: ValidationError,
        regenerate: bool,
    },
}

/// Stage-level error returned by the coordinator
#[derive(Debug, Error)]
pub enum StageError {
    /// Caller input failed schema checks
    #[error("invalid input: {message}")]
    Validation {
        correlation_id: String,
        message: String,
    },
    /// Agent output failed completeness checks
    #[error("invalid output: {message}")]
    InvalidOutput {
        correlation_id: String,
        message: String,
    },
    /// The previous stage has never succeeded for this project
    #[error("stage `{required}` must succeed before this stage can run")]
    Precondition {
        correlation_id: String,
        required: Stage,
    },
    /// External service kept failing (or rejected the call outright)
    #[error("model invocation failed after {attempts} attempt(s): {source}")]
    StageFailure {
        correlation_id: String,
        attempts: u32,
        source: InvocationError,
    },
    /// Breaker is open for the dependency; nothing was attempted
    #[error("circuit open for dependency `{dependency}`")]
    CircuitOpen {
        correlation_id: String,
        dependency: String,
    },
    #[error("failed to persist stage result: {source}")]
    Persistence {
        correlation_id: String,
        source: PersistenceError,
    },
    #[error("context retrieval failed: {source}")]
    ContextRetrieval {
        correlation_id: String,
        source: ContextError,
    },
}

/// Sanitized error that is safe to show to clients
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicError {
    pub code: &'static str,
    pub message: String,
    pub correlation_id: String,
}

impl StageError {
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Validation { correlation_id, .. }
            | Self::InvalidOutput { correlation_id, .. }
            | Self::Precondition { correlation_id, .. }
            | Self::StageFailure { correlation_id, .. }
            | Self::CircuitOpen { correlation_id, .. }
            | Self::Persistence { correlation_id, .. }
            | Self::ContextRetrieval { correlation_id, .. } => correlation_id,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::InvalidOutput { .. } => "invalid_output",
            Self::Precondition { .. } => "precondition_failed",
            Self::StageFailure { .. } => "stage_failure",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Persistence { .. } => "persistence_error",
            Self::ContextRetrieval { .. } => "context_retrieval_error",
        }
    }

    /// Strip internal detail (prompts, provider messages, SQL) for the client
    pub fn public(&self) -> PublicError {
        let message = match self {
            Self::Validation { message, .. } => format!("Invalid input: {}", message),
            Self::InvalidOutput { .. } => {
                "The generated document did not pass validation".to_string()
            }
            Self::Precondition { required, .. } => format!(
                "Stage '{}' must complete successfully before this stage",
                required
            ),
            Self::StageFailure { .. } => {
                "The generation service failed; please retry later".to_string()
            }
            Self::CircuitOpen { .. } => {
                "The generation service is temporarily unavailable".to_string()
            }
            Self::Persistence { .. } => "Failed to save the generated document".to_string(),
            Self::ContextRetrieval { .. } => "Failed to load project context".to_string(),
        };

        PublicError {
            code: self.code(),
            message,
            correlation_id: self.correlation_id().to_string(),
        }
    }
}
