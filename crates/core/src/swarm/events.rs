//! # Progress Events
//!
//! Step-level progress published by the coordinator and streamed to clients.
//!
//! Wire form (one JSON object per SSE block):
//!
//! ```json
//! {"type":"status","step":1,"status":"generating","progress_percent":50,
//!  "correlation_id":"…","timestamp":"…","message":"…"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a stage invocation is
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Started,
    ContextRetrieved,
    Generating,
    /// A retriable model failure; another attempt follows
    Retrying,
    Completed,
    Failed,
}

impl ProgressKind {
    pub fn progress_percent(&self) -> u8 {
        match self {
            Self::Started => 0,
            Self::ContextRetrieved => 25,
            Self::Generating | Self::Retrying => 50,
            Self::Completed | Self::Failed => 100,
        }
    }

    /// Exactly one terminal event ends every invocation
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// `type` discriminator on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Status,
    Error,
}

/// A progress event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub step: u8,
    pub status: ProgressKind,
    pub progress_percent: u8,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, step: u8, correlation_id: &str) -> Self {
        Self {
            event_type: if kind == ProgressKind::Failed {
                EventType::Error
            } else {
                EventType::Status
            },
            step,
            status: kind,
            progress_percent: kind.progress_percent(),
            correlation_id: correlation_id.to_string(),
            timestamp: Utc::now(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
