//! Fakes shared by the coordinator tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{ContextError, ModelError};
use crate::memory::{ContextChunk, ContextStore};
use crate::models::{DocumentSection, GeneratedDocument, ModelClient, ModelRequest};
use crate::skills::AgentRegistry;
use crate::swarm::{ProgressEvent, ProgressKind, ProgressSink, ProjectScope, Stage};

/// A document that passes validation for `stage`
pub fn complete_document(stage: Stage) -> GeneratedDocument {
    let agent = AgentRegistry::standard().get(stage);
    GeneratedDocument {
        title: format!("Streak {}", stage),
        sections: agent
            .required_sections()
            .iter()
            .map(|heading| DocumentSection {
                heading: heading.to_string(),
                body: format!("{} for the {} document.", heading, stage),
            })
            .collect(),
        confidence: 0.9,
    }
}

/// Model that replays a script, then answers with valid documents
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<GeneratedDocument, ModelError>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn always_valid() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<Result<GeneratedDocument, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn dependency(&self, _agent_type: &str) -> String {
        "scripted".to_string()
    }

    async fn generate(&self, request: &ModelRequest) -> Result<GeneratedDocument, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        let stage = Stage::ALL
            .into_iter()
            .find(|s| s.agent_type() == request.agent_type)
            .unwrap();
        Ok(complete_document(stage))
    }
}

/// Sink that keeps every event
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(ProjectScope, ProgressEvent)>>,
}

impl RecordingSink {
    pub fn events_for(&self, scope: &ProjectScope) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == scope)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn kinds(&self) -> Vec<ProgressKind> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.status)
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn publish(&self, scope: &ProjectScope, event: ProgressEvent) {
        self.events.lock().unwrap().push((scope.clone(), event));
    }
}

/// Context store whose backend is always down
pub struct FailingContextStore;

#[async_trait]
impl ContextStore for FailingContextStore {
    async fn query(
        &self,
        _tenant_id: &str,
        _project_id: &str,
        _text: &str,
        _top_k: usize,
    ) -> Result<Vec<ContextChunk>, ContextError> {
        Err(ContextError::Backend("connection refused".to_string()))
    }
}
