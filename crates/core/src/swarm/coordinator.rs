//! # Workflow Coordinator
//!
//! Runs one stage of the document pipeline for one project: execution audit
//! row, precondition check, context retrieval, guarded agent invocation,
//! versioned persistence and progress events.
//!
//! ```text
//! lock(project) ─▶ execution(pending→running) ─▶ started ─▶ precondition
//!   ─▶ join!(earlier docs, context query) ─▶ context_retrieved
//!   ─▶ parse/validate input ─▶ generating ─▶ Resilient::call(agent) ─┬─▶ commit ─▶ completed
//!                                            (retrying…)            └─▶ record_failure ─▶ error
//! ```
//!
//! Stages are never chained automatically.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use crate::error::{InvocationError, PersistenceError, StageError};
use crate::memory::{ContextChunk, ContextStore};
use crate::models::{ModelClient, ModelRouting};
use crate::resilience::{BreakerState, ResilienceConfig, ResilienceError, Resilient};
use crate::skills::{AgentInput, AgentOutput, AgentRegistry, PriorDocuments, StageAgent};
use crate::state::{DocumentVersion, NewVersion, VersionStore};

use super::bus::ProgressSink;
use super::context::{ExecutionContext, ProjectScope};
use super::events::{ProgressEvent, ProgressKind};

/// Default location of the persisted configuration
pub const DEFAULT_CONFIG_PATH: &str = ".blueprint/config.json";

/// Configuration for the coordinator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Retry, timeout and breaker settings for model calls
    pub resilience: ResilienceConfig,
    /// Chunks of prior context handed to each agent
    pub context_top_k: usize,
    /// Continue without context when the store fails
    pub context_best_effort: bool,
    /// Outputs below this self-assessed confidence are rejected
    pub min_confidence: f32,
    /// Global and per-agent provider/model selection
    #[serde(flatten)]
    pub routing: ModelRouting,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            resilience: ResilienceConfig::default(),
            context_top_k: 5,
            context_best_effort: false,
            min_confidence: 0.5,
            routing: ModelRouting::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Read a config file; a missing file yields the defaults
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    /// `.blueprint/config.json`, falling back to defaults on any problem
    pub fn load() -> Self {
        Self::load_from(DEFAULT_CONFIG_PATH).unwrap_or_else(|e| {
            tracing::warn!("Using default coordinator config: {:#}", e);
            Self::default()
        })
    }
}

/// One async mutex per project; stages of the same project run one at a time
#[derive(Debug, Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<ProjectScope, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProjectLocks {
    /// Wait for exclusive access to `scope`
    pub async fn acquire(&self, scope: &ProjectScope) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Entries referenced only by the map are idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(scope.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Projects currently locked or waited on
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|l| Arc::strong_count(l) > 1).count()
    }
}

/// Caller's request to run a stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageRequest {
    /// Stage-specific fields; earlier documents are loaded by the coordinator
    #[serde(default)]
    pub input: Value,
    /// Treat an output that fails validation as retriable
    #[serde(default)]
    pub regenerate_on_invalid: bool,
}

/// Result of a successful stage
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub correlation_id: String,
    pub execution_id: String,
    pub attempts: u32,
    pub document: DocumentVersion,
}

/// The workflow coordinator
pub struct Coordinator {
    config: CoordinatorConfig,
    versions: Arc<dyn VersionStore>,
    context: Arc<dyn ContextStore>,
    progress: Arc<dyn ProgressSink>,
    model: Arc<dyn ModelClient>,
    agents: AgentRegistry,
    resilient: Resilient,
    locks: ProjectLocks,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        versions: Arc<dyn VersionStore>,
        context: Arc<dyn ContextStore>,
        progress: Arc<dyn ProgressSink>,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        let resilient = Resilient::from_config(&config.resilience);
        Self {
            config,
            versions,
            context,
            progress,
            model,
            agents: AgentRegistry::standard(),
            resilient,
            locks: ProjectLocks::default(),
        }
    }

    /// Replace the agent lookup table
    pub fn with_agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn versions(&self) -> &Arc<dyn VersionStore> {
        &self.versions
    }

    /// Breaker state per model dependency
    pub fn breaker_states(&self) -> Vec<(String, BreakerState)> {
        self.resilient.breakers().states()
    }

    fn emit(&self, ctx: &ExecutionContext, event: ProgressEvent) {
        tracing::debug!(
            correlation_id = %ctx.correlation_id(),
            status = ?event.status,
            "progress"
        );
        self.progress.publish(ctx.scope(), event);
    }

    fn event(&self, ctx: &ExecutionContext, kind: ProgressKind) -> ProgressEvent {
        ProgressEvent::new(kind, ctx.step(), ctx.correlation_id())
    }

    /// Run the stage named by `ctx.step()`
    #[tracing::instrument(
        skip_all,
        fields(
            tenant_id = %ctx.tenant_id(),
            project_id = %ctx.project_id(),
            step = ctx.step(),
            correlation_id = %ctx.correlation_id(),
        )
    )]
    pub async fn run_stage(
        &self,
        ctx: &ExecutionContext,
        request: StageRequest,
    ) -> Result<StageOutcome, StageError> {
        let stage = ctx.stage();
        let agent = self.agents.get(stage);
        let correlation_id = ctx.correlation_id().to_string();
        let persistence = |source: PersistenceError| StageError::Persistence {
            correlation_id: correlation_id.clone(),
            source,
        };

        let _guard = self.locks.acquire(ctx.scope()).await;

        let execution = self
            .versions
            .begin_execution(ctx, stage.agent_type(), &request.input)
            .await
            .map_err(persistence)?;
        if let Err(e) = self.versions.mark_running(&execution.id).await {
            return Err(self.fail(ctx, &execution.id, 0, persistence(e)).await);
        }

        tracing::info!(execution_id = %execution.id, agent = stage.agent_type(), "stage started");
        self.emit(ctx, self.event(ctx, ProgressKind::Started));

        // The previous stage must have produced at least one version
        let mut prior = PriorDocuments::new();
        if let Some(required) = stage.previous() {
            let latest = self
                .versions
                .latest(ctx.tenant_id(), ctx.project_id(), required.document_type())
                .await;
            match latest {
                Ok(Some(doc)) => {
                    prior.insert(required, doc.content);
                }
                Ok(None) => {
                    tracing::info!(required = %required, "precondition not met");
                    let err = StageError::Precondition {
                        correlation_id: correlation_id.clone(),
                        required,
                    };
                    return Err(self.fail(ctx, &execution.id, 0, err).await);
                }
                Err(e) => return Err(self.fail(ctx, &execution.id, 0, persistence(e)).await),
            }
        }

        let result = self.execute(ctx, agent.as_ref(), &request, prior).await;
        match result {
            Ok((output, attempts)) => {
                let metadata = json!({
                    "title": output.title,
                    "confidence": output.confidence,
                    "schema_version": output.schema_version,
                    "agent_type": stage.agent_type(),
                    "attempts": attempts,
                    "sections": output.sections.iter().map(|s| s.heading.as_str()).collect::<Vec<_>>(),
                });
                let snapshot = match serde_json::to_value(&output) {
                    Ok(v) => v,
                    Err(e) => {
                        let err = persistence(e.into());
                        return Err(self.fail(ctx, &execution.id, attempts, err).await);
                    }
                };
                let version = NewVersion {
                    document_type: stage.document_type().to_string(),
                    content: output.content,
                    metadata,
                };

                match self
                    .versions
                    .commit_success(&execution.id, attempts, version, &snapshot)
                    .await
                {
                    Ok(document) => {
                        tracing::info!(
                            execution_id = %execution.id,
                            version = document.version,
                            attempts,
                            "stage succeeded"
                        );
                        self.emit(
                            ctx,
                            self.event(ctx, ProgressKind::Completed).with_message(format!(
                                "{} v{} saved",
                                document.document_type, document.version
                            )),
                        );
                        Ok(StageOutcome {
                            correlation_id: ctx.correlation_id().to_string(),
                            execution_id: execution.id,
                            attempts,
                            document,
                        })
                    }
                    Err(e) => Err(self.fail(ctx, &execution.id, attempts, persistence(e)).await),
                }
            }
            Err((err, attempts)) => Err(self.fail(ctx, &execution.id, attempts, err).await),
        }
    }

    /// Everything between `started` and persistence. Returns attempts used.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        agent: &dyn StageAgent,
        request: &StageRequest,
        mut prior: PriorDocuments,
    ) -> Result<(AgentOutput, u32), (StageError, u32)> {
        let stage = ctx.stage();
        let correlation_id = ctx.correlation_id().to_string();

        let query = query_text(
            &request.input,
            stage.previous().and_then(|p| prior.get(&p)).map(String::as_str),
        );
        let remaining: Vec<_> = stage
            .predecessors()
            .into_iter()
            .filter(|s| Some(*s) != stage.previous())
            .collect();

        let load_earlier = async {
            let mut docs = Vec::with_capacity(remaining.len());
            for s in &remaining {
                let doc = self
                    .versions
                    .latest(ctx.tenant_id(), ctx.project_id(), s.document_type())
                    .await?;
                docs.push((*s, doc));
            }
            Ok::<_, PersistenceError>(docs)
        };
        let fetch_context = self.context.query(
            ctx.tenant_id(),
            ctx.project_id(),
            &query,
            self.config.context_top_k,
        );
        let (earlier, context) = tokio::join!(load_earlier, fetch_context);

        let earlier = earlier.map_err(|source| {
            (
                StageError::Persistence {
                    correlation_id: correlation_id.clone(),
                    source,
                },
                0,
            )
        })?;
        for (s, doc) in earlier {
            match doc {
                Some(doc) => {
                    prior.insert(s, doc.content);
                }
                None => {
                    return Err((
                        StageError::Precondition {
                            correlation_id,
                            required: s,
                        },
                        0,
                    ))
                }
            }
        }

        let context: Vec<ContextChunk> = match context {
            Ok(chunks) => chunks,
            Err(e) if self.config.context_best_effort => {
                tracing::warn!(error = %e, "context retrieval failed, continuing without context");
                Vec::new()
            }
            Err(source) => {
                return Err((
                    StageError::ContextRetrieval {
                        correlation_id,
                        source,
                    },
                    0,
                ))
            }
        };
        self.emit(
            ctx,
            self.event(ctx, ProgressKind::ContextRetrieved)
                .with_message(format!("{} context chunk(s)", context.len())),
        );

        let validation = |message: String| StageError::Validation {
            correlation_id: correlation_id.clone(),
            message,
        };
        let payload = agent
            .parse_input(&request.input, &prior)
            .map_err(|e| (validation(e.message), 0))?;
        let input = AgentInput::new(payload, context);
        agent
            .validate_input(&input)
            .map_err(|e| (validation(e.message), 0))?;

        let dependency = self.model.dependency(stage.agent_type());
        self.emit(
            ctx,
            self.event(ctx, ProgressKind::Generating)
                .with_message(format!("{} is writing", stage.agent_type())),
        );

        let model = self.model.as_ref();
        let input = &input;
        let regenerate = request.regenerate_on_invalid;
        let min_confidence = self.config.min_confidence;
        let max_attempts = self.resilient.policy().attempts();

        let result = self
            .resilient
            .call(
                &dependency,
                move |attempt| async move {
                    tracing::debug!(attempt, "invoking agent");
                    let output = agent.process(ctx, input, model).await?;
                    agent
                        .validate(&output)
                        .map_err(|source| InvocationError::InvalidOutput { source, regenerate })?;
                    if output.confidence < min_confidence {
                        return Err(InvocationError::InvalidOutput {
                            source: crate::error::ValidationError::new(format!(
                                "confidence {:.2} is below the minimum {:.2}",
                                output.confidence, min_confidence
                            )),
                            regenerate,
                        });
                    }
                    Ok::<AgentOutput, InvocationError>(output)
                },
                |next_attempt, error, delay| {
                    tracing::debug!(error = %error, "scheduling retry");
                    self.emit(
                        ctx,
                        self.event(ctx, ProgressKind::Retrying).with_message(format!(
                            "attempt {} of {} in {} ms",
                            next_attempt,
                            max_attempts,
                            delay.as_millis()
                        )),
                    );
                },
            )
            .await;

        result.map_err(|e| match e {
            ResilienceError::CircuitOpen {
                dependency,
                attempts,
            } => (
                StageError::CircuitOpen {
                    correlation_id: correlation_id.clone(),
                    dependency,
                },
                attempts,
            ),
            ResilienceError::Exhausted {
                attempts,
                last: error,
            }
            | ResilienceError::Rejected { attempts, error } => match error {
                InvocationError::InvalidOutput { source, .. } => (
                    StageError::InvalidOutput {
                        correlation_id: correlation_id.clone(),
                        message: source.message,
                    },
                    attempts,
                ),
                source => (
                    StageError::StageFailure {
                        correlation_id: correlation_id.clone(),
                        attempts,
                        source,
                    },
                    attempts,
                ),
            },
        })
    }

    /// Mark the execution failed, log, emit the error event
    async fn fail(
        &self,
        ctx: &ExecutionContext,
        execution_id: &str,
        attempts: u32,
        err: StageError,
    ) -> StageError {
        tracing::error!(
            execution_id,
            attempts,
            code = err.code(),
            error = %err,
            "stage failed"
        );
        if let Err(e) = self
            .versions
            .record_failure(execution_id, attempts, &err.to_string())
            .await
        {
            tracing::error!(execution_id, error = %e, "could not record stage failure");
        }

        let public = err.public();
        self.emit(
            ctx,
            self.event(ctx, ProgressKind::Failed).with_message(public.message),
        );
        err
    }
}

/// Similarity query: the caller's text fields plus the previous document
fn query_text(input: &Value, previous: Option<&str>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(obj) = input.as_object() {
        parts.extend(obj.values().filter_map(Value::as_str));
    }
    if let Some(previous) = previous {
        parts.push(previous);
    }
    parts.join("\n")
}
