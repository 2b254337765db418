//! # Agent Contract
//!
//! Shared capability interface for the four stage agents, their typed and
//! versioned input/output payloads, and the lookup table the coordinator
//! dispatches through.
//!
//! ```text
//! raw JSON + prior docs ─▶ parse_input ─▶ validate_input ─▶ process ─▶ validate
//!                                                            (model)
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{InvocationError, ValidationError};
use crate::memory::ContextChunk;
use crate::models::{DocumentSection, GeneratedDocument, ModelClient, ModelRequest};
use crate::swarm::context::ExecutionContext;
use crate::swarm::pipeline::Stage;

/// Version of the input/output payload layout
pub const SCHEMA_VERSION: u32 = 1;

/// Longest idea description accepted for stage 1
pub const MAX_IDEA_CHARS: usize = 4_000;

/// Characters of each context chunk included in a prompt
const CONTEXT_EXCERPT_CHARS: usize = 800;

/// Latest content of earlier stages, keyed by stage
pub type PriorDocuments = HashMap<Stage, String>;

/// Stage 1 input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AboutInput {
    pub idea_description: String,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
}

/// Stage 2 input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandardsInput {
    pub about: String,
    #[serde(default)]
    pub preferences: Option<String>,
}

/// Stage 3 input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchitectureInput {
    pub about: String,
    pub standards: String,
    #[serde(default)]
    pub constraints: Option<String>,
}

/// Stage 4 input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanInput {
    pub about: String,
    pub standards: String,
    pub architecture: String,
    #[serde(default)]
    pub timeline: Option<String>,
}

/// Stage-specific part of an agent input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StagePayload {
    About(AboutInput),
    Standards(StandardsInput),
    Architecture(ArchitectureInput),
    Plan(PlanInput),
}

impl StagePayload {
    pub fn stage(&self) -> Stage {
        match self {
            Self::About(_) => Stage::About,
            Self::Standards(_) => Stage::Standards,
            Self::Architecture(_) => Stage::Architecture,
            Self::Plan(_) => Stage::Plan,
        }
    }
}

/// Fully assembled input handed to an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentInput {
    pub schema_version: u32,
    pub payload: StagePayload,
    /// Retrieved context, most relevant first
    #[serde(default)]
    pub context: Vec<ContextChunk>,
}

impl AgentInput {
    pub fn new(payload: StagePayload, context: Vec<ContextChunk>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            payload,
            context,
        }
    }
}

/// Validated-on-exit agent result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentOutput {
    pub schema_version: u32,
    pub document_type: String,
    pub title: String,
    /// Rendered Markdown
    pub content: String,
    pub sections: Vec<DocumentSection>,
    /// Model's self-assessed completeness; the coordinator enforces a floor
    pub confidence: f32,
}

impl AgentOutput {
    pub fn from_generated(stage: Stage, doc: GeneratedDocument) -> Self {
        let content = render_markdown(&doc.title, &doc.sections);
        Self {
            schema_version: SCHEMA_VERSION,
            document_type: stage.document_type().to_string(),
            title: doc.title.trim().to_string(),
            content,
            sections: doc.sections,
            confidence: doc.confidence,
        }
    }
}

/// `# Title` followed by one `##` block per section
pub fn render_markdown(title: &str, sections: &[DocumentSection]) -> String {
    let mut out = format!("# {}\n", title.trim());
    for section in sections {
        out.push_str(&format!(
            "\n## {}\n\n{}\n",
            section.heading.trim().trim_start_matches('#').trim(),
            section.body.trim()
        ));
    }
    out
}

/// Capability shared by all four generation agents
#[async_trait]
pub trait StageAgent: Send + Sync {
    fn stage(&self) -> Stage;

    /// Static role instructions
    fn instructions(&self) -> &'static str;

    /// Section headings the output must contain
    fn required_sections(&self) -> &'static [&'static str];

    /// Build the typed payload from the caller's raw JSON and earlier documents
    fn parse_input(&self, raw: &Value, prior: &PriorDocuments)
        -> Result<StagePayload, ValidationError>;

    /// User message for the model
    fn render_prompt(&self, input: &AgentInput) -> String;

    /// Context-dependent guidance appended to the instructions
    fn guidance(&self, ctx: &ExecutionContext) -> String {
        format!(
            "Write the document in language `{}`.\n\
             The document must contain these sections, each with substantive content: {}.\n\
             Report your confidence (0.0 - 1.0) that the document is complete.",
            ctx.language(),
            self.required_sections().join(", ")
        )
    }

    /// Full system prompt the model receives
    fn system_prompt(&self, ctx: &ExecutionContext) -> String {
        format!("{}\n\n{}", self.instructions().trim_end(), self.guidance(ctx))
    }

    /// Pre-call checks
    fn validate_input(&self, input: &AgentInput) -> Result<(), ValidationError> {
        if input.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::new(format!(
                "unsupported input schema version {}",
                input.schema_version
            )));
        }
        if input.payload.stage() != self.stage() {
            return Err(ValidationError::new(format!(
                "payload for stage `{}` sent to `{}` agent",
                input.payload.stage(),
                self.stage()
            )));
        }
        match &input.payload {
            StagePayload::About(p) => {
                require_text("idea_description", &p.idea_description)?;
                if p.idea_description.chars().count() > MAX_IDEA_CHARS {
                    return Err(ValidationError::new(format!(
                        "idea_description exceeds {} characters",
                        MAX_IDEA_CHARS
                    )));
                }
            }
            StagePayload::Standards(p) => require_text("about", &p.about)?,
            StagePayload::Architecture(p) => {
                require_text("about", &p.about)?;
                require_text("standards", &p.standards)?;
            }
            StagePayload::Plan(p) => {
                require_text("about", &p.about)?;
                require_text("standards", &p.standards)?;
                require_text("architecture", &p.architecture)?;
            }
        }
        Ok(())
    }

    /// Run the agent against the model; pure apart from the model call.
    ///
    /// The model sees [`StageAgent::system_prompt`] as its system message
    /// and the rendered input as the user message.
    async fn process(
        &self,
        ctx: &ExecutionContext,
        input: &AgentInput,
        model: &dyn ModelClient,
    ) -> Result<AgentOutput, InvocationError> {
        let request = ModelRequest {
            agent_type: self.stage().agent_type(),
            system_prompt: self.system_prompt(ctx),
            prompt: self.render_prompt(input),
        };
        let generated = model.generate(&request).await?;
        Ok(AgentOutput::from_generated(self.stage(), generated))
    }

    /// Post-call structural completeness checks
    fn validate(&self, output: &AgentOutput) -> Result<(), ValidationError> {
        if output.document_type != self.stage().document_type() {
            return Err(ValidationError::new(format!(
                "expected document type `{}`, got `{}`",
                self.stage().document_type(),
                output.document_type
            )));
        }
        require_text("title", &output.title)?;
        if !output.confidence.is_finite() || !(0.0..=1.0).contains(&output.confidence) {
            return Err(ValidationError::new(format!(
                "confidence {} is outside 0.0 - 1.0",
                output.confidence
            )));
        }

        let missing: Vec<&str> = self
            .required_sections()
            .iter()
            .copied()
            .filter(|required| !has_section(&output.sections, required))
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::new(format!(
                "missing or empty sections: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

fn require_text(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new(format!("`{}` must not be empty", field)))
    } else {
        Ok(())
    }
}

/// A required section is present when some heading contains its name
/// (case-insensitive) and the body is non-empty
fn has_section(sections: &[DocumentSection], required: &str) -> bool {
    let needle = required.to_lowercase();
    sections.iter().any(|s| {
        s.heading.to_lowercase().contains(&needle) && !s.body.trim().is_empty()
    })
}

/// Deserialize the caller's raw JSON; `null` is treated as an empty object
pub fn parse_raw<T: serde::de::DeserializeOwned>(raw: &Value) -> Result<T, ValidationError> {
    let value = if raw.is_null() {
        Value::Object(Default::default())
    } else {
        raw.clone()
    };
    if !value.is_object() {
        return Err(ValidationError::new("input must be a JSON object"));
    }
    serde_json::from_value(value).map_err(|e| ValidationError::new(e.to_string()))
}

/// Latest content of `stage` from the prior documents
pub fn prior_content(prior: &PriorDocuments, stage: Stage) -> Result<String, ValidationError> {
    prior
        .get(&stage)
        .cloned()
        .ok_or_else(|| ValidationError::new(format!("no `{}` document available", stage)))
}

/// Prompt block listing retrieved context
pub fn render_context(context: &[ContextChunk]) -> String {
    if context.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\n## Related project context\n");
    for chunk in context {
        let excerpt: String = chunk.content.chars().take(CONTEXT_EXCERPT_CHARS).collect();
        out.push_str(&format!("\n- [{}] {}", chunk.chunk_type, excerpt.trim()));
    }
    out
}

/// Stage -> agent lookup table
#[derive(Clone)]
pub struct AgentRegistry {
    agents: [Arc<dyn StageAgent>; 4],
}

impl AgentRegistry {
    /// The four built-in agents
    pub fn standard() -> Self {
        use super::{ArchitectureSkill, BusinessSkill, PlanSkill, StandardsSkill};
        Self {
            agents: [
                Arc::new(BusinessSkill),
                Arc::new(StandardsSkill),
                Arc::new(ArchitectureSkill),
                Arc::new(PlanSkill),
            ],
        }
    }

    /// Replace the agent serving `agent.stage()`
    pub fn with_agent(mut self, agent: Arc<dyn StageAgent>) -> Self {
        let slot = agent.stage().index();
        self.agents[slot] = agent;
        self
    }

    pub fn get(&self, stage: Stage) -> Arc<dyn StageAgent> {
        Arc::clone(&self.agents[stage.index()])
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.agents.iter().map(|a| a.stage()))
            .finish()
    }
}
