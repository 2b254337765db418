//! # Blueprint Models
//!
//! LLM provider configuration, per-agent routing, and the [`ModelClient`]
//! seam every stage agent calls through. The production client runs radkit
//! structured-output functions; tests substitute scripted clients.

use async_trait::async_trait;
use radkit::macros::LLMOutput;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::ModelError;

/// Supported LLM providers
///
/// Each provider loads its key from the environment:
/// - Anthropic - `ANTHROPIC_API_KEY`
/// - OpenAI - `OPENAI_API_KEY`
/// - Gemini - `GEMINI_API_KEY`
/// - OpenRouter - `OPENROUTER_API_KEY`
/// - Grok - `XAI_API_KEY`
/// - DeepSeek - `DEEPSEEK_API_KEY`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    Gemini,
    OpenRouter,
    Grok,
    DeepSeek,
}

impl LlmProvider {
    /// Stable identifier, also used as the circuit-breaker dependency key
    pub fn id(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::OpenAI => "openai",
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenRouter => "openrouter",
            LlmProvider::Grok => "grok",
            LlmProvider::DeepSeek => "deepseek",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_lowercase().as_str() {
            "anthropic" => Some(LlmProvider::Anthropic),
            "openai" => Some(LlmProvider::OpenAI),
            "gemini" => Some(LlmProvider::Gemini),
            "openrouter" => Some(LlmProvider::OpenRouter),
            "grok" => Some(LlmProvider::Grok),
            "deepseek" => Some(LlmProvider::DeepSeek),
            _ => None,
        }
    }

    /// Default model when neither global nor per-agent overrides exist
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "claude-sonnet-4-20250514",
            LlmProvider::OpenAI => "gpt-4o",
            LlmProvider::Gemini => "gemini-2.0-flash-exp",
            LlmProvider::OpenRouter => "anthropic/claude-3.5-sonnet",
            LlmProvider::Grok => "grok-2",
            LlmProvider::DeepSeek => "deepseek-chat",
        }
    }

    /// Whether this provider supports custom base URL
    pub fn supports_base_url(&self) -> bool {
        matches!(self, LlmProvider::OpenAI)
    }
}

/// Resolved provider + model for one agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::with_provider(LlmProvider::Anthropic, LlmProvider::Anthropic.default_model())
    }
}

impl ModelConfig {
    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: None,
        }
    }
}

/// Global and per-agent model selection
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ModelRouting {
    pub global_provider: LlmProvider,
    pub global_model: Option<String>,
    /// Base URL override for LLM API (OpenAI-compatible endpoints)
    pub base_url: Option<String>,
    /// agent_type -> model name
    pub per_agent_models: HashMap<String, String>,
    /// agent_type -> provider
    pub per_agent_providers: HashMap<String, LlmProvider>,
}

impl ModelRouting {
    /// Replace the global provider by its id, e.g. from `BLUEPRINT_PROVIDER`
    pub fn override_provider(&mut self, id: &str) -> anyhow::Result<()> {
        let provider = LlmProvider::from_id(id.trim())
            .ok_or_else(|| anyhow::anyhow!("unknown LLM provider `{}`", id))?;
        if provider != self.global_provider {
            // The old global model belongs to the old provider
            self.global_model = None;
        }
        self.global_provider = provider;
        Ok(())
    }

    /// Resolve the model config for `agent_type`: per-agent override, then
    /// global, then the provider default
    pub fn resolve(&self, agent_type: &str) -> ModelConfig {
        let provider = self
            .per_agent_providers
            .get(agent_type)
            .cloned()
            .unwrap_or_else(|| self.global_provider.clone());

        let model = self
            .per_agent_models
            .get(agent_type)
            .or(self.global_model.as_ref())
            .cloned()
            .unwrap_or_else(|| provider.default_model().to_string());

        let base_url = if provider.supports_base_url() {
            self.base_url.clone()
        } else {
            None
        };

        ModelConfig {
            provider,
            model,
            base_url,
        }
    }
}

/// A heading + body pair produced by the model
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput, PartialEq)]
pub struct DocumentSection {
    /// Section heading, without leading `#`
    pub heading: String,
    /// Markdown body of the section
    pub body: String,
}

/// Structured document returned by every generation call
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput, PartialEq)]
pub struct GeneratedDocument {
    /// Document title
    pub title: String,
    /// Ordered sections
    pub sections: Vec<DocumentSection>,
    /// Self-assessed completeness (0.0 - 1.0)
    pub confidence: f32,
}

/// One model call, fully rendered by an agent
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub agent_type: &'static str,
    /// Role instructions plus per-invocation guidance (language, required sections)
    pub system_prompt: String,
    /// User message: input fields and retrieved context
    pub prompt: String,
}

/// External model dependency
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Name of the external dependency serving `agent_type`; breakers are keyed by it
    fn dependency(&self, agent_type: &str) -> String;

    async fn generate(&self, request: &ModelRequest) -> Result<GeneratedDocument, ModelError>;
}

/// Production client backed by radkit providers
#[derive(Debug, Clone, Default)]
pub struct RadkitModelClient {
    routing: ModelRouting,
}

impl RadkitModelClient {
    pub fn new(routing: ModelRouting) -> Self {
        Self { routing }
    }
}

#[async_trait]
impl ModelClient for RadkitModelClient {
    fn dependency(&self, agent_type: &str) -> String {
        self.routing.resolve(agent_type).provider.id().to_string()
    }

    async fn generate(&self, request: &ModelRequest) -> Result<GeneratedDocument, ModelError> {
        let config = self.routing.resolve(request.agent_type);
        tracing::debug!(
            agent = request.agent_type,
            provider = config.provider.id(),
            model = %config.model,
            "calling model"
        );

        run_structured(&config, request.system_prompt.clone(), request.prompt.clone())
            .await
            .map_err(|e| classify_provider_error(&format!("{:#}", e)))
    }
}

/// Run a radkit structured-output function against whichever provider is configured
async fn run_structured(
    config: &ModelConfig,
    system_prompt: String,
    input: String,
) -> anyhow::Result<GeneratedDocument> {
    use radkit::agent::LlmFunction;
    use radkit::models::providers::{
        AnthropicLlm, DeepSeekLlm, GeminiLlm, GrokLlm, OpenAILlm, OpenRouterLlm,
    };

    macro_rules! call_with {
        ($llm:expr) => {{
            let func =
                LlmFunction::<GeneratedDocument>::new_with_system_instructions($llm, system_prompt);
            func.run(input).await.map_err(Into::into)
        }};
    }

    match config.provider {
        LlmProvider::Anthropic => call_with!(AnthropicLlm::from_env(&config.model)?),
        LlmProvider::OpenAI => {
            let mut llm = OpenAILlm::from_env(&config.model)?;
            if let Some(base_url) = &config.base_url {
                llm = llm.with_base_url(base_url);
            }
            call_with!(llm)
        }
        LlmProvider::Gemini => call_with!(GeminiLlm::from_env(&config.model)?),
        LlmProvider::OpenRouter => call_with!(OpenRouterLlm::from_env(&config.model)?),
        LlmProvider::Grok => call_with!(GrokLlm::from_env(&config.model)?),
        LlmProvider::DeepSeek => call_with!(DeepSeekLlm::from_env(&config.model)?),
    }
}

/// Sort a provider failure into transient (retry) or fatal (propagate)
pub fn classify_provider_error(message: &str) -> ModelError {
    static TRANSIENT: OnceLock<Regex> = OnceLock::new();
    static FATAL: OnceLock<Regex> = OnceLock::new();

    let transient = TRANSIENT.get_or_init(|| {
        Regex::new(
            r"(?i)\b(5\d\d|429|408)\b|timed? ?out|rate.?limit|overloaded|connection (reset|refused|closed)|temporarily unavailable",
        )
        .expect("transient pattern is valid")
    });
    let fatal = FATAL.get_or_init(|| {
        Regex::new(
            r"(?i)\b(400|401|403|404|422)\b|api.?key|unauthori[sz]ed|invalid request|not found|environment variable",
        )
        .expect("fatal pattern is valid")
    });

    if transient.is_match(message) {
        ModelError::Transient(message.to_string())
    } else if fatal.is_match(message) {
        ModelError::Fatal(message.to_string())
    } else {
        // Unknown failures get the benefit of the doubt
        ModelError::Transient(message.to_string())
    }
}
