//! # Business Skill
//!
//! Stage 1. Turns a raw product idea into the `about` document.

use serde_json::Value;

use crate::error::ValidationError;
use crate::skills::contract::{
    parse_raw, render_context, AboutInput, AgentInput, PriorDocuments, StageAgent, StagePayload,
};
use crate::skills::prompts;
use crate::swarm::pipeline::Stage;

const REQUIRED_SECTIONS: &[&str] = &[
    "Overview",
    "Problem",
    "Target Users",
    "Value Proposition",
    "Core Features",
];

/// Business analyst agent
#[derive(Debug, Clone, Copy, Default)]
pub struct BusinessSkill;

impl StageAgent for BusinessSkill {
    fn stage(&self) -> Stage {
        Stage::About
    }

    fn instructions(&self) -> &'static str {
        prompts::ABOUT
    }

    fn required_sections(&self) -> &'static [&'static str] {
        REQUIRED_SECTIONS
    }

    fn parse_input(
        &self,
        raw: &Value,
        _prior: &PriorDocuments,
    ) -> Result<StagePayload, ValidationError> {
        let input: AboutInput = parse_raw(raw)?;
        Ok(StagePayload::About(input))
    }

    fn render_prompt(&self, input: &AgentInput) -> String {
        let StagePayload::About(about) = &input.payload else {
            return String::new();
        };

        let mut prompt = format!("Product idea:\n{}\n", about.idea_description.trim());
        if let Some(name) = about.project_name.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str(&format!("\nProject name: {}\n", name.trim()));
        }
        if let Some(audience) = about
            .target_audience
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            prompt.push_str(&format!("\nIntended audience: {}\n", audience.trim()));
        }
        prompt.push_str(&render_context(&input.context));
        prompt
    }
}
