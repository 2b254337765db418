//! # Architecture Skill
//!
//! Stage 3. Designs the system from the `about` and `standards` documents.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ValidationError;
use crate::skills::contract::{
    parse_raw, prior_content, render_context, AgentInput, ArchitectureInput, PriorDocuments,
    StageAgent, StagePayload,
};
use crate::skills::prompts;
use crate::swarm::pipeline::Stage;

const REQUIRED_SECTIONS: &[&str] = &[
    "System Overview",
    "Components",
    "Data Model",
    "Technology Stack",
    "Deployment",
];

#[derive(Debug, Default, Deserialize)]
struct ArchitectureRequest {
    #[serde(default)]
    constraints: Option<String>,
}

/// Architect agent
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchitectureSkill;

impl StageAgent for ArchitectureSkill {
    fn stage(&self) -> Stage {
        Stage::Architecture
    }

    fn instructions(&self) -> &'static str {
        prompts::ARCHITECTURE
    }

    fn required_sections(&self) -> &'static [&'static str] {
        REQUIRED_SECTIONS
    }

    fn parse_input(
        &self,
        raw: &Value,
        prior: &PriorDocuments,
    ) -> Result<StagePayload, ValidationError> {
        let request: ArchitectureRequest = parse_raw(raw)?;
        Ok(StagePayload::Architecture(ArchitectureInput {
            about: prior_content(prior, Stage::About)?,
            standards: prior_content(prior, Stage::Standards)?,
            constraints: request.constraints,
        }))
    }

    fn render_prompt(&self, input: &AgentInput) -> String {
        let StagePayload::Architecture(arch) = &input.payload else {
            return String::new();
        };

        let mut prompt = format!(
            "Business description:\n\n{}\n\nEngineering standards:\n\n{}\n",
            arch.about.trim(),
            arch.standards.trim()
        );
        if let Some(constraints) = arch.constraints.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str(&format!("\nConstraints:\n{}\n", constraints.trim()));
        }
        prompt.push_str(&render_context(&input.context));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_needs_both_earlier_documents() {
        let skill = ArchitectureSkill;
        let mut prior = PriorDocuments::new();
        prior.insert(Stage::About, "about".to_string());
        assert!(skill.parse_input(&Value::Null, &prior).is_err());

        prior.insert(Stage::Standards, "standards".to_string());
        let payload = skill.parse_input(&Value::Null, &prior).unwrap();
        assert_eq!(payload.stage(), Stage::Architecture);
    }

    #[test]
    fn test_constraints_must_be_a_string() {
        let skill = ArchitectureSkill;
        let mut prior = PriorDocuments::new();
        prior.insert(Stage::About, "about".to_string());
        prior.insert(Stage::Standards, "standards".to_string());
        assert!(skill
            .parse_input(&serde_json::json!({"constraints": 42}), &prior)
            .is_err());
    }
}
