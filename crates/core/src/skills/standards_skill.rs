//! # Standards Skill
//!
//! Stage 2. Derives engineering standards from the `about` document.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ValidationError;
use crate::skills::contract::{
    parse_raw, prior_content, render_context, AgentInput, PriorDocuments, StageAgent,
    StagePayload, StandardsInput,
};
use crate::skills::prompts;
use crate::swarm::pipeline::Stage;

const REQUIRED_SECTIONS: &[&str] = &[
    "Coding Standards",
    "Testing",
    "Security",
    "Documentation",
    "Version Control",
];

/// Fields the caller may send for stage 2
#[derive(Debug, Default, Deserialize)]
struct StandardsRequest {
    #[serde(default)]
    preferences: Option<String>,
}

/// Standards engineer agent
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardsSkill;

impl StageAgent for StandardsSkill {
    fn stage(&self) -> Stage {
        Stage::Standards
    }

    fn instructions(&self) -> &'static str {
        prompts::STANDARDS
    }

    fn required_sections(&self) -> &'static [&'static str] {
        REQUIRED_SECTIONS
    }

    fn parse_input(
        &self,
        raw: &Value,
        prior: &PriorDocuments,
    ) -> Result<StagePayload, ValidationError> {
        let request: StandardsRequest = parse_raw(raw)?;
        Ok(StagePayload::Standards(StandardsInput {
            about: prior_content(prior, Stage::About)?,
            preferences: request.preferences,
        }))
    }

    fn render_prompt(&self, input: &AgentInput) -> String {
        let StagePayload::Standards(standards) = &input.payload else {
            return String::new();
        };

        let mut prompt = format!("Business description:\n\n{}\n", standards.about.trim());
        if let Some(preferences) = standards
            .preferences
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            prompt.push_str(&format!("\nTeam preferences:\n{}\n", preferences.trim()));
        }
        prompt.push_str(&render_context(&input.context));
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_input_needs_about_document() {
        let skill = StandardsSkill;
        let err = skill
            .parse_input(&Value::Null, &PriorDocuments::new())
            .unwrap_err();
        assert!(err.message.contains("about"));

        let mut prior = PriorDocuments::new();
        prior.insert(Stage::About, "# Streak\n".to_string());
        let payload = skill
            .parse_input(&json!({"preferences": "Rust, trunk-based"}), &prior)
            .unwrap();
        match payload {
            StagePayload::Standards(input) => {
                assert_eq!(input.about, "# Streak\n");
                assert_eq!(input.preferences.as_deref(), Some("Rust, trunk-based"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_prompt_carries_about_document() {
        let skill = StandardsSkill;
        let input = AgentInput::new(
            StagePayload::Standards(StandardsInput {
                about: "# Streak\n\nA habit tracker".to_string(),
                preferences: None,
            }),
            vec![],
        );
        assert!(skill.render_prompt(&input).contains("A habit tracker"));
    }
}
