//! # Plan Skill
//!
//! Stage 4. Breaks the design into milestones and tasks.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ValidationError;
use crate::skills::contract::{
    parse_raw, prior_content, render_context, AgentInput, PlanInput, PriorDocuments, StageAgent,
    StagePayload,
};
use crate::skills::prompts;
use crate::swarm::pipeline::Stage;

const REQUIRED_SECTIONS: &[&str] = &["Milestones", "Tasks", "Dependencies", "Risks"];

#[derive(Debug, Default, Deserialize)]
struct PlanRequest {
    #[serde(default)]
    timeline: Option<String>,
}

/// Planner agent
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanSkill;

impl StageAgent for PlanSkill {
    fn stage(&self) -> Stage {
        Stage::Plan
    }

    fn instructions(&self) -> &'static str {
        prompts::PLAN
    }

    fn required_sections(&self) -> &'static [&'static str] {
        REQUIRED_SECTIONS
    }

    fn parse_input(
        &self,
        raw: &Value,
        prior: &PriorDocuments,
    ) -> Result<StagePayload, ValidationError> {
        let request: PlanRequest = parse_raw(raw)?;
        Ok(StagePayload::Plan(PlanInput {
            about: prior_content(prior, Stage::About)?,
            standards: prior_content(prior, Stage::Standards)?,
            architecture: prior_content(prior, Stage::Architecture)?,
            timeline: request.timeline,
        }))
    }

    fn render_prompt(&self, input: &AgentInput) -> String {
        let StagePayload::Plan(plan) = &input.payload else {
            return String::new();
        };

        let mut prompt = format!(
            "Business description:\n\n{}\n\nEngineering standards:\n\n{}\n\nArchitecture:\n\n{}\n",
            plan.about.trim(),
            plan.standards.trim(),
            plan.architecture.trim()
        );
        if let Some(timeline) = plan.timeline.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str(&format!("\nTarget timeline: {}\n", timeline.trim()));
        }
        prompt.push_str(&render_context(&input.context));
        prompt
    }
}
