//! Prompt templates bundled at compile time.
//!
//! The coordinator appends the output language and the required section list
//! to these at invocation time.

/// Business Analyst - stage 1, `about`
pub const ABOUT: &str = include_str!("defaults/about.md");

/// Standards Engineer - stage 2, `standards`
pub const STANDARDS: &str = include_str!("defaults/standards.md");

/// Architect - stage 3, `architecture`
pub const ARCHITECTURE: &str = include_str!("defaults/architecture.md");

/// Planner - stage 4, `plan`
pub const PLAN: &str = include_str!("defaults/plan.md");

/// All templates keyed by document type
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("about", ABOUT),
        ("standards", STANDARDS),
        ("architecture", ARCHITECTURE),
        ("plan", PLAN),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::AgentRegistry;
    use crate::swarm::pipeline::Stage;

    #[test]
    fn test_all_prompts_non_empty() {
        for (slug, content) in all_defaults() {
            assert!(!content.is_empty(), "Prompt '{}' should not be empty", slug);
            assert!(content.len() > 50, "Prompt '{}' seems too short", slug);
        }
    }

    #[test]
    fn test_prompts_mention_required_sections() {
        let registry = AgentRegistry::standard();
        for (slug, content) in all_defaults() {
            let stage = Stage::from_document_type(slug).unwrap();
            for section in registry.get(stage).required_sections() {
                assert!(
                    content.contains(section),
                    "Prompt '{}' should describe section '{}'",
                    slug,
                    section
                );
            }
        }
    }
}
