//! # Blueprint Skills
//!
//! The four generation agents and the contract they share.
//!
//! ## Architecture
//!
//! ```text
//! AgentRegistry[step]
//!   └── StageAgent (parse_input → validate_input → process → validate)
//!         └── ModelClient (radkit structured output)
//! ```
//!
//! | Step | Skill | Document |
//! |------|-------|----------|
//! | 1 | `BusinessSkill` | `about` |
//! | 2 | `StandardsSkill` | `standards` |
//! | 3 | `ArchitectureSkill` | `architecture` |
//! | 4 | `PlanSkill` | `plan` |

pub mod contract;
pub mod prompts;

pub mod architecture_skill;
pub mod business_skill;
pub mod plan_skill;
pub mod standards_skill;

pub use architecture_skill::ArchitectureSkill;
pub use business_skill::BusinessSkill;
pub use contract::{
    AboutInput, AgentInput, AgentOutput, AgentRegistry, ArchitectureInput, PlanInput,
    PriorDocuments, StageAgent, StagePayload, StandardsInput, SCHEMA_VERSION,
};
pub use plan_skill::PlanSkill;
pub use standards_skill::StandardsSkill;
