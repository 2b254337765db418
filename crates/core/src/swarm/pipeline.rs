//! # Pipeline Stages
//!
//! The four ordered stages of the document pipeline and the per-invocation
//! status machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four generation steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Business description of the idea
    About,
    /// Engineering standards
    Standards,
    /// System architecture
    Architecture,
    /// Implementation plan
    Plan,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 4] = [
        Stage::About,
        Stage::Standards,
        Stage::Architecture,
        Stage::Plan,
    ];

    /// Resolve a stage from its 1-based step number
    pub fn from_step(step: u8) -> Option<Self> {
        match step {
            1 => Some(Self::About),
            2 => Some(Self::Standards),
            3 => Some(Self::Architecture),
            4 => Some(Self::Plan),
            _ => None,
        }
    }

    /// 1-based step number
    pub fn step(&self) -> u8 {
        match self {
            Self::About => 1,
            Self::Standards => 2,
            Self::Architecture => 3,
            Self::Plan => 4,
        }
    }

    /// Zero-based slot, used by lookup tables
    pub fn index(&self) -> usize {
        self.step() as usize - 1
    }

    /// Document type persisted for this stage
    pub fn document_type(&self) -> &'static str {
        match self {
            Self::About => "about",
            Self::Standards => "standards",
            Self::Architecture => "architecture",
            Self::Plan => "plan",
        }
    }

    pub fn from_document_type(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.document_type() == s)
    }

    /// Agent identifier recorded in the audit trail and used for model routing
    pub fn agent_type(&self) -> &'static str {
        match self {
            Self::About => "business_analyst",
            Self::Standards => "standards_engineer",
            Self::Architecture => "architect",
            Self::Plan => "planner",
        }
    }

    /// Stage whose success is a precondition for this one
    pub fn previous(&self) -> Option<Stage> {
        match self {
            Self::About => None,
            Self::Standards => Some(Self::About),
            Self::Architecture => Some(Self::Standards),
            Self::Plan => Some(Self::Architecture),
        }
    }

    /// All stages that come before this one, oldest first
    pub fn predecessors(&self) -> Vec<Stage> {
        Self::ALL
            .into_iter()
            .take_while(|s| s.step() < self.step())
            .collect()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.document_type())
    }
}

/// Status of a single stage invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}
