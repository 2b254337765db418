//! # Stage Orchestration
//!
//! Sequencing, execution context, and progress streaming for the
//! four-stage document pipeline.
//!
//! ## Pipeline Flow
//!
//! ```text
//! about (business_analyst) → standards (standards_engineer) → architecture (architect) → plan (planner)
//! ```
//!
//! Each arrow is a separate caller-initiated `run_stage`.

pub mod bus;
pub mod context;
pub mod coordinator;
pub mod events;
pub mod pipeline;

pub use bus::{ProgressBus, ProgressSink, Subscription};
pub use context::{ExecutionContext, ExecutionContextBuilder, ProjectScope, DEFAULT_LANGUAGE};
pub use coordinator::{
    Coordinator, CoordinatorConfig, ProjectLocks, StageOutcome, StageRequest,
    DEFAULT_CONFIG_PATH,
};
pub use events::{EventType, ProgressEvent, ProgressKind};
pub use pipeline::{Stage, StageStatus};
