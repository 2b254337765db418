//! # Blueprint Core
//!
//! Orchestration engine that turns a product idea into four versioned
//! documents: `about`, `standards`, `architecture` and `plan`.
//!
//! ## Architecture
//!
//! - `swarm/` - Coordinator, execution context, progress bus
//! - `skills/` - The four stage agents and their typed contract
//! - `resilience/` - Retry with backoff and per-dependency circuit breakers
//! - `memory/` - Tenant/project-scoped context retrieval
//! - `state/` - SQLite persistence for versions and the execution audit trail
//! - `models` - LLM provider routing and the `ModelClient` seam
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use blueprint_core::{memory::SqliteContextStore, models::RadkitModelClient, state::*, swarm::*};
//!
//! let db = BlueprintDb::open()?;
//! let config = CoordinatorConfig::load();
//! let coordinator = Coordinator::new(
//!     config.clone(),
//!     Arc::new(SqliteVersionStore::new(&db)),
//!     Arc::new(SqliteContextStore::with_hashing(&db)),
//!     Arc::new(ProgressBus::default()),
//!     Arc::new(RadkitModelClient::new(config.routing)),
//! );
//! let ctx = ExecutionContext::new("tenant", "project", 1)?;
//! let outcome = coordinator
//!     .run_stage(&ctx, StageRequest { input: serde_json::json!({"idea_description": "…"}), ..Default::default() })
//!     .await?;
//! ```

pub mod error;
pub mod memory;
pub mod models;
pub mod resilience;
pub mod skills;
pub mod state;
pub mod swarm;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{PublicError, StageError};
