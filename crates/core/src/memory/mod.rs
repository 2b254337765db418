//! # Memory Module
//!
//! Scoped semantic retrieval of prior project content.
//!
//! ## Architecture
//!
//! ```text
//! Coordinator ──query(tenant, project, text, k)──▶ ContextStore
//!                                                     │
//!                                     SqliteContextStore (SQL scope filter)
//!                                                     │
//!                                         Embedder → cosine ranking
//! ```

pub mod context_store;
pub mod embedding;
pub mod sqlite_context;

pub use context_store::{require_scope, ContextChunk, ContextStore};
pub use embedding::{cosine_similarity, Embedder, HashingEmbedder};
pub use sqlite_context::SqliteContextStore;
