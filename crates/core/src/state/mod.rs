pub mod db;
pub mod versions;

pub use db::{BlueprintDb, DEFAULT_DB_PATH};
pub use versions::{
    AgentExecution, DocumentVersion, NewVersion, SqliteVersionStore, VersionStore,
};
