//! Shared application state

use std::sync::Arc;

use blueprint_core::memory::SqliteContextStore;
use blueprint_core::models::ModelClient;
use blueprint_core::state::{BlueprintDb, SqliteVersionStore, VersionStore};
use blueprint_core::swarm::{Coordinator, CoordinatorConfig, ProgressBus};

/// Everything a handler can reach
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    /// Subscribed to by the SSE stream; the coordinator publishes into it
    pub bus: Arc<ProgressBus>,
    pub versions: Arc<dyn VersionStore>,
    pub context: Arc<SqliteContextStore>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the coordinator and its adapters over one database
    pub fn new(config: CoordinatorConfig, db: &BlueprintDb, model: Arc<dyn ModelClient>) -> Self {
        let bus = Arc::new(ProgressBus::default());
        let versions: Arc<dyn VersionStore> = Arc::new(SqliteVersionStore::new(db));
        let context = Arc::new(SqliteContextStore::with_hashing(db));

        let coordinator = Coordinator::new(
            config,
            Arc::clone(&versions),
            context.clone(),
            bus.clone(),
            model,
        );

        Self {
            coordinator: Arc::new(coordinator),
            bus,
            versions,
            context,
        }
    }
}
