//! # Blueprint Database
//!
//! Single SQLite database shared by the version store and the context store.
//! Lives at `.blueprint/blueprint.db` unless a path is given.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 2;

/// Default on-disk location
pub const DEFAULT_DB_PATH: &str = ".blueprint/blueprint.db";

/// Shared database handle
#[derive(Clone)]
pub struct BlueprintDb {
    conn: Arc<Mutex<Connection>>,
}

impl BlueprintDb {
    /// Open or create the database at `.blueprint/blueprint.db`
    pub fn open() -> Result<Self> {
        Self::open_at(DEFAULT_DB_PATH)
    }

    /// Open database at a specific path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).with_context(|| {
            format!(
                "Failed to open blueprint database at {}",
                path.as_ref().display()
            )
        })?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .context("Failed to configure connection")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a shared connection for use by other modules
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }
        if current_version < 2 {
            migrate_v2(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [2],
            )?;
        }

        tracing::debug!("BlueprintDb at schema version {}", SCHEMA_VERSION);
        Ok(())
    }
}

/// Version 1: document versions and the execution audit trail
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS document_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            document_type TEXT NOT NULL,
            version INTEGER NOT NULL CHECK (version >= 1),
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            correlation_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (tenant_id, project_id, document_type, version)
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS agent_executions (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            agent_type TEXT NOT NULL,
            step INTEGER NOT NULL CHECK (step BETWEEN 1 AND 4),
            correlation_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            input_snapshot TEXT NOT NULL DEFAULT '{}',
            output_snapshot TEXT,
            error TEXT,
            started_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_executions_project ON agent_executions(tenant_id, project_id, started_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_executions_correlation ON agent_executions(correlation_id)",
        [],
    )?;

    tracing::info!("BlueprintDb migrated to schema version 1");
    Ok(())
}

/// Version 2: context chunks for semantic retrieval
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS context_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT NOT NULL,
            project_id TEXT NOT NULL,
            chunk_type TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )
        "#,
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_context_scope ON context_chunks(tenant_id, project_id)",
        [],
    )?;

    tracing::info!("BlueprintDb migrated to schema version 2");
    Ok(())
}
