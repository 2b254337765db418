//! # Version Store
//!
//! Append-only document versions plus the agent execution audit trail.
//!
//! Versions for a `(tenant, project, document_type)` are numbered `1..N` with
//! no gaps: the next number is computed inside the same transaction that
//! inserts the row and marks the execution succeeded, so a failed stage never
//! consumes a number.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::db::BlueprintDb;
use crate::error::PersistenceError;
use crate::swarm::context::ExecutionContext;
use crate::swarm::pipeline::StageStatus;

/// Immutable persisted output of a stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentVersion {
    pub tenant_id: String,
    pub project_id: String,
    pub document_type: String,
    pub version: u32,
    pub content: String,
    pub metadata: Value,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

/// Version payload handed to [`VersionStore::commit_success`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewVersion {
    pub document_type: String,
    pub content: String,
    pub metadata: Value,
}

/// Audit record of one stage invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentExecution {
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub agent_type: String,
    pub step: u8,
    pub correlation_id: String,
    pub status: StageStatus,
    pub attempts: u32,
    pub input_snapshot: Value,
    pub output_snapshot: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Relational store for versions and executions
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Highest version of a document, if any
    async fn latest(
        &self,
        tenant_id: &str,
        project_id: &str,
        document_type: &str,
    ) -> Result<Option<DocumentVersion>, PersistenceError>;

    /// All versions of a document, oldest first
    async fn list_versions(
        &self,
        tenant_id: &str,
        project_id: &str,
        document_type: &str,
    ) -> Result<Vec<DocumentVersion>, PersistenceError>;

    /// Insert a `pending` execution row
    async fn begin_execution(
        &self,
        ctx: &ExecutionContext,
        agent_type: &str,
        input_snapshot: &Value,
    ) -> Result<AgentExecution, PersistenceError>;

    /// `pending -> running`
    async fn mark_running(&self, execution_id: &str) -> Result<(), PersistenceError>;

    /// Append the next version and mark the execution `succeeded`, atomically
    async fn commit_success(
        &self,
        execution_id: &str,
        attempts: u32,
        version: NewVersion,
        output_snapshot: &Value,
    ) -> Result<DocumentVersion, PersistenceError>;

    /// Mark the execution `failed`
    async fn record_failure(
        &self,
        execution_id: &str,
        attempts: u32,
        error: &str,
    ) -> Result<(), PersistenceError>;

    /// Executions of a project, newest first
    async fn list_executions(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> Result<Vec<AgentExecution>, PersistenceError>;

    async fn get_execution(
        &self,
        tenant_id: &str,
        execution_id: &str,
    ) -> Result<Option<AgentExecution>, PersistenceError>;
}

/// SQLite-backed version store using the shared [`BlueprintDb`] connection
pub struct SqliteVersionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVersionStore {
    pub fn new(db: &BlueprintDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn
            .lock()
            .map_err(|e| PersistenceError(format!("Lock error: {}", e)))
    }
}

const VERSION_COLUMNS: &str =
    "tenant_id, project_id, document_type, version, content, metadata_json, correlation_id, created_at";

const EXECUTION_COLUMNS: &str = "id, tenant_id, project_id, agent_type, step, correlation_id, status, attempts, input_snapshot, output_snapshot, started_at, completed_at, error";

fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json(idx: usize, raw: String) -> rusqlite::Result<Value> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentVersion> {
    Ok(DocumentVersion {
        tenant_id: row.get(0)?,
        project_id: row.get(1)?,
        document_type: row.get(2)?,
        version: row.get(3)?,
        content: row.get(4)?,
        metadata: parse_json(5, row.get(5)?)?,
        correlation_id: row.get(6)?,
        created_at: parse_ts(7, row.get(7)?)?,
    })
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<AgentExecution> {
    let status: String = row.get(6)?;
    let output: Option<String> = row.get(9)?;
    let completed: Option<String> = row.get(11)?;
    Ok(AgentExecution {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        project_id: row.get(2)?,
        agent_type: row.get(3)?,
        step: row.get(4)?,
        correlation_id: row.get(5)?,
        status: StageStatus::from_str(&status),
        attempts: row.get(7)?,
        input_snapshot: parse_json(8, row.get(8)?)?,
        output_snapshot: output.map(|o| parse_json(9, o)).transpose()?,
        started_at: parse_ts(10, row.get(10)?)?,
        completed_at: completed.map(|c| parse_ts(11, c)).transpose()?,
        error: row.get(12)?,
    })
}

/// Load an execution and check that it may move to `next`
fn guard_transition(
    conn: &Connection,
    execution_id: &str,
    next: StageStatus,
) -> Result<AgentExecution, PersistenceError> {
    let execution = select_execution(conn, execution_id)?
        .ok_or_else(|| PersistenceError(format!("execution {} not found", execution_id)))?;
    if !execution.status.can_transition_to(next) {
        return Err(PersistenceError(format!(
            "execution {} cannot move from {} to {}",
            execution_id,
            execution.status.as_str(),
            next.as_str()
        )));
    }
    Ok(execution)
}

fn select_execution(
    conn: &Connection,
    execution_id: &str,
) -> Result<Option<AgentExecution>, PersistenceError> {
    let sql = format!(
        "SELECT {} FROM agent_executions WHERE id = ?1",
        EXECUTION_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![execution_id], execution_from_row)
        .optional()?)
}

#[async_trait]
impl VersionStore for SqliteVersionStore {
    async fn latest(
        &self,
        tenant_id: &str,
        project_id: &str,
        document_type: &str,
    ) -> Result<Option<DocumentVersion>, PersistenceError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM document_versions
             WHERE tenant_id = ?1 AND project_id = ?2 AND document_type = ?3
             ORDER BY version DESC LIMIT 1",
            VERSION_COLUMNS
        );
        Ok(conn
            .query_row(
                &sql,
                params![tenant_id, project_id, document_type],
                version_from_row,
            )
            .optional()?)
    }

    async fn list_versions(
        &self,
        tenant_id: &str,
        project_id: &str,
        document_type: &str,
    ) -> Result<Vec<DocumentVersion>, PersistenceError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM document_versions
             WHERE tenant_id = ?1 AND project_id = ?2 AND document_type = ?3
             ORDER BY version ASC",
            VERSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let versions = stmt
            .query_map(params![tenant_id, project_id, document_type], version_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    async fn begin_execution(
        &self,
        ctx: &ExecutionContext,
        agent_type: &str,
        input_snapshot: &Value,
    ) -> Result<AgentExecution, PersistenceError> {
        let execution = AgentExecution {
            id: Uuid::new_v4().to_string(),
            tenant_id: ctx.tenant_id().to_string(),
            project_id: ctx.project_id().to_string(),
            agent_type: agent_type.to_string(),
            step: ctx.step(),
            correlation_id: ctx.correlation_id().to_string(),
            status: StageStatus::Pending,
            attempts: 0,
            input_snapshot: input_snapshot.clone(),
            output_snapshot: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        };

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO agent_executions
                (id, tenant_id, project_id, agent_type, step, correlation_id, status, attempts, input_snapshot, started_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9)
            "#,
            params![
                execution.id,
                execution.tenant_id,
                execution.project_id,
                execution.agent_type,
                execution.step,
                execution.correlation_id,
                execution.status.as_str(),
                serde_json::to_string(input_snapshot)?,
                execution.started_at.to_rfc3339(),
            ],
        )?;

        tracing::debug!(
            execution_id = %execution.id,
            correlation_id = %execution.correlation_id,
            "execution recorded as pending"
        );
        Ok(execution)
    }

    async fn mark_running(&self, execution_id: &str) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        guard_transition(&conn, execution_id, StageStatus::Running)?;
        conn.execute(
            "UPDATE agent_executions SET status = 'running' WHERE id = ?1",
            params![execution_id],
        )?;
        Ok(())
    }

    async fn commit_success(
        &self,
        execution_id: &str,
        attempts: u32,
        version: NewVersion,
        output_snapshot: &Value,
    ) -> Result<DocumentVersion, PersistenceError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let execution = guard_transition(&tx, execution_id, StageStatus::Succeeded)?;

        let next: u32 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM document_versions
             WHERE tenant_id = ?1 AND project_id = ?2 AND document_type = ?3",
            params![
                execution.tenant_id,
                execution.project_id,
                version.document_type
            ],
            |row| row.get(0),
        )?;

        let now = Utc::now();
        let document = DocumentVersion {
            tenant_id: execution.tenant_id.clone(),
            project_id: execution.project_id.clone(),
            document_type: version.document_type,
            version: next,
            content: version.content,
            metadata: version.metadata,
            correlation_id: execution.correlation_id.clone(),
            created_at: now,
        };

        tx.execute(
            &format!(
                "INSERT INTO document_versions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                VERSION_COLUMNS
            ),
            params![
                document.tenant_id,
                document.project_id,
                document.document_type,
                document.version,
                document.content,
                serde_json::to_string(&document.metadata)?,
                document.correlation_id,
                now.to_rfc3339(),
            ],
        )?;

        tx.execute(
            r#"
            UPDATE agent_executions
            SET status = 'succeeded', attempts = ?2, output_snapshot = ?3, completed_at = ?4
            WHERE id = ?1
            "#,
            params![
                execution_id,
                attempts,
                serde_json::to_string(output_snapshot)?,
                now.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(document)
    }

    async fn record_failure(
        &self,
        execution_id: &str,
        attempts: u32,
        error: &str,
    ) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        guard_transition(&conn, execution_id, StageStatus::Failed)?;
        conn.execute(
            r#"
            UPDATE agent_executions
            SET status = 'failed', attempts = ?2, error = ?3, completed_at = ?4
            WHERE id = ?1
            "#,
            params![execution_id, attempts, error, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn list_executions(
        &self,
        tenant_id: &str,
        project_id: &str,
    ) -> Result<Vec<AgentExecution>, PersistenceError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM agent_executions
             WHERE tenant_id = ?1 AND project_id = ?2
             ORDER BY started_at DESC, rowid DESC",
            EXECUTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let executions = stmt
            .query_map(params![tenant_id, project_id], execution_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(executions)
    }

    async fn get_execution(
        &self,
        tenant_id: &str,
        execution_id: &str,
    ) -> Result<Option<AgentExecution>, PersistenceError> {
        let conn = self.lock()?;
        Ok(select_execution(&conn, execution_id)?.filter(|e| e.tenant_id == tenant_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn store() -> SqliteVersionStore {
        SqliteVersionStore::new(&BlueprintDb::open_in_memory().unwrap())
    }

    fn about(content: &str) -> NewVersion {
        NewVersion {
            document_type: "about".to_string(),
            content: content.to_string(),
            metadata: json!({}),
        }
    }

    async fn succeed(store: &SqliteVersionStore, tenant: &str, project: &str, content: &str) -> DocumentVersion {
        let ctx = ExecutionContext::new(tenant, project, 1).unwrap();
        let exec = store
            .begin_execution(&ctx, "business_analyst", &json!({"idea": content}))
            .await
            .unwrap();
        store.mark_running(&exec.id).await.unwrap();
        store
            .commit_success(&exec.id, 1, about(content), &json!({}))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_versions_are_gapless_across_failures() {
        let store = store();
        succeed(&store, "t1", "p1", "one").await;

        // A failed execution in between must not consume a number
        let ctx = ExecutionContext::new("t1", "p1", 1).unwrap();
        let failed = store
            .begin_execution(&ctx, "business_analyst", &json!({}))
            .await
            .unwrap();
        store.mark_running(&failed.id).await.unwrap();
        store.record_failure(&failed.id, 3, "boom").await.unwrap();

        succeed(&store, "t1", "p1", "two").await;

        let versions: Vec<u32> = store
            .list_versions("t1", "p1", "about")
            .await
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_tenants_with_colliding_project_ids_are_isolated() {
        let store = store();
        succeed(&store, "tenant-a", "shared", "from a").await;
        succeed(&store, "tenant-b", "shared", "from b").await;
        succeed(&store, "tenant-b", "shared", "from b again").await;

        let a = store.latest("tenant-a", "shared", "about").await.unwrap().unwrap();
        assert_eq!(a.version, 1);
        assert_eq!(a.content, "from a");

        let b = store.list_versions("tenant-b", "shared", "about").await.unwrap();
        assert_eq!(b.len(), 2);
        assert!(b.iter().all(|v| v.tenant_id == "tenant-b"));

        let a_execs = store.list_executions("tenant-a", "shared").await.unwrap();
        assert_eq!(a_execs.len(), 1);
        assert!(store
            .get_execution("tenant-b", &a_execs[0].id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_execution_state_machine() {
        let store = store();
        let ctx = ExecutionContext::new("t", "p", 1).unwrap();
        let exec = store
            .begin_execution(&ctx, "business_analyst", &json!({"k": "v"}))
            .await
            .unwrap();

        // Cannot commit before running
        assert_err!(
            store
                .commit_success(&exec.id, 1, about("x"), &json!({}))
                .await
        );

        assert_ok!(store.mark_running(&exec.id).await);
        assert_ok!(store.record_failure(&exec.id, 2, "model down").await);

        // Terminal states are final
        assert_err!(store.record_failure(&exec.id, 2, "again").await);
        assert_err!(store.mark_running(&exec.id).await);

        let stored = store.get_execution("t", &exec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, StageStatus::Failed);
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.error.as_deref(), Some("model down"));
        assert_eq!(stored.input_snapshot, json!({"k": "v"}));
        assert!(stored.completed_at.is_some());
        assert!(store.latest("t", "p", "about").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_execution_can_fail_but_not_succeed() {
        let store = store();
        let ctx = ExecutionContext::new("t", "p", 1).unwrap();
        let exec = store
            .begin_execution(&ctx, "business_analyst", &json!({}))
            .await
            .unwrap();

        assert_ok!(store.record_failure(&exec.id, 0, "setup failed").await);
        assert_err!(
            store
                .commit_success(&exec.id, 1, about("x"), &json!({}))
                .await
        );
        assert_err!(store.mark_running("missing-id").await);

        let stored = store.get_execution("t", &exec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, StageStatus::Failed);
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test]
    async fn test_commit_records_output_and_correlation() {
        let store = store();
        let doc = succeed(&store, "t", "p", "content").await;
        let execs = store.list_executions("t", "p").await.unwrap();

        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].status, StageStatus::Succeeded);
        assert_eq!(execs[0].correlation_id, doc.correlation_id);
        assert_eq!(execs[0].output_snapshot, Some(json!({})));
    }
}
