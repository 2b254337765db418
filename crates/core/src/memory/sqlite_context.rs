//! # SQLite Context Store
//!
//! Reference backing for [`ContextStore`] on the shared `BlueprintDb`
//! connection. The tenant/project filter runs in SQL; ranking is cosine
//! similarity over stored embeddings.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

use super::context_store::{require_scope, ContextChunk, ContextStore};
use super::embedding::{cosine_similarity, Embedder, HashingEmbedder};
use crate::error::ContextError;
use crate::state::db::BlueprintDb;

/// SQLite-backed context store
pub struct SqliteContextStore {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn Embedder>,
}

impl SqliteContextStore {
    pub fn new(db: &BlueprintDb, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            conn: db.connection(),
            embedder,
        }
    }

    /// Store with the default [`HashingEmbedder`]
    pub fn with_hashing(db: &BlueprintDb) -> Self {
        Self::new(db, Arc::new(HashingEmbedder::default()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ContextError> {
        self.conn
            .lock()
            .map_err(|e| ContextError::Backend(format!("Lock error: {}", e)))
    }

    /// Add a chunk. Used by external collaborators, never by the coordinator.
    pub fn ingest(
        &self,
        tenant_id: &str,
        project_id: &str,
        chunk_type: &str,
        content: &str,
    ) -> Result<i64, ContextError> {
        require_scope(tenant_id, project_id)?;
        let embedding = serde_json::to_string(&self.embedder.embed(content))
            .map_err(|e| ContextError::Backend(e.to_string()))?;

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO context_chunks (tenant_id, project_id, chunk_type, content, embedding_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                tenant_id,
                project_id,
                chunk_type,
                content,
                embedding,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(backend)?;

        Ok(conn.last_insert_rowid())
    }

    /// Number of chunks stored for a project
    pub fn count(&self, tenant_id: &str, project_id: &str) -> Result<i64, ContextError> {
        require_scope(tenant_id, project_id)?;
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM context_chunks WHERE tenant_id = ?1 AND project_id = ?2",
            params![tenant_id, project_id],
            |row| row.get(0),
        )
        .map_err(backend)
    }
}

fn backend(e: rusqlite::Error) -> ContextError {
    ContextError::Backend(e.to_string())
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    async fn query(
        &self,
        tenant_id: &str,
        project_id: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<ContextChunk>, ContextError> {
        require_scope(tenant_id, project_id)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(text);
        let rows: Vec<(String, String, String)> = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT chunk_type, content, embedding_json
                    FROM context_chunks
                    WHERE tenant_id = ?1 AND project_id = ?2
                    "#,
                )
                .map_err(backend)?;
            let rows = stmt
                .query_map(params![tenant_id, project_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            rows
        };

        let mut ranked: Vec<ContextChunk> = rows
            .into_iter()
            .filter_map(|(chunk_type, content, embedding_json)| {
                let embedding: Vec<f32> = match serde_json::from_str(&embedding_json) {
                    Ok(embedding) => embedding,
                    Err(e) => {
                        // Unreadable vectors are left out rather than ranked as unrelated
                        tracing::warn!(
                            tenant_id,
                            project_id,
                            chunk_type = %chunk_type,
                            error = %e,
                            "skipping context chunk with corrupt embedding"
                        );
                        return None;
                    }
                };
                let score = cosine_similarity(&query, &embedding);
                Some(ContextChunk {
                    tenant_id: tenant_id.to_string(),
                    project_id: project_id.to_string(),
                    chunk_type,
                    content,
                    embedding: Some(embedding),
                    score: Some(score),
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .unwrap_or(0.0)
                .partial_cmp(&a.score.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(top_k);

        tracing::debug!(
            tenant_id,
            project_id,
            returned = ranked.len(),
            "context query"
        );
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteContextStore {
        SqliteContextStore::with_hashing(&BlueprintDb::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_query_never_crosses_tenants() {
        let store = store();
        store
            .ingest("tenant-a", "shared", "note", "Use postgres for the database")
            .unwrap();
        store
            .ingest("tenant-b", "shared", "note", "Use postgres for the database too")
            .unwrap();

        let chunks = store
            .query("tenant-a", "shared", "postgres database", 10)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks.iter().all(|c| c.tenant_id == "tenant-a"));
        assert_eq!(chunks[0].content, "Use postgres for the database");
    }

    #[tokio::test]
    async fn test_query_ranks_and_limits() {
        let store = store();
        store.ingest("t", "p", "note", "Landing page copy and pricing").unwrap();
        store.ingest("t", "p", "decision", "Database is postgres with a users table").unwrap();
        store.ingest("t", "p", "note", "Team lunch on fridays").unwrap();

        let chunks = store.query("t", "p", "postgres users table", 2).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_type, "decision");
        assert!(chunks[0].score >= chunks[1].score);
    }

    #[tokio::test]
    async fn test_missing_scope_is_rejected() {
        let store = store();
        assert_eq!(
            store.query("", "p", "anything", 5).await,
            Err(ContextError::MissingScope("tenant_id"))
        );
        assert!(store.ingest("t", "", "note", "x").is_err());
    }

    #[tokio::test]
    async fn test_zero_top_k_returns_nothing() {
        let store = store();
        store.ingest("t", "p", "note", "anything").unwrap();
        assert!(store.query("t", "p", "anything", 0).await.unwrap().is_empty());
        assert_eq!(store.count("t", "p").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_embedding_is_skipped() {
        let db = BlueprintDb::open_in_memory().unwrap();
        let store = SqliteContextStore::with_hashing(&db);
        store.ingest("t", "p", "note", "Postgres holds the users table").unwrap();
        db.connection()
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO context_chunks (tenant_id, project_id, chunk_type, content, embedding_json, created_at)
                 VALUES ('t', 'p', 'note', 'Postgres users table', '{not json', '2026-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let chunks = store.query("t", "p", "postgres users table", 10).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Postgres holds the users table");
        assert_eq!(store.count("t", "p").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_query_returns_stored_embedding() {
        let store = store();
        store.ingest("t", "p", "decision", "Ship the web app first").unwrap();

        let chunks = store.query("t", "p", "web app", 1).await.unwrap();
        let embedding = chunks[0].embedding.as_ref().unwrap();
        let expected = HashingEmbedder::default().embed("Ship the web app first");
        assert_eq!(embedding.len(), expected.len());
        assert!(embedding
            .iter()
            .zip(&expected)
            .all(|(a, b)| (a - b).abs() < 1e-6));

        // The vector stays server-side
        let json = serde_json::to_value(&chunks[0]).unwrap();
        assert!(json.get("embedding").is_none());
    }
}
