//! SQLite-backed [`VectorStore`].
//!
//! Collections and their entries live in two tables (see
//! [`migrate`](crate::migrate)). Embeddings are stored as little-endian
//! `f32` BLOBs and compared in Rust by brute-force cosine similarity.
//! `INSERT OR IGNORE` on `(collection, id)` makes repeated inserts of the
//! same record a no-op, so concurrent builders cannot duplicate entries.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::chunk::record_id;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::DocumentRecord;

use super::{check_embedding_count, top_k, Collection, EmbeddingFunction, ScoredRecord, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
    embedding: EmbeddingFunction,
}

impl SqliteStore {
    /// Open (creating if needed) the store database at `db_path` and run migrations.
    pub async fn open(db_path: &Path, embedding: EmbeddingFunction) -> Result<Self> {
        let pool = db::connect_path(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool, embedding })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn handle(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(SqliteCollection {
            pool: self.pool.clone(),
            name: name.to_string(),
            embedding: self.embedding.clone(),
        })
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM collections ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn get_collection(&self, name: &str) -> Result<Option<Arc<dyn Collection>>> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok((count > 0).then(|| self.handle(name)))
    }

    async fn create_collection(&self, name: &str) -> Result<Arc<dyn Collection>> {
        sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create collection {}", name))?;
        Ok(self.handle(name))
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entries WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            bail!("collection not found: {}", name);
        }
        tx.commit().await?;
        Ok(())
    }
}

pub struct SqliteCollection {
    pool: SqlitePool,
    name: String,
    embedding: EmbeddingFunction,
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentRecord> {
    let content: String = row.try_get("content")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    let metadata: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&metadata_json).unwrap_or_default();
    let source_location = metadata
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Ok(DocumentRecord {
        source_location,
        content,
        metadata,
    })
}

#[async_trait]
impl Collection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE collection = ?")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn add(
        &self,
        records: &[DocumentRecord],
        embeddings: Option<&[Vec<f32>]>,
    ) -> Result<usize> {
        let computed;
        let vectors = match embeddings {
            Some(v) => Some(v),
            None => {
                computed = self.embedding.embed_records(records).await?;
                computed.as_deref()
            }
        };
        if let Some(v) = vectors {
            check_embedding_count(records, v)?;
        }

        let mut tx = self.pool.begin().await?;
        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM entries WHERE collection = ?",
        )
        .bind(&self.name)
        .fetch_one(&mut *tx)
        .await?;

        let mut inserted = 0usize;
        for (i, record) in records.iter().enumerate() {
            let mut metadata = record.metadata.clone();
            metadata.insert(
                "source".to_string(),
                serde_json::Value::String(record.source_location.clone()),
            );
            let vector = vectors.map(|v| &v[i]);
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO entries
                    (id, collection, position, content, metadata_json, embedding, dims)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record_id(record))
            .bind(&self.name)
            .bind(next + i as i64)
            .bind(&record.content)
            .bind(serde_json::to_string(&metadata)?)
            .bind(vector.map(|v| vec_to_blob(v)))
            .bind(vector.map(|v| v.len() as i64))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        let rows = sqlx::query(
            "SELECT content, metadata_json, embedding FROM entries \
             WHERE collection = ? AND embedding IS NOT NULL",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            scored.push(ScoredRecord {
                record: row_to_record(row)?,
                score: cosine_similarity(vector, &blob_to_vec(&blob)),
            });
        }
        Ok(top_k(scored, k))
    }

    async fn query_text(&self, text: &str, k: usize) -> Result<Vec<ScoredRecord>> {
        match self.embedding.embed_query(text).await? {
            Some(vector) => self.query(&vector, k).await,
            None => Ok(Vec::new()),
        }
    }

    async fn records(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT content, metadata_json FROM entries WHERE collection = ? ORDER BY position ASC",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, HashingEmbedder};
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> SqliteStore {
        let ef = EmbeddingFunction::new(Embedder::Bulk(Arc::new(HashingEmbedder::new(32))), 4);
        SqliteStore::open(&tmp.path().join("store/kb.sqlite"), ef)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open(&tmp).await;
            let col = store.create_collection("kb_12345678").await.unwrap();
            let recs = vec![
                DocumentRecord::new("/a.md", "first").with_metadata("title", "A"),
                DocumentRecord::new("/b.md", "second"),
            ];
            assert_eq!(col.add(&recs, None).await.unwrap(), 2);
            store.pool().close().await;
        }
        let store = open(&tmp).await;
        let col = store.get_collection("kb_12345678").await.unwrap().unwrap();
        assert_eq!(col.count().await.unwrap(), 2);
        let recs = col.records().await.unwrap();
        assert_eq!(recs[0].source_location, "/a.md");
        assert_eq!(recs[0].title(), Some("A"));
        assert_eq!(recs[1].content, "second");
    }

    #[tokio::test]
    async fn test_insert_or_ignore_keeps_count_stable() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let col = store.create_collection("docs").await.unwrap();
        let recs = vec![DocumentRecord::new("s", "same text")];
        col.add(&recs, None).await.unwrap();
        assert_eq!(col.add(&recs, None).await.unwrap(), 0);
        // create again returns the same collection
        let again = store.create_collection("docs").await.unwrap();
        assert_eq!(again.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_text_only_entries_are_skipped_by_vector_query() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("kb.sqlite"), EmbeddingFunction::none())
            .await
            .unwrap();
        let col = store.create_collection("plain").await.unwrap();
        col.add(&[DocumentRecord::new("s", "text")], None)
            .await
            .unwrap();
        assert_eq!(col.count().await.unwrap(), 1);
        assert!(col.query(&[1.0, 0.0], 3).await.unwrap().is_empty());
        assert!(col.query_text("text", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_entries_and_reports_missing() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let col = store.create_collection("gone").await.unwrap();
        col.add(&[DocumentRecord::new("s", "x")], None).await.unwrap();
        store.delete_collection("gone").await.unwrap();
        assert!(store.get_collection("gone").await.unwrap().is_none());
        assert!(store.delete_collection("gone").await.is_err());

        let recreated = store.create_collection("gone").await.unwrap();
        assert_eq!(recreated.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let col = store.create_collection("rank").await.unwrap();
        col.add(
            &[
                DocumentRecord::new("x", "axum router handlers"),
                DocumentRecord::new("y", "sourdough bread baking"),
            ],
            None,
        )
        .await
        .unwrap();
        let hits = col.query_text("axum handlers", 2).await.unwrap();
        assert_eq!(hits[0].record.source_location, "x");
        assert!(hits[0].score >= hits[1].score);
    }
}
