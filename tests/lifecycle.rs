use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use kb_harness::lifecycle::evict_if_over_capacity;
use kb_harness::store::{Collection, EmbeddingFunction, InMemoryStore, SqliteStore, VectorStore};
use tempfile::TempDir;

/// Delegates to an in-memory store but refuses to delete some names.
struct StubbornStore {
    inner: InMemoryStore,
    undeletable: HashSet<String>,
}

#[async_trait]
impl VectorStore for StubbornStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn get_collection(&self, name: &str) -> Result<Option<Arc<dyn Collection>>> {
        self.inner.get_collection(name).await
    }

    async fn create_collection(&self, name: &str) -> Result<Arc<dyn Collection>> {
        self.inner.create_collection(name).await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        if self.undeletable.contains(name) {
            bail!("collection {} is locked", name);
        }
        self.inner.delete_collection(name).await
    }
}

fn name(i: usize) -> String {
    format!("web_search_{:013}", 1_700_000_000_000u64 + i as u64)
}

#[tokio::test]
async fn test_evicts_lexically_earliest() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&tmp.path().join("kb.sqlite"), EmbeddingFunction::none())
        .await
        .unwrap();
    // created out of order on purpose
    for i in (0..25).rev() {
        store.create_collection(&name(i)).await.unwrap();
    }

    let report = evict_if_over_capacity(&store, 20).await.unwrap();
    let expected: Vec<String> = (0..5).map(name).collect();
    assert_eq!(report.deleted, expected);
    assert!(report.failed.is_empty());
    assert_eq!(report.remaining, 20);

    let left = store.list_collections().await.unwrap();
    assert_eq!(left.len(), 20);
    assert_eq!(left.first(), Some(&name(5)));

    // a second sweep is a no-op
    let report = evict_if_over_capacity(&store, 20).await.unwrap();
    assert!(report.deleted.is_empty());
}

#[tokio::test]
async fn test_delete_failure_does_not_abort_sweep() {
    let store = StubbornStore {
        inner: InMemoryStore::default(),
        undeletable: [name(1)].into_iter().collect(),
    };
    for i in 0..25 {
        store.create_collection(&name(i)).await.unwrap();
    }

    let report = evict_if_over_capacity(&store, 20).await.unwrap();
    assert_eq!(report.deleted.len(), 4);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, name(1));
    assert!(report.failed[0].1.contains("locked"));
    assert_eq!(report.remaining, 21);
    assert!(store.get_collection(&name(1)).await.unwrap().is_some());
    assert!(store.get_collection(&name(4)).await.unwrap().is_none());
}
