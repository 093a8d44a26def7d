//! Collection eviction.
//!
//! Names sort in creation order for timestamp-suffixed collections, so
//! deleting the lexically smallest names first approximates oldest-first.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{KbError, KbResult};
use crate::store::VectorStore;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EvictionReport {
    pub deleted: Vec<String>,
    /// `(name, error)` for collections that could not be deleted.
    pub failed: Vec<(String, String)>,
    pub remaining: usize,
}

/// Delete the oldest collections until at most `max_collections` remain.
///
/// Per-collection delete failures are logged and reported, never fatal.
/// Only listing the store can fail the sweep.
pub async fn evict_if_over_capacity(
    store: &dyn VectorStore,
    max_collections: usize,
) -> KbResult<EvictionReport> {
    if max_collections == 0 {
        return Err(KbError::InvalidInput("max_collections must be >= 1".into()));
    }
    let mut names = store.list_collections().await?;
    if names.len() <= max_collections {
        info!(
            count = names.len(),
            max_collections, "Collection count within limit"
        );
        return Ok(EvictionReport {
            remaining: names.len(),
            ..EvictionReport::default()
        });
    }

    names.sort();
    let excess = names.len() - max_collections;
    info!(count = excess, "Cleaning up old collections");

    let mut report = EvictionReport::default();
    for name in names.iter().take(excess) {
        match store.delete_collection(name).await {
            Ok(()) => {
                info!(collection = %name, "Deleted old collection");
                report.deleted.push(name.clone());
            }
            Err(e) => {
                warn!(collection = %name, error = %e, "Failed to delete collection");
                report.failed.push((name.clone(), e.to_string()));
            }
        }
    }
    report.remaining = names.len() - report.deleted.len();
    Ok(report)
}
