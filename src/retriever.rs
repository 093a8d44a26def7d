//! Ensemble retriever: lexical + semantic, fused by weighted reciprocal rank.
//!
//! Each sub-index returns at most `top_k` hits. A hit at 1-based rank `r`
//! in a sub-index contributes `weight / (r + 60)`; contributions for the
//! same content are summed. The retriever is a runtime object only.

use anyhow::Result;
use indexmap::IndexMap;
use std::sync::Arc;

use crate::lexical::LexicalIndex;
use crate::models::{DocumentRecord, RetrievedChunk};
use crate::store::Collection;

/// Rank offset for reciprocal rank fusion.
const RRF_C: f64 = 60.0;

/// Relative sub-index weights. Plain values, built fresh per call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleWeights {
    pub lexical: f64,
    pub semantic: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            lexical: 0.25,
            semantic: 0.75,
        }
    }
}

impl EnsembleWeights {
    pub fn new(lexical: f64, semantic: f64) -> Self {
        Self { lexical, semantic }
    }
}

pub struct EnsembleRetriever {
    lexical: LexicalIndex,
    semantic: Arc<dyn Collection>,
    top_k: usize,
    weights: EnsembleWeights,
}

impl EnsembleRetriever {
    pub fn new(
        mut lexical: LexicalIndex,
        semantic: Arc<dyn Collection>,
        top_k: usize,
        weights: EnsembleWeights,
    ) -> Self {
        lexical.set_k(top_k);
        Self {
            lexical,
            semantic,
            top_k,
            weights,
        }
    }

    pub fn collection_name(&self) -> &str {
        self.semantic.name()
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn weights(&self) -> EnsembleWeights {
        self.weights
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let lexical: Vec<DocumentRecord> = self
            .lexical
            .search(query)?
            .into_iter()
            .map(|(doc, _)| doc)
            .collect();
        let semantic: Vec<DocumentRecord> = self
            .semantic
            .query_text(query, self.top_k)
            .await?
            .into_iter()
            .map(|hit| hit.record)
            .collect();

        Ok(fuse(
            &[(lexical, self.weights.lexical), (semantic, self.weights.semantic)],
        ))
    }
}

/// Weighted reciprocal rank fusion, deduplicated by content.
pub fn fuse(rankings: &[(Vec<DocumentRecord>, f64)]) -> Vec<RetrievedChunk> {
    let mut fused: IndexMap<&str, (&DocumentRecord, f64)> = IndexMap::new();
    for (ranking, weight) in rankings {
        for (rank, doc) in ranking.iter().enumerate() {
            let contribution = weight / (rank as f64 + 1.0 + RRF_C);
            fused
                .entry(doc.content.as_str())
                .and_modify(|(_, score)| *score += contribution)
                .or_insert((doc, contribution));
        }
    }

    let mut results: Vec<RetrievedChunk> = fused
        .into_values()
        .map(|(doc, score)| RetrievedChunk {
            source_location: doc.source_location.clone(),
            content: doc.content.clone(),
            metadata: doc.metadata.clone(),
            score,
        })
        .collect();
    // stable: ties keep first-seen order
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results
}
