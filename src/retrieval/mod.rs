// Query-time retrieval over a ready index


use std::sync::Arc;
use tracing::debug;

use crate::embeddings::{Embedder, Passage};
use crate::index::VectorIndex;
use crate::{QaError, Result};

/// A retrieved passage with its similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Finds the passages most relevant to a query.
///
/// The embedder must be the model the index was built with; callers check
/// this with [`VectorIndex::ensure_model`] before constructing a retriever.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl std::fmt::Debug for Retriever {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("passages", &self.index.len())
            .field("embedding_model", &self.embedder.model_id())
            .field("top_k", &self.top_k)
            .finish()
    }
}

impl Retriever {
    #[inline]
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            index,
            embedder,
            top_k,
        }
    }

    #[inline]
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    #[inline]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Up to `top_k` passages, best first
    #[inline]
    pub fn retrieve(&self, query: &str) -> Result<Vec<Passage>> {
        Ok(self
            .retrieve_scored(query)?
            .into_iter()
            .map(|hit| hit.passage)
            .collect())
    }

    #[inline]
    pub fn retrieve_scored(&self, query: &str) -> Result<Vec<ScoredPassage>> {
        let vector = self
            .embedder
            .embed(query)
            .map_err(|e| QaError::EmbeddingService(format!("Failed to embed query: {e:#}")))?;

        if vector.len() != self.index.dimension() {
            return Err(QaError::EmbeddingService(format!(
                "Query embedding has {} components but the index dimension is {}",
                vector.len(),
                self.index.dimension()
            )));
        }

        let hits: Vec<ScoredPassage> = self
            .index
            .search(&vector, self.top_k)
            .into_iter()
            .map(|hit| ScoredPassage {
                passage: hit.passage.clone(),
                score: hit.score,
            })
            .collect();

        debug!(
            "Retrieved {} passages for query ({} chars)",
            hits.len(),
            query.chars().count()
        );
        Ok(hits)
    }
}
