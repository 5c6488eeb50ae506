//! Persistent semantic index
//!
//! Holds every passage of the corpus with its embedding vector and answers
//! exact cosine-similarity queries. The index is built once, persisted as a
//! single JSON document and never mutated afterwards.


use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::config::state::write_atomically;
use crate::embeddings::{Embedder, Passage};
use crate::{QaError, Result};

pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexMetadata {
    pub format_version: u32,
    /// Embedding model used for every vector in the index
    pub embedding_model: String,
    pub dimension: usize,
    pub passage_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub passage: Passage,
    pub vector: Vec<f32>,
}

/// A passage matched by [`VectorIndex::search`]
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<'a> {
    pub passage: &'a Passage,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorIndex {
    metadata: IndexMetadata,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embed `passages` in batches and assemble the index.
    ///
    /// Either every passage is embedded or an error is returned; nothing is
    /// written to disk here.
    #[inline]
    pub fn build(passages: Vec<Passage>, embedder: &dyn Embedder, batch_size: usize) -> Result<Self> {
        if passages.is_empty() {
            return Err(QaError::Extraction(
                "No passages to index; the corpus produced no text".to_string(),
            ));
        }

        let batch_size = batch_size.max(1);
        info!(
            "Building index of {} passages with {} (batch size {})",
            passages.len(),
            embedder.model_id(),
            batch_size
        );

        let progress = build_progress_bar(passages.len());
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(passages.len());

        for batch in passages.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let batch_vectors = embedder.embed_batch(&texts).map_err(|e| {
                QaError::EmbeddingService(format!(
                    "Failed to embed passages {}..{}: {:#}",
                    vectors.len(),
                    vectors.len() + batch.len(),
                    e
                ))
            })?;

            if batch_vectors.len() != batch.len() {
                return Err(QaError::EmbeddingService(format!(
                    "Embedding model returned {} vectors for {} passages",
                    batch_vectors.len(),
                    batch.len()
                )));
            }

            vectors.extend(batch_vectors);
            progress.inc(batch.len() as u64);
        }
        progress.finish_and_clear();

        let dimension = vectors.first().map_or(0, Vec::len);
        if dimension == 0 {
            return Err(QaError::EmbeddingService(
                "Embedding model returned an empty vector".to_string(),
            ));
        }
        if let Some(position) = vectors.iter().position(|v| v.len() != dimension) {
            return Err(QaError::EmbeddingService(format!(
                "Inconsistent embedding dimension for passage {}: expected {}, got {}",
                position,
                dimension,
                vectors[position].len()
            )));
        }

        let entries: Vec<IndexEntry> = passages
            .into_iter()
            .zip(vectors)
            .map(|(passage, vector)| IndexEntry { passage, vector })
            .collect();

        let index = Self {
            metadata: IndexMetadata {
                format_version: INDEX_FORMAT_VERSION,
                embedding_model: embedder.model_id().to_string(),
                dimension,
                passage_count: entries.len(),
                created_at: Utc::now(),
            },
            entries,
        };

        info!(
            "Built index of {} passages, dimension {}",
            index.len(),
            dimension
        );
        Ok(index)
    }

    /// Write the index to `path` via a temporary sibling file and a rename
    #[inline]
    pub fn persist(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| QaError::Persistence(format!("Failed to serialize index: {}", e)))?;

        write_atomically(path, &bytes).map_err(|e| {
            QaError::Persistence(format!(
                "Failed to write index {}: {}",
                path.display(),
                e
            ))
        })?;

        info!(
            "Persisted index of {} passages to {} ({} bytes)",
            self.len(),
            path.display(),
            bytes.len()
        );
        Ok(())
    }

    /// Load a previously persisted index
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QaError::IndexNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(QaError::Persistence(format!(
                    "Failed to read index {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let index: Self = serde_json::from_slice(&bytes).map_err(|e| QaError::IndexCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        index.check_consistency().map_err(|reason| QaError::IndexCorrupt {
            path: path.to_path_buf(),
            reason,
        })?;

        info!(
            "Loaded index of {} passages ({}, dimension {}) from {}",
            index.len(),
            index.metadata.embedding_model,
            index.metadata.dimension,
            path.display()
        );
        Ok(index)
    }

    fn check_consistency(&self) -> std::result::Result<(), String> {
        if self.metadata.format_version != INDEX_FORMAT_VERSION {
            return Err(format!(
                "unsupported format version {}",
                self.metadata.format_version
            ));
        }
        if self.entries.is_empty() {
            return Err("index has no passages".to_string());
        }
        if self.metadata.passage_count != self.entries.len() {
            return Err(format!(
                "metadata lists {} passages but {} are stored",
                self.metadata.passage_count,
                self.entries.len()
            ));
        }
        if self.metadata.dimension == 0 {
            return Err("dimension is zero".to_string());
        }
        for (position, entry) in self.entries.iter().enumerate() {
            if entry.vector.len() != self.metadata.dimension {
                return Err(format!(
                    "vector {} has {} components, expected {}",
                    position,
                    entry.vector.len(),
                    self.metadata.dimension
                ));
            }
            if entry.passage.id != position {
                return Err(format!(
                    "passage at position {} has id {}",
                    position, entry.passage.id
                ));
            }
        }
        Ok(())
    }

    /// Fail unless the index was built with `model`
    #[inline]
    pub fn ensure_model(&self, model: &str) -> Result<()> {
        if self.metadata.embedding_model == model {
            Ok(())
        } else {
            Err(QaError::EmbeddingModelMismatch {
                indexed: self.metadata.embedding_model.clone(),
                configured: model.to_string(),
            })
        }
    }

    /// Return the `k` passages most similar to `query`, best first.
    ///
    /// Equal scores keep chunk order.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit<'_>> {
        if k == 0 {
            return Vec::new();
        }

        let query_norm = norm(query);
        let mut hits: Vec<SearchHit<'_>> = self
            .entries
            .iter()
            .map(|entry| SearchHit {
                passage: &entry.passage,
                score: cosine_similarity(query, query_norm, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        hits.truncate(k);

        debug!(
            "Search returned {} hits (best score {:?})",
            hits.len(),
            hits.first().map(|h| h.score)
        );
        hits
    }

    #[inline]
    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    #[inline]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.metadata.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity; zero vectors and NaN results score 0.0
fn cosine_similarity(query: &[f32], query_norm: f32, vector: &[f32]) -> f32 {
    let vector_norm = norm(vector);
    if query_norm == 0.0 || vector_norm == 0.0 {
        return 0.0;
    }

    let dot: f32 = query.iter().zip(vector).map(|(a, b)| a * b).sum();
    let score = dot / (query_norm * vector_norm);
    if score.is_nan() { 0.0 } else { score }
}

fn build_progress_bar(total: usize) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(total as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding passages ({eta})")
    {
        bar.set_style(style);
    }
    bar
}
