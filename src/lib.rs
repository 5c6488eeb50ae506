use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QaError>;

#[derive(Error, Debug)]
pub enum QaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(
        "Index not found at {}, but the lifecycle state says it was built. Run `pdf-qa reset` to rebuild it",
        path.display()
    )]
    IndexNotFound { path: PathBuf },

    #[error(
        "Index at {} is corrupt: {reason}. Run `pdf-qa reset` to rebuild it",
        path.display()
    )]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error(
        "Index was built with embedding model '{indexed}' but '{configured}' is configured"
    )]
    EmbeddingModelMismatch { indexed: String, configured: String },

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl QaError {
    /// Whether the lifecycle flag and the on-disk index disagree.
    #[inline]
    pub fn is_state_desync(&self) -> bool {
        matches!(self, Self::IndexNotFound { .. } | Self::IndexCorrupt { .. })
    }
}

impl From<config::ConfigError> for QaError {
    #[inline]
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub mod answer;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod extractor;
pub mod index;
pub mod indexer;
pub mod mcp;
pub mod qa;
pub mod retrieval;
