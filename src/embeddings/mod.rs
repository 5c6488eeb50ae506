// Embeddings module
// Passage chunking, the embedding model boundary and the Ollama client

pub mod chunking;
pub mod ollama;

pub use chunking::{ChunkingConfig, Passage, TextSpan, chunk_corpus, chunk_document, split_text};
pub use ollama::OllamaClient;

/// A text embedding model.
///
/// Index build and query time must use the same model; `model_id` is
/// recorded in the persisted index and checked when it is loaded.
pub trait Embedder: Send + Sync {
    /// Identity of the model, e.g. `nomic-embed-text:latest`
    fn model_id(&self) -> &str;

    /// Embed a single text
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Embed several texts, returning one vector per input in input order
    #[inline]
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}
