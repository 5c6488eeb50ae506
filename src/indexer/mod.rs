// Index lifecycle module
// Decides between one-time ingestion of the corpus and reuse of the persisted index


use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::config::state::StateFile;
use crate::config::{Config, LifecycleState};
use crate::embeddings::Embedder;
use crate::embeddings::chunking::chunk_corpus;
use crate::extractor::extract_text;
use crate::index::VectorIndex;
use crate::{QaError, Result};

/// What [`init_data_dir`] created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOutcome {
    pub config_created: bool,
    pub state_created: bool,
}

/// Controls whether the index is built from the corpus or loaded from disk.
///
/// The lifecycle flag is set only after the index has been persisted, and
/// cleared before the index is removed, so a set flag always refers to a
/// complete index file.
pub struct IndexLifecycle<'a> {
    config: &'a Config,
    embedder: &'a dyn Embedder,
}

impl<'a> IndexLifecycle<'a> {
    #[inline]
    pub fn new(config: &'a Config, embedder: &'a dyn Embedder) -> Self {
        Self { config, embedder }
    }

    /// Current lifecycle state as recorded on disk
    #[inline]
    pub fn state(&self) -> Result<LifecycleState> {
        StateFile::read(&self.config.state_file_path())?.lifecycle_state()
    }

    /// Produce a ready index, building it on first run and loading it after.
    ///
    /// A failed build leaves the flag unset and is returned to the caller.
    /// A missing or corrupt index with the flag set is reported, never
    /// silently rebuilt.
    #[inline]
    pub fn initialize(&self) -> Result<VectorIndex> {
        match self.state()? {
            LifecycleState::NeedsBuild => {
                info!("No index built yet, ingesting corpus");
                self.build().inspect_err(|e| {
                    error!("Index build failed, lifecycle state unchanged: {}", e);
                })
            }
            LifecycleState::Ready => {
                info!("Loading existing index");
                let index = VectorIndex::load(&self.config.index_path())?;
                index.ensure_model(self.embedder.model_id())?;
                Ok(index)
            }
        }
    }

    fn build(&self) -> Result<VectorIndex> {
        let documents = self.config.document_paths();
        if documents.is_empty() {
            return Err(QaError::Config(
                "No corpus documents configured; add paths to [corpus] documents in config.toml"
                    .to_string(),
            ));
        }

        let mut texts: Vec<(String, String)> = Vec::with_capacity(documents.len());
        for (configured, path) in self.config.corpus.documents.iter().zip(&documents) {
            let text = extract_text(path)?;
            if text.trim().is_empty() {
                warn!("Document {} contains no text, skipping", path.display());
                continue;
            }
            texts.push((configured.display().to_string(), text));
        }

        if texts.is_empty() {
            return Err(QaError::Extraction(
                "The corpus contains no extractable text".to_string(),
            ));
        }

        let passages = chunk_corpus(
            texts.iter().map(|(name, text)| (name.as_str(), text.as_str())),
            &self.config.chunking,
        );
        debug!(
            "Chunked {} documents into {} passages",
            texts.len(),
            passages.len()
        );

        let index = VectorIndex::build(
            passages,
            self.embedder,
            self.config.ollama.batch_size as usize,
        )?;
        index.persist(&self.config.index_path())?;
        StateFile::ready().write(&self.config.state_file_path())?;

        info!("Index built and marked ready");
        Ok(index)
    }

    /// Discard the index so the next start rebuilds it
    #[inline]
    pub fn reset(&self) -> Result<()> {
        StateFile::needs_build().write(&self.config.state_file_path())?;

        let index_path = self.config.index_path();
        match fs::remove_file(&index_path) {
            Ok(()) => info!("Removed index {}", index_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No index at {} to remove", index_path.display());
            }
            Err(e) => {
                return Err(QaError::Persistence(format!(
                    "Failed to remove index {}: {}",
                    index_path.display(),
                    e
                )));
            }
        }

        Ok(())
    }
}

/// Create the data directory with a default `config.toml` and a
/// `state.toml` in the needs-build state. Existing files are left alone.
#[inline]
pub fn init_data_dir(data_dir: &Path) -> Result<InitOutcome> {
    fs::create_dir_all(data_dir).map_err(|e| {
        QaError::Config(format!(
            "Failed to create data directory {}: {}",
            data_dir.display(),
            e
        ))
    })?;

    let config = Config {
        base_dir: data_dir.to_path_buf(),
        ..Config::default()
    };

    let config_created = !config.config_file_path().exists();
    if config_created {
        config
            .save()
            .map_err(|e| QaError::Config(format!("{e:#}")))?;
        info!("Created {}", config.config_file_path().display());
    }

    let state_created = !config.state_file_path().exists();
    if state_created {
        StateFile::needs_build().write(&config.state_file_path())?;
        info!("Created {}", config.state_file_path().display());
    }

    Ok(InitOutcome {
        config_created,
        state_created,
    })
}
