//! Question answering over a ready index
//!
//! [`QaEngine`] is built once per process after the index lifecycle has
//! produced a loadable index, then shared behind an `Arc` by every request.
//! It holds no mutable state.


use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::answer::{AnswerComposer, Generator, REFUSAL_ANSWER};
use crate::config::Config;
use crate::embeddings::{Embedder, Passage};
use crate::index::VectorIndex;
use crate::retrieval::Retriever;
use crate::{QaError, Result};

/// An answer together with the passages it was grounded on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub passages: Vec<Passage>,
}

#[derive(Debug, Clone)]
pub struct QaEngine {
    retriever: Retriever,
    composer: AnswerComposer,
    min_score: Option<f32>,
}

impl QaEngine {
    /// Assemble the engine. Fails when `embedder` is not the model the index
    /// was built with.
    #[inline]
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        config: &Config,
    ) -> Result<Self> {
        index.ensure_model(embedder.model_id())?;

        info!(
            "QA engine ready: {} passages, top_k {}, generation model limit {} tokens",
            index.len(),
            config.retrieval.top_k,
            config.generation.max_tokens
        );

        Ok(Self {
            retriever: Retriever::new(index, embedder, config.retrieval.top_k),
            composer: AnswerComposer::new(generator, &config.generation),
            min_score: config.retrieval.min_score,
        })
    }

    #[inline]
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `question` from the corpus
    #[inline]
    pub fn ask(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QaError::InvalidQuery(
                "question must not be empty".to_string(),
            ));
        }

        let hits = self.retriever.retrieve_scored(question)?;

        if let Some(threshold) = self.min_score {
            let best = hits.first().map(|hit| hit.score);
            if best.is_none_or(|score| score < threshold) {
                debug!(
                    "Best score {:?} below threshold {}, refusing without generation",
                    best, threshold
                );
                return Ok(Answer {
                    text: REFUSAL_ANSWER.to_string(),
                    passages: Vec::new(),
                });
            }
        }

        let passages: Vec<Passage> = hits.into_iter().map(|hit| hit.passage).collect();
        let text = self.composer.answer(question, &passages)?;

        Ok(Answer { text, passages })
    }
}
