// Answer composition
// Builds the grounded prompt and turns the model reply into the final answer


use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::embeddings::Passage;
use crate::{QaError, Result};

/// Sentence returned for questions outside the corpus domain or without
/// support in the retrieved passages.
pub const REFUSAL_ANSWER: &str =
    "your question is not related to the context or could not be answered";

/// Returned when the model produces only whitespace.
pub const EMPTY_ANSWER_FALLBACK: &str = "The answer could not be generated.";

/// A text generation model
pub trait Generator: Send + Sync {
    /// Complete `prompt`, producing at most `max_tokens` tokens
    fn generate(&self, prompt: &str, max_tokens: u32) -> anyhow::Result<String>;
}

/// Composes answers from a question and its retrieved passages
#[derive(Clone)]
pub struct AnswerComposer {
    generator: Arc<dyn Generator>,
    domain: String,
    max_tokens: u32,
}

impl std::fmt::Debug for AnswerComposer {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerComposer")
            .field("domain", &self.domain)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl AnswerComposer {
    #[inline]
    pub fn new(generator: Arc<dyn Generator>, config: &GenerationConfig) -> Self {
        Self {
            generator,
            domain: config.domain.clone(),
            max_tokens: config.max_tokens,
        }
    }

    #[inline]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[inline]
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Build the generation prompt.
    ///
    /// The instructions restrict the model to the configured domain and to the
    /// supplied context, and name [`REFUSAL_ANSWER`] as the exact reply for
    /// anything it cannot answer from that context. Passages appear in
    /// retrieval order, separated by blank lines.
    #[inline]
    pub fn build_prompt(&self, question: &str, passages: &[Passage]) -> String {
        let mut prompt = String::new();

        let _ = writeln!(
            prompt,
            "You are an assistant for questions related to {} only. \
             Please answer questions within this domain.",
            self.domain
        );
        prompt.push_str(
            "You are an assistant for question-answering tasks. \
             Use the following pieces of retrieved context to answer the question. \
             If you don't know the answer, or the question is not related to the context, \
             return exactly this answer: ",
        );
        prompt.push_str(REFUSAL_ANSWER);
        prompt.push_str("\n\ncontext:\n");

        for (i, passage) in passages.iter().enumerate() {
            if i > 0 {
                prompt.push_str("\n\n");
            }
            prompt.push_str(&passage.text);
        }

        prompt.push_str("\n\nquestion: ");
        prompt.push_str(question);
        prompt.push('\n');
        prompt
    }

    /// Produce the answer text for `question` grounded in `passages`
    #[inline]
    pub fn answer(&self, question: &str, passages: &[Passage]) -> Result<String> {
        let prompt = self.build_prompt(question, passages);
        debug!(
            "Composing answer from {} passages (prompt length: {})",
            passages.len(),
            prompt.len()
        );

        let reply = self
            .generator
            .generate(&prompt, self.max_tokens)
            .map_err(|e| QaError::Generation(format!("{e:#}")))?;

        let reply = reply.trim();
        if reply.is_empty() {
            warn!("Generation model returned an empty answer");
            return Ok(EMPTY_ANSWER_FALLBACK.to_string());
        }

        Ok(reply.to_string())
    }
}

/// Whether `answer` is the refusal sentence, ignoring case, surrounding
/// whitespace and trailing punctuation.
#[inline]
pub fn is_refusal(answer: &str) -> bool {
    answer
        .trim()
        .trim_end_matches(['.', '!'])
        .eq_ignore_ascii_case(REFUSAL_ANSWER)
}
