
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A passage of corpus text, the unit of embedding and retrieval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    /// Position of this passage in chunk order across the whole corpus
    pub id: usize,
    /// Source document the passage was cut from
    pub document: String,
    /// Character offset of the passage within the normalized document text
    pub offset: usize,
    /// The passage text
    pub text: String,
}

/// A window of text produced by [`split_text`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    /// Character offset of the span within the input
    pub offset: usize,
    pub text: String,
}

/// Configuration for passage chunking, sizes are in characters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum passage length
    pub chunk_size: usize,
    /// Characters shared between adjacent passages
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 100,
        }
    }
}

/// Split text into overlapping windows of at most `chunk_size` characters.
///
/// Every window after the first starts exactly `overlap` characters before
/// the previous one ends. Windows end on the latest structural boundary that
/// fits (paragraph, line, sentence, whitespace), falling back to a hard cut.
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<TextSpan> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut spans = Vec::new();

    if len == 0 {
        return spans;
    }

    let chunk_size = config.chunk_size.max(1);
    let overlap = config.overlap.min(chunk_size - 1);

    let mut start = 0;
    loop {
        let window_end = (start + chunk_size).min(len);
        let end = if window_end == len {
            len
        } else {
            find_break(&chars, start + overlap + 1, window_end)
        };

        spans.push(TextSpan {
            offset: start,
            text: chars[start..end].iter().collect(),
        });

        if end == len {
            break;
        }
        start = end - overlap;
    }

    spans
}

/// Chunk one document's normalized text into passages.
///
/// Passage ids are local to the document; the index renumbers them in
/// corpus order.
#[inline]
pub fn chunk_document(document: &str, text: &str, config: &ChunkingConfig) -> Vec<Passage> {
    let passages: Vec<Passage> = split_text(text, config)
        .into_iter()
        .enumerate()
        .map(|(id, span)| Passage {
            id,
            document: document.to_string(),
            offset: span.offset,
            text: span.text,
        })
        .collect();

    debug!(
        "Chunked '{}' into {} passages (avg {} chars)",
        document,
        passages.len(),
        passages
            .iter()
            .map(|p| p.text.chars().count())
            .sum::<usize>()
            / passages.len().max(1)
    );

    passages
}

/// Chunk several documents and number the passages in corpus order
#[inline]
pub fn chunk_corpus<'a, I>(documents: I, config: &ChunkingConfig) -> Vec<Passage>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut passages = Vec::new();
    for (document, text) in documents {
        passages.extend(chunk_document(document, text, config));
    }
    for (id, passage) in passages.iter_mut().enumerate() {
        passage.id = id;
    }
    passages
}

/// Pick the end of a window within `min_end..=max_end`
fn find_break(chars: &[char], min_end: usize, max_end: usize) -> usize {
    let boundaries: [fn(&[char], usize) -> bool; 4] = [
        is_paragraph_break,
        is_line_break,
        is_sentence_end,
        is_word_break,
    ];

    for is_boundary in boundaries {
        if let Some(end) = (min_end..=max_end).rev().find(|&end| is_boundary(chars, end)) {
            return end;
        }
    }

    max_end
}

fn is_paragraph_break(chars: &[char], end: usize) -> bool {
    end >= 2 && chars[end - 1] == '\n' && chars[end - 2] == '\n'
}

fn is_line_break(chars: &[char], end: usize) -> bool {
    end >= 1 && chars[end - 1] == '\n'
}

fn is_sentence_end(chars: &[char], end: usize) -> bool {
    end >= 2 && chars[end - 1].is_whitespace() && matches!(chars[end - 2], '.' | '!' | '?')
}

fn is_word_break(chars: &[char], end: usize) -> bool {
    end >= 1 && chars[end - 1].is_whitespace()
}
