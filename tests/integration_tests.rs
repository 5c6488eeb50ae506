#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end tests of the question answering pipeline
// Corpus files on disk -> index lifecycle -> retrieval -> answer composition,
// with deterministic in-process models standing in for the Ollama server

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use pdf_qa::QaError;
use pdf_qa::answer::{Generator, REFUSAL_ANSWER, is_refusal};
use pdf_qa::config::{Config, LifecycleState};
use pdf_qa::embeddings::Embedder;
use pdf_qa::index::VectorIndex;
use pdf_qa::indexer::{IndexLifecycle, init_data_dir};
use pdf_qa::qa::QaEngine;

/// Each dimension counts one group of related words
const VOCABULARY: [&[&str]; 8] = [
    &["alice"],
    &["bob"],
    &["cafe"],
    &["meet", "met"],
    &["ross", "dinosaur", "dinosaurs"],
    &["museum"],
    &["france"],
    &["capital"],
];

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

/// Bag-of-words embedder over a fixed vocabulary
struct BagOfWordsEmbedder {
    model: &'static str,
    calls: AtomicUsize,
}

impl BagOfWordsEmbedder {
    fn new(model: &'static str) -> Self {
        Self {
            model,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for BagOfWordsEmbedder {
    fn model_id(&self) -> &str {
        self.model
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector = vec![0.0; VOCABULARY.len()];
        for token in tokens(text) {
            if let Some(dim) = VOCABULARY
                .iter()
                .position(|group| group.contains(&token.as_str()))
            {
                vector[dim] += 1.0;
            }
        }
        Ok(vector)
    }
}

/// Answers with the best passage when it shares a vocabulary word with the
/// question, and with the refusal sentence otherwise
struct ExtractiveGenerator {
    calls: AtomicUsize,
}

impl ExtractiveGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Generator for ExtractiveGenerator {
    fn generate(&self, prompt: &str, _max_tokens: u32) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let (_, rest) = prompt
            .split_once("context:\n")
            .ok_or_else(|| anyhow::anyhow!("prompt has no context section"))?;
        let (context, question) = rest
            .split_once("\n\nquestion: ")
            .ok_or_else(|| anyhow::anyhow!("prompt has no question"))?;

        let context_words: Vec<String> = tokens(context).collect();
        let supported = tokens(question).any(|word| {
            VOCABULARY
                .iter()
                .any(|group| group.contains(&word.as_str()))
                && context_words.contains(&word)
        });

        if !supported {
            return Ok(REFUSAL_ANSWER.to_string());
        }

        let best = context.split("\n\n").next().unwrap_or_default();
        Ok(format!("According to the documents: {best}"))
    }
}

const CAFE_DOC: &str = "Alice met Bob at the cafe.";
const MUSEUM_DOC: &str = "Ross works at the museum and loves dinosaurs.";

fn create_corpus(documents: &[(&str, &str)]) -> (Config, TempDir) {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    init_data_dir(temp_dir.path()).expect("data dir should initialize");

    for (name, content) in documents {
        fs::write(temp_dir.path().join(name), content).expect("should write document");
    }

    let mut config = Config::load(temp_dir.path()).expect("config should load");
    config.corpus.documents = documents
        .iter()
        .map(|(name, _)| PathBuf::from(*name))
        .collect();
    (config, temp_dir)
}

fn start_engine(
    config: &Config,
    embedder: &Arc<BagOfWordsEmbedder>,
    generator: &Arc<ExtractiveGenerator>,
) -> QaEngine {
    let index = IndexLifecycle::new(config, &**embedder)
        .initialize()
        .expect("index should initialize");
    QaEngine::new(
        Arc::new(index),
        Arc::clone(embedder) as Arc<dyn Embedder>,
        Arc::clone(generator) as Arc<dyn Generator>,
        config,
    )
    .expect("engine should assemble")
}

#[test]
fn scenario_single_passage_answer_mentions_cafe() {
    let (config, _temp_dir) = create_corpus(&[("meeting.txt", CAFE_DOC)]);
    let embedder = Arc::new(BagOfWordsEmbedder::new("bag-of-words"));
    let generator = Arc::new(ExtractiveGenerator::new());
    let engine = start_engine(&config, &embedder, &generator);

    let answer = engine
        .ask("Where did Alice meet Bob?")
        .expect("question should be answered");

    assert_eq!(answer.passages.len(), 1);
    assert!(answer.passages[0].text.contains("cafe"));
    assert_eq!(answer.passages[0].document, "meeting.txt");
    assert!(answer.text.contains("cafe"), "answer: {}", answer.text);
    assert!(!is_refusal(&answer.text));
    assert_eq!(generator.calls(), 1);
}

#[test]
fn scenario_unrelated_question_is_refused() {
    let (config, _temp_dir) = create_corpus(&[("meeting.txt", CAFE_DOC)]);
    let embedder = Arc::new(BagOfWordsEmbedder::new("bag-of-words"));
    let generator = Arc::new(ExtractiveGenerator::new());
    let engine = start_engine(&config, &embedder, &generator);

    let answer = engine
        .ask("What is the capital of France?")
        .expect("question should be answered");

    assert_eq!(answer.text, REFUSAL_ANSWER);
    assert_eq!(generator.calls(), 1);
}

#[test]
fn unrelated_question_below_min_score_skips_generation() {
    let (mut config, _temp_dir) = create_corpus(&[("meeting.txt", CAFE_DOC)]);
    config.retrieval.min_score = Some(0.2);
    let embedder = Arc::new(BagOfWordsEmbedder::new("bag-of-words"));
    let generator = Arc::new(ExtractiveGenerator::new());
    let engine = start_engine(&config, &embedder, &generator);

    let answer = engine
        .ask("What is the capital of France?")
        .expect("question should be answered");

    assert_eq!(answer.text, REFUSAL_ANSWER);
    assert!(answer.passages.is_empty());
    assert_eq!(generator.calls(), 0);

    let related = engine
        .ask("Where did Alice meet Bob?")
        .expect("question should be answered");
    assert!(related.text.contains("cafe"));
    assert_eq!(generator.calls(), 1);
}

#[test]
fn scenario_empty_question_makes_no_model_calls() {
    let (config, _temp_dir) = create_corpus(&[("meeting.txt", CAFE_DOC)]);
    let embedder = Arc::new(BagOfWordsEmbedder::new("bag-of-words"));
    let generator = Arc::new(ExtractiveGenerator::new());
    let engine = start_engine(&config, &embedder, &generator);
    let embed_calls = embedder.calls();

    for question in ["", "   ", "\n\t"] {
        let err = engine.ask(question).expect_err("empty question should fail");
        assert!(matches!(err, QaError::InvalidQuery(_)), "got {err:?}");
    }

    assert_eq!(embedder.calls(), embed_calls);
    assert_eq!(generator.calls(), 0);
}

#[test]
fn scenario_deleted_index_is_reported_not_rebuilt() {
    let (config, _temp_dir) = create_corpus(&[("meeting.txt", CAFE_DOC)]);
    let embedder = BagOfWordsEmbedder::new("bag-of-words");

    IndexLifecycle::new(&config, &embedder)
        .initialize()
        .expect("first start should build");
    fs::remove_file(config.index_path()).expect("should delete index");
    let embed_calls = embedder.calls();

    let lifecycle = IndexLifecycle::new(&config, &embedder);
    let err = lifecycle
        .initialize()
        .expect_err("startup should fail on desync");

    assert!(matches!(err, QaError::IndexNotFound { .. }), "got {err:?}");
    assert!(err.is_state_desync());
    assert!(!config.index_path().exists());
    assert_eq!(embedder.calls(), embed_calls);
    assert_eq!(
        lifecycle.state().expect("state should read"),
        LifecycleState::Ready
    );
}

#[test]
fn scenario_concurrent_queries_are_independent() {
    let (config, _temp_dir) =
        create_corpus(&[("meeting.txt", CAFE_DOC), ("museum.txt", MUSEUM_DOC)]);
    let embedder = Arc::new(BagOfWordsEmbedder::new("bag-of-words"));
    let generator = Arc::new(ExtractiveGenerator::new());
    let engine = Arc::new(start_engine(&config, &embedder, &generator));

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = Arc::clone(&engine);
                scope.spawn(move || {
                    let (question, expected) = if i % 2 == 0 {
                        ("Where did Alice meet Bob?", "cafe")
                    } else {
                        ("Where does Ross work with dinosaurs?", "museum")
                    };
                    for _ in 0..10 {
                        let answer = engine.ask(question).expect("question should be answered");
                        assert!(
                            answer.text.contains(expected),
                            "{question} -> {}",
                            answer.text
                        );
                        assert!(answer.passages[0].text.contains(expected));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker should not panic");
        }
    });

    assert_eq!(generator.calls(), 80);
}

#[test]
fn restart_reuses_persisted_index() {
    let (config, _temp_dir) =
        create_corpus(&[("meeting.txt", CAFE_DOC), ("museum.txt", MUSEUM_DOC)]);
    let embedder = BagOfWordsEmbedder::new("bag-of-words");

    let built = IndexLifecycle::new(&config, &embedder)
        .initialize()
        .expect("first start should build");
    let embed_calls = embedder.calls();
    assert_eq!(embed_calls, built.len());

    let loaded = IndexLifecycle::new(&config, &embedder)
        .initialize()
        .expect("second start should load");

    assert_eq!(embedder.calls(), embed_calls);
    assert_eq!(loaded, built);
    assert_eq!(
        VectorIndex::load(&config.index_path()).expect("index should load"),
        built
    );
}

#[test]
fn changed_embedding_model_is_rejected() {
    let (config, _temp_dir) = create_corpus(&[("meeting.txt", CAFE_DOC)]);

    IndexLifecycle::new(&config, &BagOfWordsEmbedder::new("bag-of-words"))
        .initialize()
        .expect("first start should build");

    let other = BagOfWordsEmbedder::new("other-model");
    let err = IndexLifecycle::new(&config, &other)
        .initialize()
        .expect_err("a different model should be rejected");

    assert!(
        matches!(
            err,
            QaError::EmbeddingModelMismatch { ref indexed, ref configured }
                if indexed == "bag-of-words" && configured == "other-model"
        ),
        "got {err:?}"
    );
}

#[test]
fn corrupt_index_is_reported() {
    let (config, _temp_dir) = create_corpus(&[("meeting.txt", CAFE_DOC)]);
    let embedder = BagOfWordsEmbedder::new("bag-of-words");

    IndexLifecycle::new(&config, &embedder)
        .initialize()
        .expect("first start should build");
    fs::write(config.index_path(), "{\"metadata\": ").expect("should truncate index");

    let err = IndexLifecycle::new(&config, &embedder)
        .initialize()
        .expect_err("corrupt index should fail");
    assert!(matches!(err, QaError::IndexCorrupt { .. }), "got {err:?}");
    assert!(err.is_state_desync());
}

#[test]
fn reset_then_restart_rebuilds_from_updated_corpus() {
    let (config, temp_dir) = create_corpus(&[("meeting.txt", CAFE_DOC)]);
    let embedder = Arc::new(BagOfWordsEmbedder::new("bag-of-words"));
    let generator = Arc::new(ExtractiveGenerator::new());

    IndexLifecycle::new(&config, &*embedder)
        .initialize()
        .expect("first start should build");

    let lifecycle = IndexLifecycle::new(&config, &*embedder);
    lifecycle.reset().expect("reset should succeed");
    assert_eq!(
        lifecycle.state().expect("state should read"),
        LifecycleState::NeedsBuild
    );
    assert!(!config.index_path().exists());

    fs::write(temp_dir.path().join("meeting.txt"), MUSEUM_DOC).expect("should rewrite document");

    let engine = start_engine(&config, &embedder, &generator);
    let answer = engine
        .ask("Where does Ross work?")
        .expect("question should be answered");
    assert!(answer.text.contains("museum"), "answer: {}", answer.text);
}

#[test]
fn failed_build_leaves_state_unset() {
    let (config, _temp_dir) = create_corpus(&[("meeting.txt", CAFE_DOC), ("missing.txt", "")]);
    fs::remove_file(config.document_paths()[1].as_path()).expect("should delete document");
    let embedder = BagOfWordsEmbedder::new("bag-of-words");

    let lifecycle = IndexLifecycle::new(&config, &embedder);
    let err = lifecycle
        .initialize()
        .expect_err("missing document should fail the build");

    assert!(matches!(err, QaError::Extraction(_)), "got {err:?}");
    assert_eq!(
        lifecycle.state().expect("state should read"),
        LifecycleState::NeedsBuild
    );
    assert!(!config.index_path().exists());
    assert_eq!(embedder.calls(), 0);
}
