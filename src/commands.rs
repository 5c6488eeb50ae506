use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{Config, LifecycleState};
use crate::embeddings::Embedder;
use crate::embeddings::ollama::OllamaClient;
use crate::index::VectorIndex;
use crate::indexer::{IndexLifecycle, init_data_dir};
use crate::mcp::{AskHandler, McpServer};
use crate::qa::QaEngine;

/// Create the data directory with default configuration and lifecycle state
#[inline]
pub fn init(data_dir: &Path) -> Result<()> {
    let outcome = init_data_dir(data_dir)
        .with_context(|| format!("Failed to initialize {}", data_dir.display()))?;

    println!("📁 Data directory: {}", data_dir.display());
    if outcome.config_created {
        println!("   ✅ Created config.toml with default settings");
    } else {
        println!("   ℹ️  Kept existing config.toml");
    }
    if outcome.state_created {
        println!("   ✅ Created state.toml (index not built yet)");
    } else {
        println!("   ℹ️  Kept existing state.toml");
    }

    println!();
    println!("💡 Next Steps:");
    println!("   • List your documents under [corpus] documents in config.toml");
    println!("   • Use 'pdf-qa config' to set up the Ollama connection and models");
    println!("   • Use 'pdf-qa ingest' to build the index");
    Ok(())
}

fn load_config(data_dir: &Path) -> Result<Config> {
    Config::load(data_dir).context("Failed to load configuration")
}

/// Run the index lifecycle and assemble the shared engine
fn prepare_engine(config: &Config) -> Result<Arc<QaEngine>> {
    let client = Arc::new(OllamaClient::new(config).context("Failed to create Ollama client")?);

    let index = IndexLifecycle::new(config, &*client)
        .initialize()
        .inspect_err(|e| {
            if e.is_state_desync() {
                error!("Lifecycle state and index disagree: {}", e);
            }
        })
        .context("Failed to prepare the index")?;

    let embedder: Arc<dyn Embedder> = Arc::clone(&client) as Arc<dyn Embedder>;
    let engine = QaEngine::new(Arc::new(index), embedder, client, config)
        .context("Failed to create question answering engine")?;
    Ok(Arc::new(engine))
}

/// Build the index now if it does not exist yet
#[inline]
pub async fn ingest(data_dir: &Path) -> Result<()> {
    let config = load_config(data_dir)?;

    let index = tokio::task::spawn_blocking(move || -> Result<VectorIndex> {
        let client = OllamaClient::new(&config).context("Failed to create Ollama client")?;
        let lifecycle = IndexLifecycle::new(&config, &client);
        if lifecycle.state()? == LifecycleState::Ready {
            println!("ℹ️  Index already built; use 'pdf-qa reset' first to rebuild it");
        }
        Ok(lifecycle.initialize()?)
    })
    .await
    .context("Ingestion task failed")??;

    let metadata = index.metadata();
    println!("✅ Index ready");
    println!("   📄 Passages: {}", metadata.passage_count);
    println!("   🔢 Dimension: {}", metadata.dimension);
    println!("   🤖 Embedding model: {}", metadata.embedding_model);
    println!(
        "   🕒 Built at: {}",
        metadata.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

/// Answer one question and print the result
#[inline]
pub async fn ask(data_dir: &Path, question: String, show_sources: bool) -> Result<()> {
    let config = load_config(data_dir)?;

    let answer = tokio::task::spawn_blocking(move || {
        let engine = prepare_engine(&config)?;
        engine.ask(&question).map_err(anyhow::Error::from)
    })
    .await
    .context("Question answering task failed")??;

    println!("{}", answer.text);

    if show_sources && !answer.passages.is_empty() {
        println!();
        println!("📚 Sources:");
        for passage in &answer.passages {
            let preview: String = passage.text.chars().take(120).collect();
            println!(
                "   [{}] {} @{}: {}",
                passage.id,
                passage.document,
                passage.offset,
                preview.replace('\n', " ")
            );
        }
    }
    Ok(())
}

/// Serve the `ask` tool over MCP on stdio until EOF or Ctrl+C
#[inline]
pub async fn serve(data_dir: &Path) -> Result<()> {
    let config = load_config(data_dir)?;

    // Startup fails fast when the index cannot be built or loaded
    let engine = tokio::task::spawn_blocking(move || prepare_engine(&config))
        .await
        .context("Startup task failed")??;

    let server = McpServer::new("pdf-qa".to_string(), env!("CARGO_PKG_VERSION").to_string())
        .with_instructions(
            "Ask questions about the indexed corpus with the `ask` tool. Questions outside \
             the corpus are answered with a fixed refusal sentence."
                .to_string(),
        );
    server
        .register_tool(AskHandler::tool_definition(), AskHandler::new(engine))
        .await;
    let server = Arc::new(server);

    // stdout carries the protocol; human-readable output goes to stderr
    eprintln!("✅ MCP server initialized with tool: ask");
    eprintln!("Note: This server uses stdio transport. Connect via MCP client.");

    tokio::select! {
        result = Arc::clone(&server).serve_stdio() => {
            result.context("MCP server failed")?;
            info!("MCP server stopped normally");
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n📴 Received interrupt signal, shutting down...");
        }
    }

    Ok(())
}

/// Show the lifecycle state, index summary and model server health
#[inline]
pub fn status(data_dir: &Path) -> Result<()> {
    let config = load_config(data_dir)?;
    let client = OllamaClient::new(&config).context("Failed to create Ollama client")?;

    println!("📊 pdf-qa Status Report");
    println!("{}", "=".repeat(50));
    println!();
    println!("📁 Data directory: {}", data_dir.display());
    println!(
        "📚 Corpus: {} document(s) configured",
        config.corpus.documents.len()
    );
    for path in config.document_paths() {
        let marker = if path.exists() { "✅" } else { "❌" };
        println!("   {} {}", marker, path.display());
    }

    println!();
    println!("🔄 Lifecycle:");
    let lifecycle = IndexLifecycle::new(&config, &client);
    match lifecycle.state() {
        Ok(LifecycleState::NeedsBuild) => {
            println!("   ⏳ State: {} (run 'pdf-qa ingest')", LifecycleState::NeedsBuild);
        }
        Ok(LifecycleState::Ready) => {
            println!("   ✅ State: {}", LifecycleState::Ready);
            match VectorIndex::load(&config.index_path()) {
                Ok(index) => {
                    let metadata = index.metadata();
                    println!("   📄 Passages: {}", metadata.passage_count);
                    println!("   🔢 Dimension: {}", metadata.dimension);
                    println!("   🤖 Embedding model: {}", metadata.embedding_model);
                    if let Err(e) = index.ensure_model(client.embedding_model()) {
                        println!("   ⚠️  {}", e);
                    }
                }
                Err(e) => println!("   ❌ {}", e),
            }
        }
        Err(e) => println!("   ❌ {}", e),
    }

    println!();
    println!("🤖 Ollama Status:");
    match client.health_check() {
        Ok(()) => {
            println!(
                "   ✅ Ollama: Connected ({}:{})",
                config.ollama.host, config.ollama.port
            );
            println!("   📋 Embedding model: {}", config.ollama.embedding_model);
            println!("   💬 Generation model: {}", config.generation.model);
        }
        Err(e) => {
            warn!("Ollama health check failed: {:#}", e);
            println!("   ❌ Ollama: {:#}", e);
        }
    }

    Ok(())
}

/// Discard the index so the next start rebuilds it from the corpus
#[inline]
pub fn reset(data_dir: &Path) -> Result<()> {
    let config = load_config(data_dir)?;
    let client = OllamaClient::new(&config).context("Failed to create Ollama client")?;

    IndexLifecycle::new(&config, &client)
        .reset()
        .context("Failed to reset the index")?;

    println!("✅ Index removed; it will be rebuilt on the next 'pdf-qa ingest' or 'pdf-qa serve'");
    Ok(())
}
