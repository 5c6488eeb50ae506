use anyhow::Result;
use clap::{Parser, Subcommand};
use pdf_qa::commands::{ask, ingest, init, reset, serve, status};
use pdf_qa::config::{resolve_data_dir, run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pdf-qa")]
#[command(about = "Question answering over a fixed document corpus with retrieval-augmented generation")]
#[command(version)]
struct Cli {
    /// Data directory holding config.toml, state.toml and the index (default: ~/.pdf-qa)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory with default configuration
    Init,
    /// Configure Ollama connection and models
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Build the index from the configured corpus if it does not exist yet
    Ingest,
    /// Answer a single question
    Ask {
        /// The question to answer
        question: String,
        /// Also print the retrieved passages
        #[arg(long)]
        sources: bool,
    },
    /// Start MCP server on stdio
    Serve,
    /// Show lifecycle state, index summary and Ollama health
    Status,
    /// Delete the index so it is rebuilt on next start
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout is reserved for command output and the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir)?;

    match cli.command {
        Commands::Init => {
            init(&data_dir)?;
        }
        Commands::Config { show } => {
            if show {
                show_config(&data_dir)?;
            } else {
                run_interactive_config(&data_dir)?;
            }
        }
        Commands::Ingest => {
            ingest(&data_dir).await?;
        }
        Commands::Ask { question, sources } => {
            ask(&data_dir, question, sources).await?;
        }
        Commands::Serve => {
            serve(&data_dir).await?;
        }
        Commands::Status => {
            status(&data_dir)?;
        }
        Commands::Reset => {
            reset(&data_dir)?;
        }
    }

    Ok(())
}
