// Configuration management module
// Handles the TOML settings file and the persisted lifecycle state

pub mod interactive;
pub mod settings;
pub mod state;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, CorpusConfig, GenerationConfig, OllamaConfig, RetrievalConfig,
};
pub use state::LifecycleState;

/// Resolve the data directory, preferring an explicit override
#[inline]
pub fn resolve_data_dir(
    override_dir: Option<std::path::PathBuf>,
) -> Result<std::path::PathBuf, ConfigError> {
    match override_dir {
        Some(dir) => Ok(dir),
        None => Config::default_dir(),
    }
}
