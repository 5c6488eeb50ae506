//! Persisted lifecycle state
//!
//! A single flag, `vectorstore_created`, records whether a complete index
//! exists on disk. The file is always replaced whole through a temporary
//! file and a rename, so readers never observe a partial write.


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{QaError, Result};

/// Whether the index still has to be built or can be loaded from disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NeedsBuild,
    Ready,
}

impl std::fmt::Display for LifecycleState {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NeedsBuild => write!(f, "needs build"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// On-disk representation of the lifecycle state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateFile {
    pub vectorstore_created: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_at: Option<DateTime<Utc>>,
}

impl StateFile {
    #[inline]
    pub fn needs_build() -> Self {
        Self::default()
    }

    #[inline]
    pub fn ready() -> Self {
        Self {
            vectorstore_created: 1,
            built_at: Some(Utc::now()),
        }
    }

    #[inline]
    pub fn lifecycle_state(&self) -> Result<LifecycleState> {
        match self.vectorstore_created {
            0 => Ok(LifecycleState::NeedsBuild),
            1 => Ok(LifecycleState::Ready),
            other => Err(QaError::Config(format!(
                "vectorstore_created must be 0 or 1, found {}",
                other
            ))),
        }
    }

    /// Read the state file. A missing or malformed file is a configuration
    /// error; the lifecycle never guesses its state.
    #[inline]
    pub fn read(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QaError::Config(format!(
                    "Lifecycle state file {} is missing. Run `pdf-qa init` first",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(QaError::Config(format!(
                    "Failed to read lifecycle state file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let state: Self = toml::from_str(&content).map_err(|e| {
            QaError::Config(format!(
                "Lifecycle state file {} is corrupt: {}",
                path.display(),
                e
            ))
        })?;

        // Reject out-of-range flags at read time
        state.lifecycle_state()?;

        debug!(
            "Read lifecycle state from {}: vectorstore_created={}",
            path.display(),
            state.vectorstore_created
        );
        Ok(state)
    }

    /// Replace the state file atomically
    #[inline]
    pub fn write(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| QaError::Persistence(format!("Failed to serialize state: {}", e)))?;

        write_atomically(path, content.as_bytes()).map_err(|e| {
            QaError::Persistence(format!(
                "Failed to write lifecycle state {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!(
            "Wrote lifecycle state to {}: vectorstore_created={}",
            path.display(),
            self.vectorstore_created
        );
        Ok(())
    }
}

/// Write `bytes` to a sibling temp file, sync it, then rename it over `path`
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = temp_path_for(path);
    let result = write_and_rename(&tmp_path, path, bytes);

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_and_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(tmp_path, path)
}

pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
