//! Model State (C9): durable storage of the currently selected chat model
//!
//! Grounded on the teacher's `workflow.rs` snapshot persistence
//! (`serde_json::to_string_pretty` + `fs::write`, `debug!`-logged), with
//! the temp-file-then-rename step and triple read-back verification added
//! per §4.9 since the teacher's snapshot store has no durability
//! requirement beyond "the write succeeded".

use crate::config::ModelStateConfig;
use crate::error::{Result, WhereSpaceError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct ModelStateFile {
    current_model: String,
}

/// Tracks which chat model is currently selected, persisting the choice
/// to disk so a restart doesn't silently fall back to the configured
/// default (§4.9)
pub struct ModelState {
    path: PathBuf,
    current: parking_lot::RwLock<String>,
}

impl ModelState {
    /// Load the persisted model from `config.state_path`, falling back to
    /// `config.default_model` if no state file exists yet or it fails to
    /// parse
    pub fn load(config: &ModelStateConfig) -> Self {
        let path = PathBuf::from(&config.state_path);
        let current = match Self::read_file(&path) {
            Ok(Some(state)) => state.current_model,
            Ok(None) => {
                debug!(path = %path.display(), "no model state file yet, using configured default");
                config.default_model.clone()
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "model state file unreadable, using configured default");
                config.default_model.clone()
            }
        };

        Self {
            path,
            current: parking_lot::RwLock::new(current),
        }
    }

    pub fn current(&self) -> String {
        self.current.read().clone()
    }

    /// Persist `model` as the current selection, verifying the write in
    /// three steps before returning success: (1) the temp-file write and
    /// rename complete without error, (2) reading the file back yields
    /// exactly what was written, (3) reloading via `read_file` from a
    /// freshly opened handle agrees with both. Any step failing leaves
    /// the in-memory selection unchanged and returns an error, since a
    /// model switch the process doesn't remember past its next restart is
    /// worse than refusing the switch outright.
    pub async fn set_current(&self, model: String) -> Result<()> {
        let state = ModelStateFile {
            current_model: model.clone(),
        };
        let json = serde_json::to_string_pretty(&state)?;

        self.write_atomic(&json).await?;

        let read_back = tokio::fs::read_to_string(&self.path).await?;
        if read_back != json {
            return Err(WhereSpaceError::Internal(format!(
                "model state verification failed: wrote {} bytes, read back {} bytes",
                json.len(),
                read_back.len()
            )));
        }

        let reloaded = Self::read_file(&self.path)?.ok_or_else(|| {
            WhereSpaceError::Internal("model state file vanished after write".to_string())
        })?;
        if reloaded != state {
            return Err(WhereSpaceError::Internal(
                "model state reload mismatch after write".to_string(),
            ));
        }

        *self.current.write() = model.clone();
        info!(model, "current model updated and durably persisted");
        Ok(())
    }

    async fn write_atomic(&self, json: &str) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    fn read_file(path: &Path) -> Result<Option<ModelStateFile>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let state: ModelStateFile = serde_json::from_str(&contents)?;
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_at(path: &Path) -> ModelStateConfig {
        ModelStateConfig {
            state_path: path.to_string_lossy().into_owned(),
            default_model: "llama3.1".to_string(),
        }
    }

    #[test]
    fn test_load_missing_file_uses_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model_state.json");
        let state = ModelState::load(&config_at(&path));
        assert_eq!(state.current(), "llama3.1");
    }

    #[tokio::test]
    async fn test_set_current_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model_state.json");
        let config = config_at(&path);

        let state = ModelState::load(&config);
        state.set_current("mistral".to_string()).await.unwrap();
        assert_eq!(state.current(), "mistral");

        let reloaded = ModelState::load(&config);
        assert_eq!(reloaded.current(), "mistral");
    }

    #[tokio::test]
    async fn test_set_current_overwrites_previous() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model_state.json");
        let config = config_at(&path);

        let state = ModelState::load(&config);
        state.set_current("mistral".to_string()).await.unwrap();
        state.set_current("gemma2".to_string()).await.unwrap();
        assert_eq!(state.current(), "gemma2");

        let reloaded = ModelState::load(&config);
        assert_eq!(reloaded.current(), "gemma2");
    }

    #[test]
    fn test_load_corrupt_file_uses_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model_state.json");
        std::fs::write(&path, "not json").unwrap();
        let state = ModelState::load(&config_at(&path));
        assert_eq!(state.current(), "llama3.1");
    }
}
