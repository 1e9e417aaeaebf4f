use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
  #[error("failed to create checkpoint directory '{path}': {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write checkpoint for step '{step_id}': {source}")]
  Write {
    step_id: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to serialize checkpoint for step '{step_id}': {source}")]
  Serialize {
    step_id: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to scan checkpoint directory '{path}': {source}")]
  Scan {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}
