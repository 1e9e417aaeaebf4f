//! Fatal error taxonomy for workflow execution.
//!
//! Everything here aborts the run (`RunStatus::Failed`). Per-record errors
//! are not represented: they go to the failure collector and the stream
//! continues.

use meridian_checkpoint::CheckpointError;
use meridian_registry::RegistryError;
use meridian_runtime::{ContextError, UnitError};
use meridian_workflow::WorkflowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  /// Malformed DAG: cycle, missing dependency, duplicate id.
  #[error(transparent)]
  Workflow(#[from] WorkflowError),

  /// Unknown unit type or unit construction failure.
  #[error(transparent)]
  Registry(#[from] RegistryError),

  /// Unrecoverable checkpoint write failure.
  #[error(transparent)]
  Checkpoint(#[from] CheckpointError),

  /// Violation of the one-writer-per-output-key convention.
  #[error(transparent)]
  Context(#[from] ContextError),

  #[error("step '{step_id}' has no dependencies and must be a source, but unit type '{unit_type}' is a {capability}")]
  EntryNotSource {
    step_id: String,
    unit_type: String,
    capability: String,
  },

  #[error("step '{step_id}' is terminal and must be a sink, but unit type '{unit_type}' is a {capability}")]
  TerminalNotSink {
    step_id: String,
    unit_type: String,
    capability: String,
  },

  #[error("step '{step_id}' feeds downstream steps and must be a filter, but unit type '{unit_type}' is a {capability}")]
  MiddleNotFilter {
    step_id: String,
    unit_type: String,
    capability: String,
  },

  /// A source failed while producing records.
  #[error("source '{step_id}' failed: {source}")]
  SourceFailed {
    step_id: String,
    #[source]
    source: UnitError,
  },

  /// A sink's finalize call failed.
  #[error("finalize failed for sink '{step_id}': {source}")]
  FinalizeFailed {
    step_id: String,
    #[source]
    source: UnitError,
  },

  /// Spill or record-store I/O failure.
  #[error("record store failure for step '{step_id}': {source}")]
  Store {
    step_id: String,
    #[source]
    source: std::io::Error,
  },

  /// A step runner task panicked.
  #[error("step task for '{step_id}' panicked: {message}")]
  TaskPanicked { step_id: String, message: String },
}
