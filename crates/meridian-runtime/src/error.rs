use thiserror::Error;

/// Error raised by a unit while producing, transforming, or consuming.
///
/// Inside filter and sink invocations these are per-record: the engine
/// routes them to the failure collector and the stream continues. From a
/// source's production loop, a constructor, or `finalize` they are fatal.
#[derive(Debug, Error)]
pub enum UnitError {
  #[error("{0}")]
  Message(String),

  /// The downstream side of the record channel is gone. Sources see this
  /// when the run is cancelled or the consumer has stopped.
  #[error("record output channel closed")]
  OutputClosed,

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Json(#[from] serde_json::Error),
}

impl UnitError {
  pub fn message(message: impl Into<String>) -> Self {
    Self::Message(message.into())
  }
}

/// Error from workflow-context bookkeeping.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
  /// The per-step output map has exactly one writer per key; a second
  /// write to the same key is a wiring bug.
  #[error("output for step '{0}' was already recorded")]
  DuplicateOutput(String),
}
