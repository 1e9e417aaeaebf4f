use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use meridian_checkpoint::CheckpointStore;
use serde_json::Value;

use crate::error::ContextError;
use crate::failures::FailureCollector;

/// The explicit, passed-everywhere state carrier for one workflow run.
///
/// Created per run (or per matrix variant) and discarded at run end. There
/// is no process-wide state: every unit invocation receives a reference to
/// the context of the run it belongs to.
///
/// The per-step output map has exactly one writer per key - the owning
/// step - and many read-only consumers. That convention is enforced at
/// write time rather than by the type system.
pub struct WorkflowContext {
  workflow_id: String,
  run_id: String,
  overrides: HashMap<String, Value>,
  failures: FailureCollector,
  checkpoints: Arc<CheckpointStore>,
  outputs: Mutex<HashMap<String, Value>>,
}

impl WorkflowContext {
  pub fn new(
    workflow_id: impl Into<String>,
    run_id: impl Into<String>,
    checkpoints: Arc<CheckpointStore>,
    overrides: HashMap<String, Value>,
  ) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      run_id: run_id.into(),
      overrides,
      failures: FailureCollector::new(),
      checkpoints,
      outputs: Mutex::new(HashMap::new()),
    }
  }

  pub fn workflow_id(&self) -> &str {
    &self.workflow_id
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  /// Side-channel override for parameterized re-runs, if set.
  pub fn override_value(&self, key: &str) -> Option<&Value> {
    self.overrides.get(key)
  }

  pub fn overrides(&self) -> &HashMap<String, Value> {
    &self.overrides
  }

  pub fn failures(&self) -> &FailureCollector {
    &self.failures
  }

  pub fn checkpoints(&self) -> &CheckpointStore {
    &self.checkpoints
  }

  /// Record a step's output value. Exactly one writer per key: a second
  /// write to the same step id is rejected.
  pub fn record_output(&self, step_id: &str, value: Value) -> Result<(), ContextError> {
    let mut outputs = self
      .outputs
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    if outputs.contains_key(step_id) {
      return Err(ContextError::DuplicateOutput(step_id.to_string()));
    }
    outputs.insert(step_id.to_string(), value);
    Ok(())
  }

  /// Read a step's recorded output, if any.
  pub fn output(&self, step_id: &str) -> Option<Value> {
    self
      .outputs
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .get(step_id)
      .cloned()
  }

  /// Snapshot of every recorded step output.
  pub fn outputs(&self) -> HashMap<String, Value> {
    self
      .outputs
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  async fn context() -> (WorkflowContext, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::open(dir.path().join("checkpoints"))
      .await
      .unwrap();
    let ctx = WorkflowContext::new("wf", "run-1", Arc::new(store), HashMap::new());
    (ctx, dir)
  }

  #[tokio::test]
  async fn outputs_have_one_writer_per_key() {
    let (ctx, _dir) = context().await;

    ctx.record_output("write", json!({"count": 3})).unwrap();
    assert_eq!(ctx.output("write"), Some(json!({"count": 3})));

    let err = ctx.record_output("write", json!({"count": 4})).unwrap_err();
    assert_eq!(err, ContextError::DuplicateOutput("write".to_string()));
    assert_eq!(ctx.output("write"), Some(json!({"count": 3})));
  }

  #[tokio::test]
  async fn overrides_are_visible_to_units() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::open(dir.path().join("checkpoints"))
      .await
      .unwrap();
    let mut overrides = HashMap::new();
    overrides.insert("region".to_string(), json!("eu-west"));
    let ctx = WorkflowContext::new("wf", "run-1", Arc::new(store), overrides);

    assert_eq!(ctx.override_value("region"), Some(&json!("eu-west")));
    assert_eq!(ctx.override_value("missing"), None);
  }
}
