use serde::{Deserialize, Serialize};

/// How the engine moves records into a consuming step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
  /// Pull one record at a time from a bounded queue (the default).
  #[default]
  Stream,
  /// Accumulate up to the configured batch size before invoking the unit.
  Batch,
  /// Drain the whole upstream to a durable spill file, then re-stream it.
  Spill,
}

/// A single step declaration inside a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  /// Step identifier, unique within the workflow.
  pub id: String,

  /// Unit type name, resolved against the unit registry.
  pub unit: String,

  /// Configuration blob handed verbatim to the unit constructor.
  #[serde(default)]
  pub config: serde_json::Value,

  /// Ids of the steps whose output this step consumes.
  #[serde(default)]
  pub depends_on: Vec<String>,

  /// Memory strategy override for this step.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub memory: Option<MemoryMode>,

  /// Worker-pool size override for intra-step fan-out.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub concurrency: Option<usize>,

  /// Batch size override for micro-batching.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub batch_size: Option<usize>,

  /// Whether produced records are persisted for checkpointed resume.
  /// Only meaningful for source steps; cheap sources leave this unset and
  /// accept idempotent re-execution after a crash.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resumable: Option<bool>,
}
