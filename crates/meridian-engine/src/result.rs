use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

/// Terminal status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  /// Zero failures recorded, no fatal error.
  Completed,
  /// Non-fatal failures were recorded but every step ran to completion.
  CompletedWithFailures,
  /// A fatal error aborted the run.
  Failed,
}

/// Per-step accounting in the final result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepSummary {
  pub records_in: u64,
  pub records_out: u64,
  pub failures: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output: Option<Value>,
}

/// What a workflow run hands back to its caller.
///
/// Every record that entered the pipeline is accounted for: it either
/// reached a sink (visible in the step summaries) or appears in the
/// failure report this result points at.
#[derive(Debug, Serialize)]
pub struct WorkflowResult {
  pub workflow: String,
  pub run_id: String,
  pub status: RunStatus,
  pub failure_count: u64,
  /// Durable failure report, when any failures were recorded.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub report: Option<PathBuf>,
  pub steps: BTreeMap<String, StepSummary>,
  /// Whether a cooperative stop was requested during the run.
  pub interrupted: bool,
  /// The fatal error, when `status` is `Failed`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}
