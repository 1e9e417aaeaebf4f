//! Per-step execution planning: effective tuning values and the on-disk
//! layout of a run.

use std::path::{Path, PathBuf};

use meridian_config::{MemoryMode, Settings, StepDef};

/// Resolved tuning for one step: the step's overrides where present,
/// otherwise the workflow-wide settings.
#[derive(Debug, Clone)]
pub(crate) struct StepPlan {
  pub step_id: String,
  pub memory: MemoryMode,
  pub concurrency: usize,
  pub batch_size: usize,
  pub queue_depth: usize,
  pub flush_interval: usize,
  pub resumable: bool,
}

impl StepPlan {
  pub fn resolve(step: &StepDef, settings: &Settings) -> Self {
    let batch_size = step.batch_size.unwrap_or(settings.batch_size).max(1);
    // Queue depth defaults to twice the effective batch size so a consumer
    // can drain one batch while the producer fills the next.
    let queue_depth = settings.queue_depth.unwrap_or(2 * batch_size).max(1);
    Self {
      step_id: step.id.clone(),
      memory: step.memory.unwrap_or(settings.memory),
      concurrency: step.concurrency.unwrap_or(settings.concurrency).max(1),
      batch_size,
      queue_depth,
      flush_interval: settings.effective_flush_interval(),
      resumable: step.resumable.unwrap_or(false),
    }
  }
}

/// Where a run keeps its durable state.
///
/// Checkpoints and record stores outlive the run (they are what resume
/// reads); spill files are scoped to one run id and removed afterwards.
#[derive(Debug, Clone)]
pub(crate) struct RunLayout {
  checkpoint_dir: PathBuf,
  records_dir: PathBuf,
  spill_dir: PathBuf,
  report_path: PathBuf,
}

impl RunLayout {
  pub fn new(data_dir: &Path, workflow_name: &str, settings: &Settings, run_id: &str) -> Self {
    let base = data_dir.join(sanitize(workflow_name));
    let checkpoint_dir = settings
      .checkpoint_dir
      .clone()
      .unwrap_or_else(|| base.join("checkpoints"));
    let report_dir = settings
      .report_dir
      .clone()
      .unwrap_or_else(|| base.join("reports"));
    Self {
      checkpoint_dir,
      records_dir: base.join("records"),
      spill_dir: base.join("spill").join(run_id),
      report_path: report_dir.join(format!("{run_id}-failures.jsonl")),
    }
  }

  pub fn checkpoint_dir(&self) -> &Path {
    &self.checkpoint_dir
  }

  pub fn spill_dir(&self) -> &Path {
    &self.spill_dir
  }

  pub fn report_path(&self) -> &Path {
    &self.report_path
  }

  /// Durable record store for a resumable source.
  pub fn record_store_path(&self, step_id: &str) -> PathBuf {
    self.records_dir.join(format!("{}.jsonl", sanitize(step_id)))
  }

  /// Spill file for a consuming step, scoped to this run.
  pub fn spill_path(&self, step_id: &str) -> PathBuf {
    self.spill_dir.join(format!("{}.jsonl", sanitize(step_id)))
  }
}

fn sanitize(name: &str) -> String {
  name.replace(['/', '\\'], "--")
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::Value;

  fn step(id: &str) -> StepDef {
    StepDef {
      id: id.to_string(),
      unit: "unit".to_string(),
      config: Value::Null,
      depends_on: vec![],
      memory: None,
      concurrency: None,
      batch_size: None,
      resumable: None,
    }
  }

  #[test]
  fn step_overrides_beat_settings() {
    let settings = Settings::default();
    let mut declared = step("validate");
    declared.batch_size = Some(10);
    declared.concurrency = Some(4);
    declared.memory = Some(MemoryMode::Batch);

    let plan = StepPlan::resolve(&declared, &settings);
    assert_eq!(plan.batch_size, 10);
    assert_eq!(plan.queue_depth, 20);
    assert_eq!(plan.concurrency, 4);
    assert_eq!(plan.memory, MemoryMode::Batch);
  }

  #[test]
  fn defaults_flow_from_settings() {
    let plan = StepPlan::resolve(&step("validate"), &Settings::default());
    assert_eq!(plan.batch_size, 64);
    assert_eq!(plan.queue_depth, 128);
    assert_eq!(plan.concurrency, 1);
    assert_eq!(plan.memory, MemoryMode::Stream);
    assert!(!plan.resumable);
  }
}
