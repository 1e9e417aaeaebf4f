use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::step::MemoryMode;

fn default_concurrency() -> usize {
  1
}

fn default_batch_size() -> usize {
  64
}

/// Global tuning knobs for a workflow.
///
/// Everything here can be overridden per step where it makes sense; the
/// values below are the workflow-wide defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
  /// Default worker-pool size for filter steps.
  #[serde(default = "default_concurrency")]
  pub concurrency: usize,

  /// Default micro-batch size.
  #[serde(default = "default_batch_size")]
  pub batch_size: usize,

  /// Bounded queue depth between steps. Defaults to twice the batch size.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub queue_depth: Option<usize>,

  /// Records processed between checkpoint flushes. Defaults to the batch
  /// size; this bounds how much work is re-done after a crash.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub checkpoint_flush_interval: Option<usize>,

  /// Default memory strategy for consuming steps.
  #[serde(default)]
  pub memory: MemoryMode,

  /// Checkpoint directory override. When unset the runner derives one from
  /// its data directory and the workflow name.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub checkpoint_dir: Option<PathBuf>,

  /// Failure report directory override.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub report_dir: Option<PathBuf>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      concurrency: default_concurrency(),
      batch_size: default_batch_size(),
      queue_depth: None,
      checkpoint_flush_interval: None,
      memory: MemoryMode::default(),
      checkpoint_dir: None,
      report_dir: None,
    }
  }
}

impl Settings {
  /// Queue depth to use between steps: the explicit value, or twice the
  /// batch size.
  pub fn effective_queue_depth(&self) -> usize {
    self.queue_depth.unwrap_or(2 * self.batch_size).max(1)
  }

  /// Records between checkpoint flushes: the explicit value, or the batch
  /// size.
  pub fn effective_flush_interval(&self) -> usize {
    self.checkpoint_flush_interval.unwrap_or(self.batch_size).max(1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_derive_queue_depth_from_batch_size() {
    let settings = Settings::default();
    assert_eq!(settings.batch_size, 64);
    assert_eq!(settings.effective_queue_depth(), 128);
    assert_eq!(settings.effective_flush_interval(), 64);
  }

  #[test]
  fn explicit_queue_depth_wins() {
    let settings = Settings {
      queue_depth: Some(4),
      ..Settings::default()
    };
    assert_eq!(settings.effective_queue_depth(), 4);
  }

  #[test]
  fn settings_parse_from_empty_object() {
    let settings: Settings = serde_json::from_str("{}").unwrap();
    assert_eq!(settings, Settings::default());
  }
}
