use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One non-fatal, record-attributable failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
  pub record_id: String,
  pub step_id: String,
  pub message: String,
  pub occurred_at: DateTime<Utc>,
}

/// Per-step failure counts plus a total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
  pub total: usize,
  pub per_step: BTreeMap<String, usize>,
}

/// Concurrent-safe, append-only sink for item-level errors.
///
/// `add` never panics and never loses a record under concurrent access:
/// the internal lock is recovered even when poisoned, since a poisoned
/// append-only `Vec` is still structurally sound.
#[derive(Debug, Clone, Default)]
pub struct FailureCollector {
  records: Arc<Mutex<Vec<FailureRecord>>>,
  materialized: Arc<AtomicBool>,
}

impl FailureCollector {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a failure. Infallible by contract.
  pub fn add(&self, record_id: &str, step_id: &str, message: impl Display) {
    let record = FailureRecord {
      record_id: record_id.to_string(),
      step_id: step_id.to_string(),
      message: message.to_string(),
      occurred_at: Utc::now(),
    };
    tracing::debug!(record_id, step_id, message = record.message, "failure recorded");
    self
      .records
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .push(record);
  }

  /// Total failures recorded so far.
  pub fn total(&self) -> usize {
    self
      .records
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .len()
  }

  /// Per-step counts and the total.
  pub fn summary(&self) -> FailureSummary {
    let records = self
      .records
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut per_step: BTreeMap<String, usize> = BTreeMap::new();
    for record in records.iter() {
      *per_step.entry(record.step_id.clone()).or_default() += 1;
    }
    FailureSummary {
      total: records.len(),
      per_step,
    }
  }

  /// Snapshot of every failure recorded so far.
  pub fn records(&self) -> Vec<FailureRecord> {
    self
      .records
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .clone()
  }

  /// Write the full detail list as a JSONL report, exactly once.
  ///
  /// Returns the report path on first call with at least one failure,
  /// `None` on repeat calls or when nothing was recorded.
  pub fn materialize(&self, path: &Path) -> std::io::Result<Option<PathBuf>> {
    if self.materialized.swap(true, Ordering::SeqCst) {
      return Ok(None);
    }
    let records = self.records();
    if records.is_empty() {
      return Ok(None);
    }

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    for record in &records {
      let line = serde_json::to_string(record).map_err(std::io::Error::other)?;
      writeln!(file, "{line}")?;
    }
    file.sync_all()?;
    Ok(Some(path.to_path_buf()))
  }
}
