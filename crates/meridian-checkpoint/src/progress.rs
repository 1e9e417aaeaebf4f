use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The shape of a step's progress marker.
///
/// Sources and sinks track the identifiers they have finished with; units
/// that read a seekable input may instead store a resumable offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Progress {
  Ids { ids: BTreeSet<String> },
  Offset { offset: u64 },
}

impl Progress {
  pub fn empty_ids() -> Self {
    Self::Ids {
      ids: BTreeSet::new(),
    }
  }
}

/// One step's durable progress, as persisted to its checkpoint file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCheckpoint {
  pub step_id: String,
  pub progress: Progress,
  pub updated_at: DateTime<Utc>,
}

impl StepCheckpoint {
  /// Fresh checkpoint with an empty processed-id set.
  pub fn new_ids(step_id: impl Into<String>) -> Self {
    Self {
      step_id: step_id.into(),
      progress: Progress::empty_ids(),
      updated_at: Utc::now(),
    }
  }

  /// Whether a record id is already marked done.
  pub fn is_done(&self, record_id: &str) -> bool {
    match &self.progress {
      Progress::Ids { ids } => ids.contains(record_id),
      Progress::Offset { .. } => false,
    }
  }

  /// Mark a record id done. Returns `false` if it was already present or
  /// the progress marker is offset-shaped.
  pub fn mark_done(&mut self, record_id: &str) -> bool {
    match &mut self.progress {
      Progress::Ids { ids } => {
        let inserted = ids.insert(record_id.to_string());
        if inserted {
          self.updated_at = Utc::now();
        }
        inserted
      }
      Progress::Offset { .. } => false,
    }
  }

  /// Number of ids marked done (zero for offset progress).
  pub fn done_count(&self) -> usize {
    match &self.progress {
      Progress::Ids { ids } => ids.len(),
      Progress::Offset { .. } => 0,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mark_and_query_ids() {
    let mut cp = StepCheckpoint::new_ids("fetch");
    assert!(!cp.is_done("r1"));
    assert!(cp.mark_done("r1"));
    assert!(!cp.mark_done("r1"));
    assert!(cp.is_done("r1"));
    assert_eq!(cp.done_count(), 1);
  }

  #[test]
  fn progress_roundtrips_through_json() {
    let mut cp = StepCheckpoint::new_ids("fetch");
    cp.mark_done("a");
    cp.mark_done("b");

    let json = serde_json::to_string(&cp).unwrap();
    let back: StepCheckpoint = serde_json::from_str(&json).unwrap();
    assert_eq!(back, cp);
  }
}
