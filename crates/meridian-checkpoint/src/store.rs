use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::CheckpointError;
use crate::progress::StepCheckpoint;

/// One durable checkpoint file per step id under a checkpoint directory.
///
/// The engine guarantees a single writer per step (each step has exactly
/// one runner task); different steps' checkpoints are independent and may
/// be written concurrently.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
  dir: PathBuf,
}

impl CheckpointStore {
  /// Open a checkpoint directory, creating it if needed and deleting any
  /// orphaned temporary files left behind by a write that crashed
  /// mid-flight.
  pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
    let dir = dir.into();
    fs::create_dir_all(&dir)
      .await
      .map_err(|source| CheckpointError::CreateDir {
        path: dir.clone(),
        source,
      })?;

    let store = Self { dir };
    let swept = store.sweep_orphans().await?;
    if swept > 0 {
      warn!(dir = %store.dir.display(), swept, "removed orphaned checkpoint temp files");
    }
    Ok(store)
  }

  /// Directory this store writes into.
  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Load a step's checkpoint.
  ///
  /// Missing file: `Ok(None)` (start from empty state). Corrupt file: the
  /// file is quarantined (renamed aside), a warning is logged, and the
  /// step likewise starts from empty state.
  pub async fn load(&self, step_id: &str) -> Result<Option<StepCheckpoint>, CheckpointError> {
    let path = self.file_path(step_id);
    let bytes = match fs::read(&path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => {
        self.quarantine(step_id, &path, &e.to_string()).await;
        return Ok(None);
      }
    };

    match serde_json::from_slice::<StepCheckpoint>(&bytes) {
      Ok(checkpoint) => Ok(Some(checkpoint)),
      Err(e) => {
        self.quarantine(step_id, &path, &e.to_string()).await;
        Ok(None)
      }
    }
  }

  /// Durably persist a step's checkpoint.
  ///
  /// Writes to a temporary file, flushes it, then atomically renames it
  /// over the previous checkpoint, so a crash at any point leaves either
  /// the old or the new state on disk, never a mixture.
  pub async fn save(&self, checkpoint: &StepCheckpoint) -> Result<(), CheckpointError> {
    let step_id = checkpoint.step_id.clone();
    let bytes =
      serde_json::to_vec(checkpoint).map_err(|source| CheckpointError::Serialize {
        step_id: step_id.clone(),
        source,
      })?;

    let path = self.file_path(&step_id);
    let tmp = self.tmp_path(&step_id);
    let write = async {
      let mut file = fs::File::create(&tmp).await?;
      file.write_all(&bytes).await?;
      file.sync_all().await?;
      drop(file);
      fs::rename(&tmp, &path).await
    };
    write.await.map_err(|source| CheckpointError::Write {
      step_id: step_id.clone(),
      source,
    })?;

    debug!(step_id, path = %path.display(), "checkpoint flushed");
    Ok(())
  }

  /// Remove a step's checkpoint file, if present.
  pub async fn clear(&self, step_id: &str) -> Result<(), CheckpointError> {
    match fs::remove_file(self.file_path(step_id)).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(CheckpointError::Write {
        step_id: step_id.to_string(),
        source,
      }),
    }
  }

  /// Delete stray `.tmp` files from interrupted writes. Returns how many
  /// were removed.
  pub async fn sweep_orphans(&self) -> Result<usize, CheckpointError> {
    let mut entries = fs::read_dir(&self.dir)
      .await
      .map_err(|source| CheckpointError::Scan {
        path: self.dir.clone(),
        source,
      })?;

    let mut swept = 0;
    while let Some(entry) = entries
      .next_entry()
      .await
      .map_err(|source| CheckpointError::Scan {
        path: self.dir.clone(),
        source,
      })?
    {
      let path = entry.path();
      if path.extension().is_some_and(|ext| ext == "tmp") {
        if fs::remove_file(&path).await.is_ok() {
          swept += 1;
        }
      }
    }
    Ok(swept)
  }

  async fn quarantine(&self, step_id: &str, path: &Path, reason: &str) {
    let aside = self
      .dir
      .join(format!("{}.json.corrupt-{}", sanitize(step_id), Utc::now().timestamp()));
    match fs::rename(path, &aside).await {
      Ok(()) => warn!(
        step_id,
        quarantined = %aside.display(),
        reason,
        "unreadable checkpoint quarantined; step restarts from empty state"
      ),
      Err(e) => warn!(
        step_id,
        path = %path.display(),
        reason,
        error = %e,
        "unreadable checkpoint could not be quarantined; step restarts from empty state"
      ),
    }
  }

  fn file_path(&self, step_id: &str) -> PathBuf {
    self.dir.join(format!("{}.json", sanitize(step_id)))
  }

  fn tmp_path(&self, step_id: &str) -> PathBuf {
    self.dir.join(format!("{}.json.tmp", sanitize(step_id)))
  }
}

/// Step ids become file names; keep them filesystem-safe.
fn sanitize(step_id: &str) -> String {
  step_id.replace(['/', '\\'], "--")
}
