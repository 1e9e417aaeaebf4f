//! Durable JSONL record stores.
//!
//! Two users: the disk-spill memory strategy (drain the upstream, then
//! re-stream it) and resumable sources (persist produced records before
//! marking them done, replay them on resume). Records are one JSON object
//! per line, so a partially written trailing line from a crash is
//! detectable and everything before it is intact.

use std::io::ErrorKind;
use std::path::Path;

use meridian_runtime::Record;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};

/// Append-side handle of a record store.
pub(crate) struct RecordStore {
  writer: BufWriter<File>,
}

impl RecordStore {
  /// Create a fresh store, truncating any previous content. Used for
  /// spill files, which are scoped to a single run.
  pub async fn create(path: &Path) -> std::io::Result<Self> {
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let file = File::create(path).await?;
    Ok(Self {
      writer: BufWriter::new(file),
    })
  }

  /// Open a store for appending, creating it if missing. Used for the
  /// durable record stores of resumable sources, which accumulate across
  /// runs until checkpoints are cleared.
  pub async fn append_to(path: &Path) -> std::io::Result<Self> {
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(Self {
      writer: BufWriter::new(file),
    })
  }

  pub async fn append(&mut self, record: &Record) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(record).map_err(std::io::Error::other)?;
    line.push(b'\n');
    self.writer.write_all(&line).await
  }

  pub async fn flush(&mut self) -> std::io::Result<()> {
    self.writer.flush().await
  }

  /// Flush buffered lines and force them to disk. Resumable sources call
  /// this before every checkpoint save so a record is durable before it is
  /// marked done.
  pub async fn sync(&mut self) -> std::io::Result<()> {
    self.writer.flush().await?;
    self.writer.get_ref().sync_data().await
  }
}

/// Read-side handle: streams records back one line at a time, so replaying
/// a store keeps O(1) records in memory.
pub(crate) struct RecordReader {
  lines: Lines<BufReader<File>>,
}

impl RecordReader {
  pub async fn open(path: &Path) -> std::io::Result<Self> {
    let file = File::open(path).await?;
    Ok(Self {
      lines: BufReader::new(file).lines(),
    })
  }

  /// Open a reader if the store exists at all.
  pub async fn open_if_exists(path: &Path) -> std::io::Result<Option<Self>> {
    match Self::open(path).await {
      Ok(reader) => Ok(Some(reader)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e),
    }
  }

  pub async fn next(&mut self) -> std::io::Result<Option<Record>> {
    while let Some(line) = self.lines.next_line().await? {
      if line.trim().is_empty() {
        continue;
      }
      match serde_json::from_str::<Record>(&line) {
        Ok(record) => return Ok(Some(record)),
        // A torn trailing line from a crash mid-append; everything before
        // it was already delivered durably.
        Err(e) => {
          tracing::warn!(error = %e, "skipping unparseable record store line");
          continue;
        }
      }
    }
    Ok(None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn write_then_read_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store").join("step.jsonl");

    let mut store = RecordStore::create(&path).await.unwrap();
    for i in 0..5 {
      store
        .append(&Record::new(format!("r{i}")).field("n", i))
        .await
        .unwrap();
    }
    store.sync().await.unwrap();

    let mut reader = RecordReader::open(&path).await.unwrap();
    for i in 0..5 {
      let record = reader.next().await.unwrap().unwrap();
      assert_eq!(record.id(), format!("r{i}"));
    }
    assert!(reader.next().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn torn_trailing_line_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("step.jsonl");

    let mut store = RecordStore::create(&path).await.unwrap();
    store.append(&Record::new("a")).await.unwrap();
    store.sync().await.unwrap();
    // Simulate a crash mid-append.
    use std::io::Write;
    let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(b"{\"id\": \"tor").unwrap();

    let mut reader = RecordReader::open(&path).await.unwrap();
    assert_eq!(reader.next().await.unwrap().unwrap().id(), "a");
    assert!(reader.next().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn missing_store_reads_as_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.jsonl");
    assert!(RecordReader::open_if_exists(&path).await.unwrap().is_none());
  }
}
