//! Built-in processing units.
//!
//! A deliberately small set covering every capability contract: enough to
//! run real file-to-file pipelines from the CLI and to exercise the engine
//! in tests. Anything domain-specific is expected to be registered by the
//! embedding application.

use std::path::PathBuf;

use async_trait::async_trait;
use meridian_runtime::{
  FilterUnit, Record, RecordEmitter, SinkUnit, SourceUnit, Unit, UnitError, WorkflowContext,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufWriter};

use crate::registry::UnitRegistry;

pub(crate) fn register(registry: &mut UnitRegistry) {
  registry.register("inline_source", |config| {
    Ok(Unit::Source(Box::new(InlineSource::from_config(config)?)))
  });
  registry.register("jsonl_source", |config| {
    Ok(Unit::Source(Box::new(JsonlSource::from_config(config)?)))
  });
  registry.register("project", |config| {
    Ok(Unit::Filter(std::sync::Arc::new(ProjectFilter::from_config(config)?)))
  });
  registry.register("jsonl_sink", |config| {
    Ok(Unit::Sink(Box::new(JsonlSink::from_config(config)?)))
  });
  registry.register("count_sink", |config| {
    Ok(Unit::Sink(Box::new(CountSink::from_config(config)?)))
  });
}

/// Deserialize a unit config blob, treating a null blob as `{}`.
fn parse_config<T: serde::de::DeserializeOwned>(config: &Value) -> Result<T, UnitError> {
  let value = if config.is_null() {
    Value::Object(serde_json::Map::new())
  } else {
    config.clone()
  };
  serde_json::from_value(value).map_err(UnitError::from)
}

fn default_id_field() -> String {
  "id".to_string()
}

// ---------------------------------------------------------------------------
// inline_source
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct InlineSourceConfig {
  records: Vec<Record>,
}

/// Source whose records are embedded in the step configuration.
struct InlineSource {
  records: Vec<Record>,
}

impl InlineSource {
  fn from_config(config: &Value) -> Result<Self, UnitError> {
    let config: InlineSourceConfig = parse_config(config)?;
    Ok(Self {
      records: config.records,
    })
  }
}

#[async_trait]
impl SourceUnit for InlineSource {
  async fn produce(&mut self, _ctx: &WorkflowContext, out: &RecordEmitter) -> Result<(), UnitError> {
    for record in self.records.drain(..) {
      out.emit(record).await?;
    }
    Ok(())
  }
}

// ---------------------------------------------------------------------------
// jsonl_source
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct JsonlSourceConfig {
  path: PathBuf,
  #[serde(default = "default_id_field")]
  id_field: String,
}

/// Source reading one JSON object per line from a file.
struct JsonlSource {
  path: PathBuf,
  id_field: String,
}

impl JsonlSource {
  fn from_config(config: &Value) -> Result<Self, UnitError> {
    let config: JsonlSourceConfig = parse_config(config)?;
    // Fail fast at construction if the input is not there.
    if !config.path.is_file() {
      return Err(UnitError::message(format!(
        "input file not found: {}",
        config.path.display()
      )));
    }
    Ok(Self {
      path: config.path,
      id_field: config.id_field,
    })
  }
}

#[async_trait]
impl SourceUnit for JsonlSource {
  async fn produce(&mut self, _ctx: &WorkflowContext, out: &RecordEmitter) -> Result<(), UnitError> {
    let file = tokio::fs::File::open(&self.path).await?;
    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
      line_no += 1;
      if line.trim().is_empty() {
        continue;
      }
      let fields: serde_json::Map<String, Value> =
        serde_json::from_str(&line).map_err(|e| {
          UnitError::message(format!(
            "{}:{line_no}: invalid record: {e}",
            self.path.display()
          ))
        })?;
      let id = match fields.get(&self.id_field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
          return Err(UnitError::message(format!(
            "{}:{line_no}: record has no usable '{}' field",
            self.path.display(),
            self.id_field
          )));
        }
      };
      out.emit(Record::with_fields(id, fields)).await?;
    }
    Ok(())
  }
}

// ---------------------------------------------------------------------------
// project
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ProjectConfig {
  fields: Vec<String>,
}

/// Filter keeping only a configured subset of fields.
struct ProjectFilter {
  fields: Vec<String>,
}

impl ProjectFilter {
  fn from_config(config: &Value) -> Result<Self, UnitError> {
    let config: ProjectConfig = parse_config(config)?;
    Ok(Self {
      fields: config.fields,
    })
  }
}

#[async_trait]
impl FilterUnit for ProjectFilter {
  async fn apply(&self, record: Record, _ctx: &WorkflowContext) -> Result<Vec<Record>, UnitError> {
    let mut projected = Record::new(record.id.clone());
    for field in &self.fields {
      if let Some(value) = record.get(field) {
        projected.fields.insert(field.clone(), value.clone());
      }
    }
    Ok(vec![projected])
  }
}

// ---------------------------------------------------------------------------
// jsonl_sink
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct JsonlSinkConfig {
  path: PathBuf,
}

/// Sink appending records as JSON lines to a file.
struct JsonlSink {
  path: PathBuf,
  writer: Option<BufWriter<tokio::fs::File>>,
  written: u64,
}

impl JsonlSink {
  fn from_config(config: &Value) -> Result<Self, UnitError> {
    let config: JsonlSinkConfig = parse_config(config)?;
    // Fail fast if the target directory cannot exist.
    if let Some(parent) = config.path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }
    Ok(Self {
      path: config.path,
      writer: None,
      written: 0,
    })
  }

  async fn writer(&mut self) -> Result<&mut BufWriter<tokio::fs::File>, UnitError> {
    if self.writer.is_none() {
      let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&self.path)
        .await?;
      self.writer = Some(BufWriter::new(file));
    }
    Ok(self.writer.as_mut().expect("writer just opened"))
  }
}

#[async_trait]
impl SinkUnit for JsonlSink {
  async fn consume(&mut self, record: Record, _ctx: &WorkflowContext) -> Result<(), UnitError> {
    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');
    self.writer().await?.write_all(&line).await?;
    self.written += 1;
    Ok(())
  }

  async fn finalize(&mut self, _ctx: &WorkflowContext) -> Result<Value, UnitError> {
    if let Some(mut writer) = self.writer.take() {
      writer.flush().await?;
      writer.into_inner().sync_all().await?;
    }
    Ok(json!({
      "records_written": self.written,
      "path": self.path.display().to_string(),
    }))
  }
}

// ---------------------------------------------------------------------------
// count_sink
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
#[serde(default)]
struct CountSinkConfig {}

/// Terminal that only counts what reaches it.
struct CountSink {
  count: u64,
}

impl CountSink {
  fn from_config(config: &Value) -> Result<Self, UnitError> {
    let _: CountSinkConfig = parse_config(config)?;
    Ok(Self { count: 0 })
  }
}

#[async_trait]
impl SinkUnit for CountSink {
  async fn consume(&mut self, _record: Record, _ctx: &WorkflowContext) -> Result<(), UnitError> {
    self.count += 1;
    Ok(())
  }

  async fn finalize(&mut self, _ctx: &WorkflowContext) -> Result<Value, UnitError> {
    Ok(json!({ "count": self.count }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use meridian_checkpoint::CheckpointStore;
  use std::collections::HashMap;
  use std::sync::Arc;
  use tokio::sync::mpsc;

  async fn context(dir: &tempfile::TempDir) -> WorkflowContext {
    let store = CheckpointStore::open(dir.path().join("checkpoints"))
      .await
      .unwrap();
    WorkflowContext::new("wf", "run", Arc::new(store), HashMap::new())
  }

  #[tokio::test]
  async fn jsonl_source_reads_and_identifies_records() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.jsonl");
    std::fs::write(
      &input,
      "{\"id\": \"a\", \"name\": \"alpha\"}\n\n{\"id\": 7, \"name\": \"seven\"}\n",
    )
    .unwrap();

    let ctx = context(&dir).await;
    let mut source = JsonlSource::from_config(&json!({"path": input})).unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    source.produce(&ctx, &RecordEmitter::new(tx)).await.unwrap();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.id(), "a");
    assert_eq!(second.id(), "7");
    assert_eq!(second.get("name"), Some(&json!("seven")));
    assert!(rx.recv().await.is_none());
  }

  #[tokio::test]
  async fn jsonl_source_rejects_records_without_id() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.jsonl");
    std::fs::write(&input, "{\"name\": \"anonymous\"}\n").unwrap();

    let ctx = context(&dir).await;
    let mut source = JsonlSource::from_config(&json!({"path": input})).unwrap();
    let (tx, _rx) = mpsc::channel(8);
    let err = source
      .produce(&ctx, &RecordEmitter::new(tx))
      .await
      .unwrap_err();
    assert!(err.to_string().contains("no usable 'id' field"));
  }

  #[tokio::test]
  async fn project_filter_keeps_configured_fields() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir).await;
    let filter = ProjectFilter::from_config(&json!({"fields": ["name"]})).unwrap();

    let record = Record::new("r1").field("name", "alpha").field("secret", 42);
    let out = filter.apply(record, &ctx).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get("name"), Some(&json!("alpha")));
    assert_eq!(out[0].get("secret"), None);
  }

  #[tokio::test]
  async fn jsonl_sink_writes_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir).await;
    let out_path = dir.path().join("out").join("records.jsonl");
    let mut sink = JsonlSink::from_config(&json!({"path": out_path})).unwrap();

    sink.consume(Record::new("a").field("v", 1), &ctx).await.unwrap();
    sink.consume(Record::new("b").field("v", 2), &ctx).await.unwrap();
    let summary = sink.finalize(&ctx).await.unwrap();

    assert_eq!(summary["records_written"], json!(2));
    let body = std::fs::read_to_string(dir.path().join("out").join("records.jsonl")).unwrap();
    assert_eq!(body.lines().count(), 2);
  }
}
