use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::context::WorkflowContext;
use crate::error::UnitError;
use crate::record::Record;

/// Handle a source writes its records into.
///
/// Backed by a bounded channel: `emit` suspends while the downstream queue
/// is full, which is the engine's sole throttling mechanism.
pub struct RecordEmitter {
  tx: mpsc::Sender<Record>,
}

impl RecordEmitter {
  pub fn new(tx: mpsc::Sender<Record>) -> Self {
    Self { tx }
  }

  /// Emit one record, suspending under backpressure.
  ///
  /// Fails with [`UnitError::OutputClosed`] once the engine has stopped
  /// accepting records (cancellation or downstream completion); sources
  /// should return promptly when they see it.
  pub async fn emit(&self, record: Record) -> Result<(), UnitError> {
    self.tx.send(record).await.map_err(|_| UnitError::OutputClosed)
  }
}

/// A unit that produces records and takes no record input.
///
/// Backs steps with no dependencies.
#[async_trait]
pub trait SourceUnit: Send {
  async fn produce(
    &mut self,
    ctx: &WorkflowContext,
    out: &RecordEmitter,
  ) -> Result<(), UnitError>;
}

/// A unit that maps one input record to zero, one, or many output records.
///
/// Backs steps with dependencies that are not terminal. Takes `&self`
/// because invocations over distinct records may run concurrently on a
/// bounded worker pool.
#[async_trait]
pub trait FilterUnit: Send + Sync {
  async fn apply(&self, record: Record, ctx: &WorkflowContext) -> Result<Vec<Record>, UnitError>;

  /// Vectorized variant used by micro-batching consumers. The default
  /// applies `apply` per record; an error fails the whole batch.
  async fn apply_batch(
    &self,
    batch: Vec<Record>,
    ctx: &WorkflowContext,
  ) -> Result<Vec<Record>, UnitError> {
    let mut out = Vec::new();
    for record in batch {
      out.extend(self.apply(record, ctx).await?);
    }
    Ok(out)
  }
}

/// A unit that consumes records and produces a final summary.
///
/// Backs terminal steps. `finalize` is called exactly once, after the
/// input is exhausted; its failure is fatal to the workflow.
#[async_trait]
pub trait SinkUnit: Send {
  async fn consume(&mut self, record: Record, ctx: &WorkflowContext) -> Result<(), UnitError>;

  /// Vectorized variant used by micro-batching. The default consumes the
  /// batch record by record; an error fails the whole batch.
  async fn consume_batch(
    &mut self,
    batch: Vec<Record>,
    ctx: &WorkflowContext,
  ) -> Result<(), UnitError> {
    for record in batch {
      self.consume(record, ctx).await?;
    }
    Ok(())
  }

  async fn finalize(&mut self, ctx: &WorkflowContext) -> Result<Value, UnitError>;
}

/// A constructed unit, carrying exactly one of the three capability
/// contracts. The variant is what the dispatcher checks against a step's
/// position in the graph.
pub enum Unit {
  Source(Box<dyn SourceUnit>),
  Filter(Arc<dyn FilterUnit>),
  Sink(Box<dyn SinkUnit>),
}

impl Unit {
  pub fn capability(&self) -> Capability {
    match self {
      Unit::Source(_) => Capability::Source,
      Unit::Filter(_) => Capability::Filter,
      Unit::Sink(_) => Capability::Sink,
    }
  }
}

impl fmt::Debug for Unit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Unit::{}", self.capability())
  }
}

/// The three unit capability contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
  Source,
  Filter,
  Sink,
}

impl fmt::Display for Capability {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Capability::Source => write!(f, "source"),
      Capability::Filter => write!(f, "filter"),
      Capability::Sink => write!(f, "sink"),
    }
  }
}
