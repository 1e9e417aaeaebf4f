//! Per-step runner tasks.
//!
//! Each step gets exactly one runner task. Sources pump their unit's
//! output through resume bookkeeping and fan it out to every dependent's
//! bounded input queue; filters pull from their input queue (optionally
//! through a worker pool or in micro-batches) and fan results out; sinks
//! consume, checkpoint their processed ids, and finalize.
//!
//! Cancellation is cooperative and checked at record boundaries only: an
//! in-flight record finishes, checkpoints flush, then the task returns.

use std::collections::HashMap;
use std::sync::Arc;

use meridian_checkpoint::StepCheckpoint;
use meridian_config::MemoryMode;
use meridian_runtime::{
  FilterUnit, Record, RecordEmitter, SinkUnit, SourceUnit, UnitError, WorkflowContext,
};
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::plan::{RunLayout, StepPlan};
use crate::spill::{RecordReader, RecordStore};

/// What one finished step reports back to the orchestrator.
#[derive(Debug)]
pub(crate) struct StepOutcome {
  pub step_id: String,
  pub records_in: u64,
  pub records_out: u64,
  pub output: Option<Value>,
}

impl StepOutcome {
  fn new(step_id: &str) -> Self {
    Self {
      step_id: step_id.to_string(),
      records_in: 0,
      records_out: 0,
      output: None,
    }
  }
}

/// Send a record to every dependent's input queue, suspending while queues
/// are full. Returns `false` once a downstream queue is gone, which means
/// the run is being stopped or aborted and production should end.
async fn fan_out(outputs: &[mpsc::Sender<Record>], record: Record) -> bool {
  let Some((last, rest)) = outputs.split_last() else {
    return true;
  };
  for tx in rest {
    if tx.send(record.clone()).await.is_err() {
      return false;
    }
  }
  last.send(record).await.is_ok()
}

/// A step's input: either the live bounded queue, or a spill file being
/// re-streamed after a full drain.
enum StepInput {
  Live(mpsc::Receiver<Record>),
  Spilled(RecordReader),
}

impl StepInput {
  /// Next record, or `None` on upstream exhaustion or cooperative stop.
  async fn next(&mut self, cancel: &CancellationToken) -> std::io::Result<Option<Record>> {
    match self {
      StepInput::Live(rx) => Ok(tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        record = rx.recv() => record,
      }),
      StepInput::Spilled(reader) => {
        if cancel.is_cancelled() {
          return Ok(None);
        }
        reader.next().await
      }
    }
  }
}

/// Resolve a consuming step's input according to its memory strategy:
/// spill steps drain their upstream into a durable file first and then
/// re-stream it; everything else reads the live queue.
async fn prepare_input(
  plan: &StepPlan,
  layout: &RunLayout,
  input: mpsc::Receiver<Record>,
  cancel: &CancellationToken,
) -> Result<StepInput, EngineError> {
  if plan.memory != MemoryMode::Spill {
    return Ok(StepInput::Live(input));
  }

  let path = layout.spill_path(&plan.step_id);
  let spill = async {
    let mut rx = input;
    let mut store = RecordStore::create(&path).await?;
    let mut spilled = 0u64;
    loop {
      let next = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        record = rx.recv() => record,
      };
      match next {
        Some(record) => {
          store.append(&record).await?;
          spilled += 1;
        }
        None => break,
      }
    }
    store.flush().await?;
    debug!(step_id = plan.step_id, spilled, "upstream drained to spill store");
    RecordReader::open(&path).await
  };
  spill
    .await
    .map(StepInput::Spilled)
    .map_err(|source| EngineError::Store {
      step_id: plan.step_id.clone(),
      source,
    })
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub(crate) async fn run_source(
  plan: StepPlan,
  mut unit: Box<dyn SourceUnit>,
  ctx: Arc<WorkflowContext>,
  layout: RunLayout,
  outputs: Vec<mpsc::Sender<Record>>,
  cancel: CancellationToken,
) -> Result<StepOutcome, EngineError> {
  let step_id = plan.step_id.clone();
  let mut outcome = StepOutcome::new(&step_id);
  let store_err = |source| EngineError::Store {
    step_id: step_id.clone(),
    source,
  };

  // Resume state: the processed-id checkpoint plus the durable record
  // store holding everything this source has ever produced.
  let mut checkpoint: Option<StepCheckpoint> = None;
  let mut store: Option<RecordStore> = None;
  let mut dirty = 0usize;

  if plan.resumable {
    let mut cp = ctx
      .checkpoints()
      .load(&step_id)
      .await?
      .unwrap_or_else(|| StepCheckpoint::new_ids(&step_id));

    // Replay previously persisted records downstream before the unit runs
    // again; consumers dedup against their own checkpoints.
    let store_path = layout.record_store_path(&step_id);
    if let Some(mut reader) = RecordReader::open_if_exists(&store_path)
      .await
      .map_err(store_err)?
    {
      let mut replayed = 0u64;
      while let Some(record) = reader.next().await.map_err(store_err)? {
        if cancel.is_cancelled() {
          break;
        }
        // A record can be on disk but missing from the checkpoint if the
        // previous run died between the store sync and the checkpoint
        // flush; it is durable either way.
        if cp.mark_done(record.id()) {
          dirty += 1;
        }
        if !fan_out(&outputs, record).await {
          break;
        }
        replayed += 1;
        outcome.records_out += 1;
      }
      if replayed > 0 {
        info!(step_id, replayed, "replayed persisted records for resumed source");
      }
    }

    store = Some(RecordStore::append_to(&store_path).await.map_err(store_err)?);
    checkpoint = Some(cp);
  }

  // The unit produces into an internal bounded queue; this task pumps that
  // queue through resume bookkeeping and out to the dependents.
  let (tx, mut rx) = mpsc::channel(plan.queue_depth);
  let emitter = RecordEmitter::new(tx);
  let ctx_for_unit = ctx.clone();
  let unit_task =
    tokio::spawn(async move { unit.produce(&ctx_for_unit, &emitter).await });

  let mut interrupted = false;
  loop {
    let next = tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        interrupted = true;
        None
      }
      record = rx.recv() => record,
    };
    let Some(record) = next else { break };
    outcome.records_in += 1;

    if let (Some(cp), Some(st)) = (checkpoint.as_mut(), store.as_mut()) {
      if cp.is_done(record.id()) {
        // Already persisted and replayed above; skip the regenerated copy.
        continue;
      }
      st.append(&record).await.map_err(store_err)?;
      cp.mark_done(record.id());
      dirty += 1;
      if dirty >= plan.flush_interval {
        // Durable store first, then the checkpoint that references it.
        st.sync().await.map_err(store_err)?;
        ctx.checkpoints().save(cp).await?;
        dirty = 0;
      }
    }

    if !fan_out(&outputs, record).await {
      break;
    }
    outcome.records_out += 1;
  }

  if let (Some(cp), Some(st)) = (checkpoint.as_ref(), store.as_mut()) {
    if dirty > 0 {
      st.sync().await.map_err(store_err)?;
      ctx.checkpoints().save(cp).await?;
    }
  }

  // Closing our end of the internal queue unblocks a unit waiting in emit.
  drop(rx);
  drop(outputs);

  match unit_task.await {
    Ok(Ok(())) => {}
    // The engine closed the queue (stop or downstream abort); cooperative.
    Ok(Err(UnitError::OutputClosed)) => {}
    Ok(Err(source)) => return Err(EngineError::SourceFailed { step_id, source }),
    Err(join_err) => {
      return Err(EngineError::TaskPanicked {
        step_id,
        message: join_err.to_string(),
      });
    }
  }

  if interrupted {
    info!(step_id = outcome.step_id, "source stopped cooperatively");
  }
  Ok(outcome)
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

pub(crate) async fn run_filter(
  plan: StepPlan,
  unit: Arc<dyn FilterUnit>,
  ctx: Arc<WorkflowContext>,
  layout: RunLayout,
  input: mpsc::Receiver<Record>,
  outputs: Vec<mpsc::Sender<Record>>,
  cancel: CancellationToken,
) -> Result<StepOutcome, EngineError> {
  let mut input = prepare_input(&plan, &layout, input, &cancel).await?;

  match plan.memory {
    MemoryMode::Batch => run_filter_batched(plan, unit, ctx, &mut input, outputs, cancel).await,
    _ if plan.concurrency > 1 => {
      run_filter_pooled(plan, unit, ctx, &mut input, outputs, cancel).await
    }
    _ => run_filter_serial(plan, unit, ctx, &mut input, outputs, cancel).await,
  }
}

async fn run_filter_serial(
  plan: StepPlan,
  unit: Arc<dyn FilterUnit>,
  ctx: Arc<WorkflowContext>,
  input: &mut StepInput,
  outputs: Vec<mpsc::Sender<Record>>,
  cancel: CancellationToken,
) -> Result<StepOutcome, EngineError> {
  let step_id = plan.step_id.clone();
  let mut outcome = StepOutcome::new(&step_id);

  while let Some(record) = input.next(&cancel).await.map_err(|source| EngineError::Store {
    step_id: step_id.clone(),
    source,
  })? {
    outcome.records_in += 1;
    let record_id = record.id.clone();
    match unit.apply(record, &ctx).await {
      Ok(produced) => {
        for out in produced {
          if !fan_out(&outputs, out).await {
            return Ok(outcome);
          }
          outcome.records_out += 1;
        }
      }
      // Per-record failure: record it and keep the stream alive.
      Err(e) => ctx.failures().add(&record_id, &step_id, e),
    }
  }
  Ok(outcome)
}

async fn run_filter_pooled(
  plan: StepPlan,
  unit: Arc<dyn FilterUnit>,
  ctx: Arc<WorkflowContext>,
  input: &mut StepInput,
  outputs: Vec<mpsc::Sender<Record>>,
  cancel: CancellationToken,
) -> Result<StepOutcome, EngineError> {
  let step_id = plan.step_id.clone();
  let mut outcome = StepOutcome::new(&step_id);
  let semaphore = Arc::new(Semaphore::new(plan.concurrency));
  let mut workers: JoinSet<u64> = JoinSet::new();
  // Worker task id -> record id, for attributing panics.
  let mut in_flight: HashMap<tokio::task::Id, String> = HashMap::new();

  loop {
    let next = input.next(&cancel).await.map_err(|source| EngineError::Store {
      step_id: step_id.clone(),
      source,
    })?;
    let Some(record) = next else { break };
    outcome.records_in += 1;

    let Ok(permit) = semaphore.clone().acquire_owned().await else {
      break;
    };

    // Reap whatever has already finished so the bookkeeping map and the
    // output count stay bounded.
    while let Some(finished) = workers.try_join_next_with_id() {
      reap_worker(finished, &mut in_flight, &mut outcome, &ctx, &step_id);
    }

    let record_id = record.id.clone();
    let worker_unit = unit.clone();
    let worker_ctx = ctx.clone();
    let worker_outputs = outputs.clone();
    let worker_step = step_id.clone();
    let handle = workers.spawn(async move {
      let _permit = permit;
      let id_for_failure = record.id.clone();
      match worker_unit.apply(record, &worker_ctx).await {
        Ok(produced) => {
          let mut sent = 0u64;
          for out in produced {
            if !fan_out(&worker_outputs, out).await {
              break;
            }
            sent += 1;
          }
          sent
        }
        Err(e) => {
          worker_ctx.failures().add(&id_for_failure, &worker_step, e);
          0
        }
      }
    });
    in_flight.insert(handle.id(), record_id);
  }

  while let Some(finished) = workers.join_next_with_id().await {
    reap_worker(finished, &mut in_flight, &mut outcome, &ctx, &step_id);
  }
  Ok(outcome)
}

fn reap_worker(
  finished: Result<(tokio::task::Id, u64), tokio::task::JoinError>,
  in_flight: &mut HashMap<tokio::task::Id, String>,
  outcome: &mut StepOutcome,
  ctx: &WorkflowContext,
  step_id: &str,
) {
  match finished {
    Ok((task_id, sent)) => {
      in_flight.remove(&task_id);
      outcome.records_out += sent;
    }
    // A panicking worker is contained: the record it held becomes a
    // per-record failure and the pool keeps going.
    Err(join_err) => {
      let record_id = in_flight.remove(&join_err.id()).unwrap_or_default();
      warn!(step_id, record_id, "filter worker panicked: {join_err}");
      ctx
        .failures()
        .add(&record_id, step_id, format!("worker panicked: {join_err}"));
    }
  }
}

async fn run_filter_batched(
  plan: StepPlan,
  unit: Arc<dyn FilterUnit>,
  ctx: Arc<WorkflowContext>,
  input: &mut StepInput,
  outputs: Vec<mpsc::Sender<Record>>,
  cancel: CancellationToken,
) -> Result<StepOutcome, EngineError> {
  let step_id = plan.step_id.clone();
  let mut outcome = StepOutcome::new(&step_id);
  let mut upstream_open = true;

  while upstream_open {
    let mut batch = Vec::with_capacity(plan.batch_size);
    while batch.len() < plan.batch_size {
      match input.next(&cancel).await.map_err(|source| EngineError::Store {
        step_id: step_id.clone(),
        source,
      })? {
        Some(record) => batch.push(record),
        None => {
          upstream_open = false;
          break;
        }
      }
    }
    if batch.is_empty() {
      break;
    }

    outcome.records_in += batch.len() as u64;
    let batch_ids: Vec<String> = batch.iter().map(|r| r.id.clone()).collect();
    match unit.apply_batch(batch, &ctx).await {
      Ok(produced) => {
        for out in produced {
          if !fan_out(&outputs, out).await {
            return Ok(outcome);
          }
          outcome.records_out += 1;
        }
      }
      // A batch-level error is attributed to every record in the batch.
      Err(e) => {
        let message = e.to_string();
        for record_id in &batch_ids {
          ctx.failures().add(record_id, &step_id, &message);
        }
      }
    }
  }
  Ok(outcome)
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

pub(crate) async fn run_sink(
  plan: StepPlan,
  mut unit: Box<dyn SinkUnit>,
  ctx: Arc<WorkflowContext>,
  layout: RunLayout,
  input: mpsc::Receiver<Record>,
  cancel: CancellationToken,
) -> Result<StepOutcome, EngineError> {
  let step_id = plan.step_id.clone();
  let mut outcome = StepOutcome::new(&step_id);

  // Sinks always track processed ids: this is what makes a record that
  // reached a sink durable against crashes and replays.
  let mut checkpoint = ctx
    .checkpoints()
    .load(&step_id)
    .await?
    .unwrap_or_else(|| StepCheckpoint::new_ids(&step_id));
  let mut dirty = 0usize;

  let mut input = prepare_input(&plan, &layout, input, &cancel).await?;

  if plan.memory == MemoryMode::Batch {
    consume_batched(&plan, unit.as_mut(), &ctx, &mut input, &mut checkpoint, &mut dirty, &mut outcome, &cancel)
      .await?;
  } else {
    consume_streamed(&plan, unit.as_mut(), &ctx, &mut input, &mut checkpoint, &mut dirty, &mut outcome, &cancel)
      .await?;
  }

  if dirty > 0 {
    ctx.checkpoints().save(&checkpoint).await?;
  }

  // Input exhausted (or stop requested): finalize exactly once. A failure
  // here is fatal to the workflow.
  let summary = unit
    .finalize(&ctx)
    .await
    .map_err(|source| EngineError::FinalizeFailed {
      step_id: step_id.clone(),
      source,
    })?;
  ctx.record_output(&step_id, summary.clone())?;
  outcome.output = Some(summary);
  Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
async fn consume_streamed(
  plan: &StepPlan,
  unit: &mut dyn SinkUnit,
  ctx: &WorkflowContext,
  input: &mut StepInput,
  checkpoint: &mut StepCheckpoint,
  dirty: &mut usize,
  outcome: &mut StepOutcome,
  cancel: &CancellationToken,
) -> Result<(), EngineError> {
  let step_id = &plan.step_id;
  while let Some(record) = input.next(cancel).await.map_err(|source| EngineError::Store {
    step_id: step_id.clone(),
    source,
  })? {
    outcome.records_in += 1;
    if checkpoint.is_done(record.id()) {
      // Bounded-window duplicate from a resume replay.
      continue;
    }
    let record_id = record.id.clone();
    match unit.consume(record, ctx).await {
      Ok(()) => {
        outcome.records_out += 1;
        checkpoint.mark_done(&record_id);
        *dirty += 1;
        if *dirty >= plan.flush_interval {
          ctx.checkpoints().save(checkpoint).await?;
          *dirty = 0;
        }
      }
      Err(e) => ctx.failures().add(&record_id, step_id, e),
    }
  }
  Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn consume_batched(
  plan: &StepPlan,
  unit: &mut dyn SinkUnit,
  ctx: &WorkflowContext,
  input: &mut StepInput,
  checkpoint: &mut StepCheckpoint,
  dirty: &mut usize,
  outcome: &mut StepOutcome,
  cancel: &CancellationToken,
) -> Result<(), EngineError> {
  let step_id = &plan.step_id;
  let mut upstream_open = true;

  while upstream_open {
    let mut batch = Vec::with_capacity(plan.batch_size);
    while batch.len() < plan.batch_size {
      match input.next(cancel).await.map_err(|source| EngineError::Store {
        step_id: step_id.clone(),
        source,
      })? {
        Some(record) => {
          outcome.records_in += 1;
          if !checkpoint.is_done(record.id()) {
            batch.push(record);
          }
        }
        None => {
          upstream_open = false;
          break;
        }
      }
    }
    if batch.is_empty() {
      continue;
    }

    let batch_ids: Vec<String> = batch.iter().map(|r| r.id.clone()).collect();
    match unit.consume_batch(batch, ctx).await {
      Ok(()) => {
        outcome.records_out += batch_ids.len() as u64;
        for record_id in &batch_ids {
          checkpoint.mark_done(record_id);
        }
        *dirty += batch_ids.len();
        if *dirty >= plan.flush_interval {
          ctx.checkpoints().save(checkpoint).await?;
          *dirty = 0;
        }
      }
      Err(e) => {
        let message = e.to_string();
        for record_id in &batch_ids {
          ctx.failures().add(record_id, step_id, &message);
        }
      }
    }
  }
  Ok(())
}
