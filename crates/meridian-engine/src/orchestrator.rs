//! The run driver: lock the definition, construct units level by level,
//! wire bounded queues, pump records, assemble the result.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use meridian_checkpoint::CheckpointStore;
use meridian_config::WorkflowDef;
use meridian_registry::UnitRegistry;
use meridian_runtime::{Capability, FailureSummary, Record, Unit, WorkflowContext};
use meridian_workflow::{Graph, Workflow};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::EngineError;
use crate::plan::{RunLayout, StepPlan};
use crate::result::{RunStatus, StepSummary, WorkflowResult};
use crate::runner::{run_filter, run_sink, run_source, StepOutcome};

/// Per-run knobs supplied by the caller.
#[derive(Debug, Clone)]
pub struct RunOptions {
  /// Root directory for checkpoints, record stores, spill files, and
  /// failure reports.
  pub data_dir: PathBuf,
  /// Side-channel overrides exposed to units through the context.
  pub overrides: HashMap<String, Value>,
  /// Cooperative stop signal: checked at record boundaries, in-flight
  /// records finish, checkpoints flush, then the run winds down.
  pub cancel: CancellationToken,
}

impl RunOptions {
  pub fn new(data_dir: impl Into<PathBuf>) -> Self {
    Self {
      data_dir: data_dir.into(),
      overrides: HashMap::new(),
      cancel: CancellationToken::new(),
    }
  }

  pub fn with_overrides(mut self, overrides: HashMap<String, Value>) -> Self {
    self.overrides = overrides;
    self
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }
}

/// Drives workflow runs against a unit registry populated at process
/// start.
pub struct Orchestrator {
  registry: Arc<UnitRegistry>,
}

impl Orchestrator {
  pub fn new(registry: UnitRegistry) -> Self {
    Self {
      registry: Arc::new(registry),
    }
  }

  /// Execute one workflow run.
  ///
  /// Always returns a result: fatal errors surface as
  /// `RunStatus::Failed` with the error message attached, never as a
  /// panic or an `Err` the caller must remember to map.
  #[instrument(name = "workflow_run", skip_all, fields(workflow = %def.name))]
  pub async fn run(&self, def: &WorkflowDef, options: &RunOptions) -> WorkflowResult {
    let run_id = uuid::Uuid::new_v4().to_string();
    info!(run_id, "workflow_started");

    let workflow = match Workflow::from_def(def) {
      Ok(workflow) => workflow,
      Err(e) => {
        error!(run_id, error = %e, "workflow_failed");
        return failed(&def.name, &run_id, e.to_string(), BTreeMap::new(), None, 0, false);
      }
    };

    let layout = RunLayout::new(&options.data_dir, &workflow.name, &workflow.settings, &run_id);
    let checkpoints = match CheckpointStore::open(layout.checkpoint_dir()).await {
      Ok(store) => Arc::new(store),
      Err(e) => {
        error!(run_id, error = %e, "workflow_failed");
        return failed(&def.name, &run_id, e.to_string(), BTreeMap::new(), None, 0, false);
      }
    };
    let ctx = Arc::new(WorkflowContext::new(
      workflow.name.clone(),
      run_id.clone(),
      checkpoints,
      options.overrides.clone(),
    ));

    let pumped = self
      .pump(&workflow, &layout, ctx.clone(), options.cancel.clone())
      .await;

    let failures = ctx.failures().summary();
    let report = match ctx.failures().materialize(layout.report_path()) {
      Ok(path) => path,
      Err(e) => {
        warn!(error = %e, "failed to write failure report");
        None
      }
    };
    // Spill files are scoped to this run; best-effort cleanup.
    let _ = tokio::fs::remove_dir_all(layout.spill_dir()).await;
    let interrupted = options.cancel.is_cancelled();

    match pumped {
      Ok(outcomes) => {
        let status = if failures.total == 0 {
          RunStatus::Completed
        } else {
          RunStatus::CompletedWithFailures
        };
        info!(
          run_id,
          status = ?status,
          failures = failures.total,
          interrupted,
          "workflow_completed"
        );
        WorkflowResult {
          workflow: workflow.name.clone(),
          run_id,
          status,
          failure_count: failures.total as u64,
          report,
          steps: summarize(outcomes, &failures),
          interrupted,
          error: None,
        }
      }
      Err((e, outcomes)) => {
        error!(run_id, error = %e, "workflow_failed");
        failed(
          &workflow.name,
          &run_id,
          e.to_string(),
          summarize(outcomes, &failures),
          report,
          failures.total as u64,
          interrupted,
        )
      }
    }
  }

  /// Matrix execution: the same locked definition, one independent
  /// context and data namespace per override set, run as separate
  /// top-level executions.
  pub async fn run_matrix(
    &self,
    def: &WorkflowDef,
    variants: &[HashMap<String, Value>],
    options: &RunOptions,
  ) -> Vec<WorkflowResult> {
    let mut results = Vec::with_capacity(variants.len());
    for (index, variant) in variants.iter().enumerate() {
      if options.cancel.is_cancelled() {
        break;
      }
      let mut overrides = options.overrides.clone();
      overrides.extend(variant.clone());
      let variant_options = RunOptions {
        data_dir: options.data_dir.join(format!("variant-{index}")),
        overrides,
        cancel: options.cancel.clone(),
      };
      info!(variant = index, "matrix_variant_started");
      results.push(self.run(def, &variant_options).await);
    }
    results
  }

  /// Construct, wire, spawn, and collect every step of the run.
  async fn pump(
    &self,
    workflow: &Workflow,
    layout: &RunLayout,
    ctx: Arc<WorkflowContext>,
    cancel: CancellationToken,
  ) -> Result<Vec<StepOutcome>, (EngineError, Vec<StepOutcome>)> {
    let graph = workflow.graph();

    // Construct and validate every unit, level by level, before anything
    // runs: unknown unit types and capability mismatches fail the run
    // while zero records have been processed.
    let mut units: HashMap<String, Unit> = HashMap::new();
    for level in workflow.levels() {
      for step_id in level {
        let step = workflow.step(step_id).expect("leveled step exists");
        let unit = self
          .registry
          .build(&step.unit, &step.config)
          .map_err(|e| (EngineError::from(e), Vec::new()))?;
        validate_capability(step_id, &step.unit, &unit, &graph).map_err(|e| (e, Vec::new()))?;
        units.insert(step_id.clone(), unit);
      }
    }

    // One bounded input queue per consuming step. A step's input is the
    // multi-producer union of its dependencies' outputs.
    let mut receivers: HashMap<String, mpsc::Receiver<Record>> = HashMap::new();
    let mut input_tx: HashMap<String, mpsc::Sender<Record>> = HashMap::new();
    for level in workflow.levels() {
      for step_id in level {
        if graph.upstream(step_id).is_empty() {
          continue;
        }
        let plan = StepPlan::resolve(workflow.step(step_id).expect("leveled step exists"), &workflow.settings);
        let (tx, rx) = mpsc::channel(plan.queue_depth);
        input_tx.insert(step_id.clone(), tx);
        receivers.insert(step_id.clone(), rx);
      }
    }

    // Spawn runner tasks in level order. All levels run concurrently; the
    // bounded queues make consumers wait until their dependencies produce
    // or complete.
    let mut tasks: JoinSet<Result<StepOutcome, EngineError>> = JoinSet::new();
    let mut task_steps: HashMap<tokio::task::Id, String> = HashMap::new();
    for level in workflow.levels() {
      debug!(?level, "starting level");
      for step_id in level {
        let step = workflow.step(step_id).expect("leveled step exists");
        let plan = StepPlan::resolve(step, &workflow.settings);
        let unit = units.remove(step_id).expect("unit constructed above");
        let outputs: Vec<mpsc::Sender<Record>> = graph
          .downstream(step_id)
          .iter()
          .map(|dependent| {
            input_tx
              .get(dependent)
              .expect("dependent has an input queue")
              .clone()
          })
          .collect();
        let ctx = ctx.clone();
        let layout = layout.clone();
        let cancel = cancel.clone();

        let handle = match unit {
          Unit::Source(unit) => {
            tasks.spawn(run_source(plan, unit, ctx, layout, outputs, cancel))
          }
          Unit::Filter(unit) => {
            let input = receivers.remove(step_id).expect("filter has an input queue");
            tasks.spawn(run_filter(plan, unit, ctx, layout, input, outputs, cancel))
          }
          Unit::Sink(unit) => {
            let input = receivers.remove(step_id).expect("sink has an input queue");
            tasks.spawn(run_sink(plan, unit, ctx, layout, input, cancel))
          }
        };
        task_steps.insert(handle.id(), step_id.clone());
      }
    }
    // From here only runner tasks hold senders, so each queue closes when
    // its producers finish.
    drop(input_tx);

    // Collect results; the first fatal error aborts everything still
    // running.
    let mut outcomes = Vec::new();
    let mut first_error: Option<EngineError> = None;
    while let Some(joined) = tasks.join_next_with_id().await {
      match joined {
        Ok((task_id, Ok(outcome))) => {
          task_steps.remove(&task_id);
          debug!(step_id = outcome.step_id, "step completed");
          outcomes.push(outcome);
        }
        Ok((task_id, Err(e))) => {
          task_steps.remove(&task_id);
          if first_error.is_none() {
            error!(error = %e, "fatal step error, aborting run");
            first_error = Some(e);
            tasks.abort_all();
          }
        }
        Err(join_err) if join_err.is_cancelled() && first_error.is_some() => {
          // Expected: sibling tasks aborted after the first fatal error.
          task_steps.remove(&join_err.id());
        }
        Err(join_err) => {
          let step_id = task_steps.remove(&join_err.id()).unwrap_or_default();
          if first_error.is_none() {
            first_error = Some(EngineError::TaskPanicked {
              step_id,
              message: join_err.to_string(),
            });
            tasks.abort_all();
          }
        }
      }
    }

    match first_error {
      None => Ok(outcomes),
      Some(e) => Err((e, outcomes)),
    }
  }
}

/// Check a constructed unit's capability against the step's position in
/// the graph. Entry steps produce, terminal steps must observe what flows
/// off the graph, everything in between transforms.
fn validate_capability(
  step_id: &str,
  unit_type: &str,
  unit: &Unit,
  graph: &Graph,
) -> Result<(), EngineError> {
  let has_deps = !graph.upstream(step_id).is_empty();
  let has_dependents = !graph.downstream(step_id).is_empty();
  let capability = unit.capability();

  match (has_deps, has_dependents) {
    (false, _) if capability != Capability::Source => Err(EngineError::EntryNotSource {
      step_id: step_id.to_string(),
      unit_type: unit_type.to_string(),
      capability: capability.to_string(),
    }),
    // A source nothing consumes would drop records on the floor.
    (false, false) => Err(EngineError::TerminalNotSink {
      step_id: step_id.to_string(),
      unit_type: unit_type.to_string(),
      capability: capability.to_string(),
    }),
    (false, true) => Ok(()),
    (true, false) if capability != Capability::Sink => Err(EngineError::TerminalNotSink {
      step_id: step_id.to_string(),
      unit_type: unit_type.to_string(),
      capability: capability.to_string(),
    }),
    (true, false) => Ok(()),
    (true, true) if capability != Capability::Filter => Err(EngineError::MiddleNotFilter {
      step_id: step_id.to_string(),
      unit_type: unit_type.to_string(),
      capability: capability.to_string(),
    }),
    (true, true) => Ok(()),
  }
}

fn summarize(
  outcomes: Vec<StepOutcome>,
  failures: &FailureSummary,
) -> BTreeMap<String, StepSummary> {
  let mut steps: BTreeMap<String, StepSummary> = outcomes
    .into_iter()
    .map(|o| {
      (
        o.step_id,
        StepSummary {
          records_in: o.records_in,
          records_out: o.records_out,
          failures: 0,
          output: o.output,
        },
      )
    })
    .collect();
  for (step_id, count) in &failures.per_step {
    steps.entry(step_id.clone()).or_default().failures = *count as u64;
  }
  steps
}

#[allow(clippy::too_many_arguments)]
fn failed(
  workflow: &str,
  run_id: &str,
  error: String,
  steps: BTreeMap<String, StepSummary>,
  report: Option<PathBuf>,
  failure_count: u64,
  interrupted: bool,
) -> WorkflowResult {
  WorkflowResult {
    workflow: workflow.to_string(),
    run_id: run_id.to_string(),
    status: RunStatus::Failed,
    failure_count,
    report,
    steps,
    interrupted,
    error: Some(error),
  }
}
