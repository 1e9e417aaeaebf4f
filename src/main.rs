use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use meridian_config::WorkflowDef;
use meridian_engine::{Orchestrator, RunOptions, RunStatus};
use meridian_registry::UnitRegistry;
use meridian_workflow::Workflow;

/// Meridian - a declarative pipeline orchestrator for catalog records
#[derive(Parser)]
#[command(name = "meridian")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.meridian)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Override values exposed to units, as KEY=VALUE (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
  },

  /// Validate a workflow and print its execution levels
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Clear a workflow's checkpoints and record stores
  Clean {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = cli.data_dir.unwrap_or_else(|| {
    dirs::home_dir()
      .expect("could not determine home directory")
      .join(".meridian")
  });

  match cli.command {
    Some(Commands::Run { workflow_file, set }) => {
      let code = run_workflow(workflow_file, data_dir, set)?;
      std::process::exit(code);
    }
    Some(Commands::Validate { workflow_file }) => {
      validate_workflow(workflow_file)?;
    }
    Some(Commands::Clean { workflow_file }) => {
      clean_workflow(workflow_file, data_dir)?;
    }
    None => {
      println!("meridian - use --help to see available commands");
    }
  }

  Ok(())
}

fn run_workflow(workflow_file: PathBuf, data_dir: PathBuf, set: Vec<String>) -> Result<i32> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_workflow_async(workflow_file, data_dir, set).await })
}

async fn run_workflow_async(
  workflow_file: PathBuf,
  data_dir: PathBuf,
  set: Vec<String>,
) -> Result<i32> {
  let def = load_definition(&workflow_file).await?;
  let overrides = parse_overrides(&set)?;

  // First signal requests a cooperative stop: in-flight records finish and
  // checkpoints flush. A second signal force-exits; the atomic checkpoint
  // replace protocol keeps on-disk state sound even then.
  let cancel = CancellationToken::new();
  let signal_cancel = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!(
        "interrupt: finishing in-flight records, flushing checkpoints (press again to force quit)"
      );
      signal_cancel.cancel();
      if tokio::signal::ctrl_c().await.is_ok() {
        std::process::exit(130);
      }
    }
  });

  let orchestrator = Orchestrator::new(UnitRegistry::with_builtins());
  let options = RunOptions::new(data_dir)
    .with_overrides(overrides)
    .with_cancel(cancel);
  let result = orchestrator.run(&def, &options).await;

  println!("{}", serde_json::to_string_pretty(&result)?);

  Ok(match result.status {
    RunStatus::Completed => 0,
    RunStatus::CompletedWithFailures => 2,
    RunStatus::Failed => 1,
  })
}

fn validate_workflow(workflow_file: PathBuf) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  let def = rt.block_on(load_definition(&workflow_file))?;

  let workflow = Workflow::from_def(&def).context("workflow validation failed")?;
  eprintln!("workflow '{}' is valid: {} steps", workflow.name, workflow.len());
  for (index, level) in workflow.levels().iter().enumerate() {
    println!("level {index}: {}", level.join(", "));
  }
  Ok(())
}

fn clean_workflow(workflow_file: PathBuf, data_dir: PathBuf) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  let def = rt.block_on(load_definition(&workflow_file))?;

  let state_dir = data_dir.join(def.name.replace(['/', '\\'], "--"));
  match std::fs::remove_dir_all(&state_dir) {
    Ok(()) => {
      eprintln!("cleared state for '{}' at {}", def.name, state_dir.display());
      Ok(())
    }
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      eprintln!("no state to clear for '{}'", def.name);
      Ok(())
    }
    Err(e) => Err(e).with_context(|| format!("failed to clear {}", state_dir.display())),
  }
}

async fn load_definition(workflow_file: &PathBuf) -> Result<WorkflowDef> {
  let content = tokio::fs::read_to_string(workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))
}

fn parse_overrides(pairs: &[String]) -> Result<HashMap<String, Value>> {
  pairs
    .iter()
    .map(|pair| {
      let (key, raw) = pair
        .split_once('=')
        .with_context(|| format!("override '{pair}' is not KEY=VALUE"))?;
      // JSON when it parses, bare string otherwise.
      let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
      Ok((key.to_string(), value))
    })
    .collect()
}
