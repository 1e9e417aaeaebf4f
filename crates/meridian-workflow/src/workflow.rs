use std::collections::{HashMap, HashSet};

use meridian_config::{Settings, StepDef, WorkflowDef};
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::graph::Graph;

/// A locked workflow ready for execution.
///
/// Produced from a [`WorkflowDef`] by [`Workflow::from_def`], which
/// validates the dependency graph and arranges the steps into execution
/// levels. For every step and every one of its dependencies, the
/// dependency's level index is strictly less than the step's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub name: String,
  pub settings: Settings,
  steps: HashMap<String, StepDef>,
  edges: Vec<(String, String)>,
  levels: Vec<Vec<String>>,
}

impl Workflow {
  /// Validate a workflow definition and lock it into leveled form.
  pub fn from_def(def: &WorkflowDef) -> Result<Self, WorkflowError> {
    if def.steps.is_empty() {
      return Err(WorkflowError::Empty);
    }

    let mut steps: HashMap<String, StepDef> = HashMap::new();
    for step in &def.steps {
      if steps.insert(step.id.clone(), step.clone()).is_some() {
        return Err(WorkflowError::DuplicateStep(step.id.clone()));
      }
    }

    // Every dependency must name an existing step, and never the step itself.
    let mut edges: Vec<(String, String)> = Vec::new();
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    for step in &def.steps {
      for dependency in &step.depends_on {
        if dependency == &step.id {
          return Err(WorkflowError::SelfDependency(step.id.clone()));
        }
        if !steps.contains_key(dependency) {
          return Err(WorkflowError::MissingDependency {
            step_id: step.id.clone(),
            dependency: dependency.clone(),
          });
        }
        // A repeated dependency id contributes a single edge.
        if seen.insert((dependency.as_str(), step.id.as_str())) {
          edges.push((dependency.clone(), step.id.clone()));
        }
      }
    }

    let step_ids: Vec<String> = def.steps.iter().map(|s| s.id.clone()).collect();
    let graph = Graph::new(&step_ids, &edges);
    let levels = graph
      .levels()
      .map_err(|steps| WorkflowError::Cycle { steps })?;

    Ok(Self {
      name: def.name.clone(),
      settings: def.settings.clone(),
      steps,
      edges,
      levels,
    })
  }

  /// Build the graph structure for traversal.
  pub fn graph(&self) -> Graph {
    let step_ids: Vec<String> = self.steps.keys().cloned().collect();
    Graph::new(&step_ids, &self.edges)
  }

  /// Execution levels in order. Steps within one level have no edges
  /// between each other and may run concurrently.
  pub fn levels(&self) -> &[Vec<String>] {
    &self.levels
  }

  /// Get a step declaration by id.
  pub fn step(&self, step_id: &str) -> Option<&StepDef> {
    self.steps.get(step_id)
  }

  /// Number of steps in the workflow.
  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  /// Level index of a step, if it exists.
  pub fn level_of(&self, step_id: &str) -> Option<usize> {
    self
      .levels
      .iter()
      .position(|level| level.iter().any(|id| id == step_id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn step(id: &str, unit: &str, deps: &[&str]) -> StepDef {
    StepDef {
      id: id.to_string(),
      unit: unit.to_string(),
      config: json!({}),
      depends_on: deps.iter().map(|s| s.to_string()).collect(),
      memory: None,
      concurrency: None,
      batch_size: None,
      resumable: None,
    }
  }

  fn def(steps: Vec<StepDef>) -> WorkflowDef {
    WorkflowDef {
      name: "test".to_string(),
      settings: Settings::default(),
      steps,
    }
  }

  #[test]
  fn levels_respect_dependencies() {
    let workflow = Workflow::from_def(&def(vec![
      step("write", "sink", &["validate"]),
      step("fetch", "source", &[]),
      step("validate", "filter", &["fetch"]),
    ]))
    .unwrap();

    assert_eq!(workflow.levels().len(), 3);
    assert_eq!(workflow.level_of("fetch"), Some(0));
    assert_eq!(workflow.level_of("validate"), Some(1));
    assert_eq!(workflow.level_of("write"), Some(2));
  }

  #[test]
  fn missing_dependency_names_both_steps() {
    let err = Workflow::from_def(&def(vec![step("a", "source", &[]), step("b", "sink", &["nope"])]))
      .unwrap_err();
    assert_eq!(
      err,
      WorkflowError::MissingDependency {
        step_id: "b".to_string(),
        dependency: "nope".to_string(),
      }
    );
  }

  #[test]
  fn duplicate_step_id_rejected() {
    let err = Workflow::from_def(&def(vec![step("a", "source", &[]), step("a", "sink", &[])]))
      .unwrap_err();
    assert_eq!(err, WorkflowError::DuplicateStep("a".to_string()));
  }

  #[test]
  fn self_dependency_rejected() {
    let err = Workflow::from_def(&def(vec![step("a", "filter", &["a"])])).unwrap_err();
    assert_eq!(err, WorkflowError::SelfDependency("a".to_string()));
  }

  #[test]
  fn cycle_names_cyclic_steps_and_produces_no_levels() {
    let err = Workflow::from_def(&def(vec![
      step("fetch", "source", &[]),
      step("a", "filter", &["fetch", "b"]),
      step("b", "filter", &["a"]),
    ]))
    .unwrap_err();
    assert_eq!(
      err,
      WorkflowError::Cycle {
        steps: vec!["a".to_string(), "b".to_string()],
      }
    );
  }

  #[test]
  fn empty_workflow_rejected() {
    assert_eq!(Workflow::from_def(&def(vec![])).unwrap_err(), WorkflowError::Empty);
  }

  #[test]
  fn repeated_dependency_is_single_edge() {
    let workflow = Workflow::from_def(&def(vec![
      step("fetch", "source", &[]),
      StepDef {
        depends_on: vec!["fetch".to_string(), "fetch".to_string()],
        ..step("write", "sink", &[])
      },
    ]))
    .unwrap();
    assert_eq!(workflow.graph().upstream("write"), ["fetch"]);
  }
}
