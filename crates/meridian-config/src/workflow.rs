use serde::{Deserialize, Serialize};

use crate::settings::Settings;
use crate::step::StepDef;

/// A declared workflow: a named, ordered list of steps plus global tuning.
///
/// Parsed once at workflow start and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub name: String,
  #[serde(default)]
  pub settings: Settings,
  pub steps: Vec<StepDef>,
}

impl WorkflowDef {
  /// Look up a step declaration by id.
  pub fn step(&self, step_id: &str) -> Option<&StepDef> {
    self.steps.iter().find(|s| s.id == step_id)
  }
}
