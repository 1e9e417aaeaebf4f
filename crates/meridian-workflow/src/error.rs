use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
  #[error("workflow has no steps")]
  Empty,

  #[error("duplicate step id '{0}'")]
  DuplicateStep(String),

  #[error("step '{step_id}' depends on unknown step '{dependency}'")]
  MissingDependency { step_id: String, dependency: String },

  #[error("step '{0}' depends on itself")]
  SelfDependency(String),

  #[error("dependency cycle among steps: {}", steps.join(", "))]
  Cycle { steps: Vec<String> },
}
