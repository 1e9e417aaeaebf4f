use meridian_config::{Settings, StepDef, WorkflowDef};
use meridian_workflow::{Workflow, WorkflowError};
use proptest::prelude::*;

fn step(id: String, depends_on: Vec<String>) -> StepDef {
  StepDef {
    id,
    unit: "unit".to_string(),
    config: serde_json::Value::Null,
    depends_on,
    memory: None,
    concurrency: None,
    batch_size: None,
    resumable: None,
  }
}

fn def(steps: Vec<StepDef>) -> WorkflowDef {
  WorkflowDef {
    name: "prop".to_string(),
    settings: Settings::default(),
    steps,
  }
}

/// Build steps s0..sn where step i may only depend on steps before it, so
/// the generated graph is acyclic by construction. `masks[i]` selects the
/// dependencies of step i as a bitmask over 0..i.
fn acyclic_steps(n: usize, masks: &[u16]) -> Vec<StepDef> {
  (0..n)
    .map(|i| {
      let mask = masks[i] & ((1u16 << i) - 1);
      let deps = (0..i)
        .filter(|j| mask & (1u16 << j) != 0)
        .map(|j| format!("s{j}"))
        .collect();
      step(format!("s{i}"), deps)
    })
    .collect()
}

proptest! {
  #[test]
  fn dependencies_always_land_in_earlier_levels(
    n in 2usize..12,
    masks in proptest::collection::vec(any::<u16>(), 12),
  ) {
    let steps = acyclic_steps(n, &masks);
    let workflow = Workflow::from_def(&def(steps.clone())).unwrap();

    // Every step is placed exactly once.
    let placed: usize = workflow.levels().iter().map(|level| level.len()).sum();
    prop_assert_eq!(placed, n);

    // No step precedes any of its dependencies.
    for step in &steps {
      let level = workflow.level_of(&step.id).unwrap();
      for dep in &step.depends_on {
        let dep_level = workflow.level_of(dep).unwrap();
        prop_assert!(
          dep_level < level,
          "step {} at level {} does not follow dependency {} at level {}",
          step.id, level, dep, dep_level
        );
      }
    }
  }

  #[test]
  fn injected_cycle_is_always_fatal(
    n in 3usize..10,
    masks in proptest::collection::vec(any::<u16>(), 12),
  ) {
    let mut steps = acyclic_steps(n, &masks);
    // Chain the steps so the back edge below closes a cycle over all of them.
    for i in 1..n {
      let dep = format!("s{}", i - 1);
      if !steps[i].depends_on.contains(&dep) {
        steps[i].depends_on.push(dep);
      }
    }
    steps[0].depends_on.push(format!("s{}", n - 1));

    match Workflow::from_def(&def(steps)) {
      Err(WorkflowError::Cycle { steps }) => {
        prop_assert_eq!(steps.len(), n);
      }
      other => prop_assert!(false, "expected cycle error, got {:?}", other),
    }
  }
}
