use std::collections::HashMap;

use meridian_runtime::{Unit, UnitError};
use serde_json::Value;

use crate::builtin;
use crate::error::RegistryError;

/// Constructor for a unit: takes the step's configuration blob, returns a
/// unit carrying exactly one capability contract. Construction may perform
/// its own setup (resource validation) and must fail fast if that setup
/// cannot succeed.
pub type UnitBuilder = Box<dyn Fn(&Value) -> Result<Unit, UnitError> + Send + Sync>;

/// Registry of unit-type names, populated at process start.
#[derive(Default)]
pub struct UnitRegistry {
  builders: HashMap<String, UnitBuilder>,
}

impl UnitRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry pre-populated with the built-in units.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    builtin::register(&mut registry);
    registry
  }

  /// Register a constructor under a unit-type name. A later registration
  /// under the same name replaces the earlier one.
  pub fn register<F>(&mut self, unit_type: impl Into<String>, builder: F)
  where
    F: Fn(&Value) -> Result<Unit, UnitError> + Send + Sync + 'static,
  {
    self.builders.insert(unit_type.into(), Box::new(builder));
  }

  /// Whether a unit-type name is registered.
  pub fn contains(&self, unit_type: &str) -> bool {
    self.builders.contains_key(unit_type)
  }

  /// Construct a unit. Unknown names and constructor failures are both
  /// fatal configuration errors.
  pub fn build(&self, unit_type: &str, config: &Value) -> Result<Unit, RegistryError> {
    let builder = self
      .builders
      .get(unit_type)
      .ok_or_else(|| RegistryError::UnknownUnitType {
        unit_type: unit_type.to_string(),
      })?;
    builder(config).map_err(|source| RegistryError::Construction {
      unit_type: unit_type.to_string(),
      source,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use meridian_runtime::Capability;
  use serde_json::json;

  #[test]
  fn unknown_unit_type_fails_fast() {
    let registry = UnitRegistry::with_builtins();
    let err = registry.build("no_such_unit", &Value::Null).unwrap_err();
    assert!(matches!(
      err,
      RegistryError::UnknownUnitType { unit_type } if unit_type == "no_such_unit"
    ));
  }

  #[test]
  fn builtins_cover_all_three_capabilities() {
    let registry = UnitRegistry::with_builtins();

    let source = registry
      .build("inline_source", &json!({"records": []}))
      .unwrap();
    assert_eq!(source.capability(), Capability::Source);

    let filter = registry
      .build("project", &json!({"fields": ["name"]}))
      .unwrap();
    assert_eq!(filter.capability(), Capability::Filter);

    let sink = registry.build("count_sink", &Value::Null).unwrap();
    assert_eq!(sink.capability(), Capability::Sink);
  }

  #[test]
  fn constructor_failure_is_reported_with_unit_type() {
    let registry = UnitRegistry::with_builtins();
    let err = registry
      .build("jsonl_source", &json!({"path": "/definitely/not/here.jsonl"}))
      .unwrap_err();
    assert!(matches!(
      err,
      RegistryError::Construction { unit_type, .. } if unit_type == "jsonl_source"
    ));
  }
}
