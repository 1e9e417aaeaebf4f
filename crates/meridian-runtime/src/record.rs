use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The unit of data flowing through a pipeline.
///
/// Opaque to the engine apart from its identifier: `id` must be stable for
/// the lifetime of the record inside the pipeline, because checkpoints and
/// failure attribution are keyed by it. The field map preserves insertion
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub id: String,
  #[serde(default)]
  pub fields: Map<String, Value>,
}

impl Record {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      fields: Map::new(),
    }
  }

  pub fn with_fields(id: impl Into<String>, fields: Map<String, Value>) -> Self {
    Self {
      id: id.into(),
      fields,
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.fields.get(key)
  }

  /// Set a field, returning the record for chaining.
  pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.fields.insert(key.into(), value.into());
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn field_order_is_preserved() {
    let record = Record::new("r1")
      .field("z", 1)
      .field("a", 2)
      .field("m", 3);

    let keys: Vec<&String> = record.fields.keys().collect();
    assert_eq!(keys, ["z", "a", "m"]);

    let json = serde_json::to_string(&record).unwrap();
    let back: Record = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
  }

  #[test]
  fn fields_default_to_empty_on_deserialize() {
    let record: Record = serde_json::from_value(json!({"id": "r1"})).unwrap();
    assert_eq!(record.id(), "r1");
    assert!(record.fields.is_empty());
  }
}
