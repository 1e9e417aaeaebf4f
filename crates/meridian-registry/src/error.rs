use meridian_runtime::UnitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("unknown unit type '{unit_type}'")]
  UnknownUnitType { unit_type: String },

  #[error("failed to construct unit '{unit_type}': {source}")]
  Construction {
    unit_type: String,
    #[source]
    source: UnitError,
  },
}
