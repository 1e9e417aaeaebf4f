//! Meridian Registry
//!
//! Maps unit-type names to constructors. The registry is populated at
//! process start and resolved once per step while the workflow is being
//! instantiated, so an unknown unit type fails the run before any record
//! is processed.

mod builtin;
mod error;
mod registry;

pub use error::RegistryError;
pub use registry::{UnitBuilder, UnitRegistry};
