//! Meridian Config
//!
//! This crate contains the serializable workflow definition types for
//! Meridian. These types represent pipeline declarations before they are
//! validated and locked into an executable workflow.
//!
//! Definitions can be loaded from:
//! - JSON files (via CLI with `meridian run workflow.json`)
//! - Embedded documents (tests construct them directly)
//!
//! The workflow crate takes these definition types, validates the
//! dependency graph, and resolves them into a leveled execution plan.

mod settings;
mod step;
mod workflow;

pub use settings::Settings;
pub use step::{MemoryMode, StepDef};
pub use workflow::WorkflowDef;
