//! Meridian Workflow
//!
//! This crate provides the locked workflow representation for Meridian.
//! A locked workflow is a validated, leveled form of a workflow definition
//! that is ready for execution.
//!
//! Key differences from `meridian-config`:
//! - Every dependency id is known to exist and the graph is acyclic
//! - Steps are arranged into execution levels: a step's level is always
//!   strictly after the levels of all of its dependencies
//! - Entry points (sources) and terminal steps (sinks) are identified
//!
//! Validation runs once, before any record is processed; every failure
//! here is a fatal configuration error.

mod error;
mod graph;
mod workflow;

pub use error::WorkflowError;
pub use graph::Graph;
pub use workflow::Workflow;
