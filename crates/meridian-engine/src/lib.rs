//! Meridian Engine
//!
//! The streaming engine and orchestrator. The orchestrator locks a
//! workflow definition, constructs its units level by level through the
//! registry, wires the steps together with bounded queues, and pumps
//! records through the graph until every step completes, a fatal error
//! aborts the run, or a cooperative stop is requested.
//!
//! Memory strategies per consuming step: pure streaming over a bounded
//! queue (default), micro-batching, or disk spill for units that need the
//! full upstream materialized. Backpressure is structural - the bounded
//! queue between a producer and its consumers is the only throttle, and no
//! unbounded buffer exists on the default path.
//!
//! Per-record failures inside filter and sink invocations never escape the
//! engine boundary: they are routed to the failure collector and the
//! stream continues.

mod error;
mod orchestrator;
mod plan;
mod result;
mod runner;
mod spill;

pub use error::EngineError;
pub use orchestrator::{Orchestrator, RunOptions};
pub use result::{RunStatus, StepSummary, WorkflowResult};
