//! Meridian Runtime
//!
//! The abstraction layer between the streaming engine and the processing
//! units it drives: the opaque [`Record`] flowing through a pipeline, the
//! three unit capability contracts ([`SourceUnit`], [`FilterUnit`],
//! [`SinkUnit`]), and the [`WorkflowContext`] every unit invocation
//! receives.
//!
//! Nothing in here schedules work; the engine crate owns channels, worker
//! pools, and checkpoint flushing. Units see only the context and the
//! records handed to them.

mod context;
mod error;
mod failures;
mod record;
mod unit;

pub use context::WorkflowContext;
pub use error::{ContextError, UnitError};
pub use failures::{FailureCollector, FailureRecord, FailureSummary};
pub use record::Record;
pub use unit::{Capability, FilterUnit, RecordEmitter, SinkUnit, SourceUnit, Unit};
