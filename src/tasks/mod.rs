//! # Work abstractions and task-facing types.
//!
//! - [`Work`] / [`WorkFactory`] - what a worker runs and how fresh instances are made
//! - [`WorkFn`] - closure-backed work
//! - [`TaskId`], [`Payload`] - task identity and input
//! - [`ResultSink`], [`TaskEvent`] - outbound notifications to the caller

mod id;
mod sink;
mod work;
mod work_fn;

pub use id::{Payload, TaskId};
pub use sink::{ResultSink, SinkId, TaskEvent};
pub use work::{BoxWork, Work, WorkContext, WorkFactory};
pub use work_fn::WorkFn;
