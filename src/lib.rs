//! # treevisor
//!
//! **Treevisor** is a supervised concurrent worker tree for tokio.
//!
//! Independently failing units of work are each owned by a parent supervisor that
//! decides, per failure, whether to resume the unit, restart it, stop it for good
//! or escalate the failure one level up, within a restart budget counted over a
//! sliding time window.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   start_task / stop_task / list / shutdown
//!                  │
//!                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Coordinator (root node)                                          │
//! │  - Registry (TaskId → task supervisor, epoch, incarnation)        │
//! │  - coordinator-level policy (Decider + budgets per task)          │
//! │  - root policy (coordinator's own failure; Escalate = Stop)       │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!   │ Supervisor a │   │ Supervisor b │   │ Supervisor c │  task-level policy,
//!   │  watch(sink) │   │  watch(sink) │   │  watch(sink) │  liveness watch
//!   └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!          ▼                  ▼                  ▼
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!   │   Worker     │   │   Worker     │   │   Worker     │  runs Work once,
//!   │ (inc n)      │   │ (inc n)      │   │ (inc n)      │  parks on failure
//!   └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!          ▼                  ▼                  ▼
//!       ResultSink         ResultSink         ResultSink   (Accepted, Result,
//!                                                           FailedPermanently, Stopped)
//!
//! every node ── publish(Event) ──► Bus ──► listener ──► SubscriberSet ──► Subscribe impls
//! ```
//!
//! ### Failure flow
//! ```text
//! Worker fails(cause) ──► Supervisor: decider.decide(cause)
//!   ├─ Resume   ─► same instance runs again (incarnation kept)
//!   ├─ Restart  ─► budget.allow(now)? new instance (incarnation + 1) : Stop
//!   ├─ Stop     ─► sink ◄ FailedPermanently, supervisor completes
//!   └─ Escalate ─► supervisor stops its worker, fails to the Coordinator,
//!                  which applies its own policy to the supervisor's failure
//! ```
//!
//! ## Features
//! | Area              | Description                                                        | Key types / traits                                  |
//! |-------------------|--------------------------------------------------------------------|-----------------------------------------------------|
//! | **Tree**          | Start, stop, list and shut down supervised tasks.                  | [`Coordinator`], [`CoordinatorBuilder`]             |
//! | **Policies**      | Per-level deciders, sliding-window budgets, restart backoff.       | [`SupervisionPolicy`], [`Decider`], [`RestartBudget`] |
//! | **Work**          | Units of work as trait objects or closures.                        | [`Work`], [`WorkFn`], [`WorkFactory`]               |
//! | **Results**       | Caller-owned outbound event stream, watched for liveness.          | [`ResultSink`], [`TaskEvent`]                       |
//! | **Subscriber API**| Hook into runtime events (logging, metrics, custom subscribers).   | [`Subscribe`], [`Event`]                            |
//! | **Errors**        | Typed failure causes, command errors and runtime errors.           | [`WorkerError`], [`CommandError`], [`RuntimeError`] |
//! | **Configuration** | Centralize runtime settings.                                       | [`Config`]                                          |
//!
//! ## Optional features
//! - `logging`: exports the built-in `tracing`-backed `LogWriter` subscriber.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use treevisor::{
//!     BoxWork, Config, Coordinator, Payload, ResultSink, TaskEvent, TaskId, WorkContext, WorkFn,
//!     WorkerError,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn treevisor::Subscribe>> = vec![Arc::new(treevisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn treevisor::Subscribe>> = Vec::new();
//!
//!     // Fails with an ignorable error first; the default task policy resumes it.
//!     let factory = |_: &TaskId, _: &Payload| -> BoxWork {
//!         let mut runs = 0u32;
//!         WorkFn::boxed(move |ctx: WorkContext| {
//!             runs += 1;
//!             let first = runs == 1;
//!             async move {
//!                 if first {
//!                     return Err(WorkerError::ignorable("warming up"));
//!                 }
//!                 Ok(format!("tail of {}", ctx.payload))
//!             }
//!         })
//!     };
//!
//!     let coord = Coordinator::builder(Config::default())
//!         .with_subscribers(subs)
//!         .build(factory);
//!
//!     let (sink, mut rx) = ResultSink::channel();
//!     coord.start_task("log", "/var/log/app.log", sink).await?;
//!
//!     while let Some(ev) = rx.recv().await {
//!         if let TaskEvent::Result { value, .. } = ev {
//!             assert_eq!(value, "tail of /var/log/app.log");
//!             break;
//!         }
//!     }
//!
//!     coord.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod policies;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use crate::core::{Config, Coordinator, CoordinatorBuilder};
pub use error::{CommandError, RuntimeError, WorkerError};
pub use events::{Bus, Event, EventKind};
pub use policies::{
    BackoffPolicy, Decider, Directive, FaultKind, JitterPolicy, RestartBudget, SupervisionPolicy,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{
    BoxWork, Payload, ResultSink, SinkId, TaskEvent, TaskId, Work, WorkContext, WorkFactory,
    WorkFn,
};

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
