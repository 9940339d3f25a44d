//! Failure-handling policies.
//!
//! ## Contents
//! - [`Decider`], [`Directive`], [`FaultKind`] what to do about a failure
//! - [`RestartBudget`] how many restarts a child may receive in a sliding window
//! - [`BackoffPolicy`], [`JitterPolicy`] how long a restarted child waits before running
//! - [`SupervisionPolicy`] the bundle one tree level applies to its children
//!
//! ## Quick wiring
//! ```text
//! child failure(cause)
//!   └─► policy.decider.decide(cause)
//!         ├─ Resume   ─► existing instance continues
//!         ├─ Restart  ─► budget.allow(now)?
//!         │                ├─ yes ─► new instance after backoff.next(used)
//!         │                └─ no  ─► Stop
//!         ├─ Stop     ─► child torn down, terminal notification
//!         └─ Escalate ─► supervisor fails itself to its parent
//! ```

mod backoff;
mod budget;
mod decider;
mod jitter;
mod policy;

pub use backoff::BackoffPolicy;
pub use budget::RestartBudget;
pub use decider::{Decider, Directive, FaultKind};
pub use jitter::JitterPolicy;
pub use policy::SupervisionPolicy;
