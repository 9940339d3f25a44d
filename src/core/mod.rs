//! Runtime core: the supervision tree and its nodes.
//!
//! The public API from this module is [`Coordinator`] (plus its builder and
//! [`Config`]). Everything else is node plumbing.
//!
//! Internal modules:
//! - [`coordinator`]: root node; start/stop commands, coordinator and root policies, shutdown;
//! - [`supervisor`]: task supervisor; owns the worker, applies the task policy;
//! - [`worker`]: runs one unit of work, parks on failure;
//! - [`runner`]: executes one run with timeout, cancellation and panic capture;
//! - [`supervision`]: decider + restart budgets + backoff for one level;
//! - [`watch`]: liveness subscriptions on result sinks;
//! - [`registry`]: the coordinator's table of active tasks.

mod builder;
mod config;
mod coordinator;
mod registry;
mod runner;
mod supervision;
mod supervisor;
mod watch;
mod worker;

use std::any::Any;

pub use builder::CoordinatorBuilder;
pub use config::Config;
pub use coordinator::Coordinator;

/// Renders a panic payload as text.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
