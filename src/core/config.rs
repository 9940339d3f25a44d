//! # Global runtime configuration.
//!
//! Provides [`Config`], the settings of one supervision tree.
//!
//! Config is consumed once, by [`CoordinatorBuilder::build`](crate::CoordinatorBuilder::build):
//! the coordinator keeps the coordinator-level and root policies, and hands the
//! task-level policy and run timeout to every task supervisor it creates.
//!
//! ## Sentinel values
//! - `worker_timeout = 0s` → runs are not time-limited
//! - `max_retries < 0` (in any policy) → unlimited restarts
//! - `window = 0s` (in any policy) → restarts never age out of the budget
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use treevisor::{Config, Decider, Directive, FaultKind, SupervisionPolicy};
//!
//! let mut cfg = Config::default();
//! cfg.grace = Duration::from_secs(5);
//! cfg.worker_timeout = Duration::from_secs(2);
//! cfg.task = SupervisionPolicy::new(
//!     3,
//!     Duration::from_secs(10),
//!     Decider::reference(Directive::Restart).on(FaultKind::Panic, Directive::Escalate),
//! );
//!
//! assert_eq!(cfg.run_timeout(), Some(Duration::from_secs(2)));
//! ```

use std::time::Duration;

use crate::policies::SupervisionPolicy;

/// Configuration of one supervision tree.
///
/// ## Field semantics
/// - `grace`: maximum wait for subtrees to stop (shutdown, coordinator failure)
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `worker_timeout`: per-run limit for units of work (`0s` = none)
/// - `task`: policy task supervisors apply to their workers
/// - `coordinator`: policy the coordinator applies to escalating task supervisors
/// - `root`: policy applied to the coordinator's own failure (`Escalate` means `Stop`)
///
/// ## Notes
/// All fields are public. Prefer the helper accessors over sentinel checks.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for subtrees to stop.
    ///
    /// On overrun the remaining work is cancelled through its token and
    /// `shutdown` returns `RuntimeError::GraceExceeded`.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` messages will
    /// receive `Lagged` and skip older items.
    pub bus_capacity: usize,

    /// Per-run time limit; exceeding it is a `WorkerError::Timeout` failure.
    pub worker_timeout: Duration,

    /// Task-level supervision policy.
    pub task: SupervisionPolicy,

    /// Coordinator-level supervision policy.
    pub coordinator: SupervisionPolicy,

    /// Policy for the coordinator's own failures.
    pub root: SupervisionPolicy,
}

impl Config {
    /// Returns the per-run limit as an `Option` (`None` = unlimited).
    #[inline]
    pub fn run_timeout(&self) -> Option<Duration> {
        if self.worker_timeout.is_zero() {
            None
        } else {
            Some(self.worker_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 60s`
    /// - `bus_capacity = 1024`
    /// - `worker_timeout = 0s` (no limit)
    /// - `task = SupervisionPolicy::task_level()` (1 restart / 30s)
    /// - `coordinator = root = SupervisionPolicy::coordinator_level()` (5 restarts / 30s)
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            bus_capacity: 1024,
            worker_timeout: Duration::ZERO,
            task: SupervisionPolicy::task_level(),
            coordinator: SupervisionPolicy::coordinator_level(),
            root: SupervisionPolicy::coordinator_level(),
        }
    }
}
