//! # Per-level supervision policy.
//!
//! A [`SupervisionPolicy`] bundles everything one tree level needs to react to a
//! child's failure: the [`Decider`], the restart budget parameters and the
//! restart backoff. Every level carries its own policy, so a task supervisor and
//! the coordinator above it can disagree about the same cause.
//!
//! ## Sentinel values
//! - `max_retries < 0` → unlimited restarts
//! - `window = 0s`     → restarts never age out of the budget

use std::time::Duration;

use crate::policies::{BackoffPolicy, Decider, Directive, RestartBudget};

/// Failure-handling policy applied by one supervisor level to its children.
#[derive(Clone, Debug, PartialEq)]
pub struct SupervisionPolicy {
    /// Maximum restarts per child inside `window` (negative = unlimited).
    pub max_retries: i32,
    /// Sliding window for `max_retries` (`0s` = unbounded).
    pub window: Duration,
    /// Maps failure causes to directives.
    pub decider: Decider,
    /// Delay before a restarted child runs.
    pub backoff: BackoffPolicy,
}

impl SupervisionPolicy {
    /// Creates a policy with immediate restarts.
    pub fn new(max_retries: i32, window: Duration, decider: Decider) -> Self {
        Self {
            max_retries,
            window,
            decider,
            backoff: BackoffPolicy::immediate(),
        }
    }

    /// Reference policy for task supervisors:
    /// one restart per 30s, `Ignorable → Resume`, `Unsupported → Stop`, `* → Restart`.
    pub fn task_level() -> Self {
        Self::new(1, Duration::from_secs(30), Decider::reference(Directive::Restart))
    }

    /// Reference policy for the coordinator: same table, five restarts per 30s.
    pub fn coordinator_level() -> Self {
        Self::new(5, Duration::from_secs(30), Decider::reference(Directive::Restart))
    }

    /// Returns a copy with a different backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the restart ceiling as an `Option` (`None` = unlimited).
    #[inline]
    pub fn retry_limit(&self) -> Option<u32> {
        u32::try_from(self.max_retries).ok()
    }

    /// Returns the budget window as an `Option` (`None` = unbounded).
    #[inline]
    pub fn window_limit(&self) -> Option<Duration> {
        if self.window.is_zero() {
            None
        } else {
            Some(self.window)
        }
    }

    /// Creates an empty restart budget for one child.
    pub fn budget(&self) -> RestartBudget {
        RestartBudget::with_limits(self.retry_limit(), self.window_limit())
    }
}
