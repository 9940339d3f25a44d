//! # Failure evaluation shared by every supervising level.
//!
//! [`Supervision`] owns one level's [`SupervisionPolicy`] and the restart budgets
//! of that level's children, keyed by whatever the level uses to name a child.
//! It turns `(child, cause, now)` into an [`Outcome`]; applying the outcome is
//! the caller's job.
//!
//! ```text
//! decide(cause)
//!   ├─ Resume   ─► Outcome::Resume
//!   ├─ Stop     ─► Outcome::Stop { exhausted: false }
//!   ├─ Escalate ─► Outcome::Escalate
//!   └─ Restart  ─► budget.allow(now)
//!                    ├─ granted ─► Outcome::Restart { delay: backoff.next(used - 1) }
//!                    └─ denied  ─► Outcome::Stop { exhausted: true }
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::error::WorkerError;
use crate::policies::{Directive, RestartBudget, SupervisionPolicy};

/// Effective result of evaluating one failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Resume,
    Restart { delay: Duration },
    Stop { exhausted: bool },
    Escalate,
}

impl Outcome {
    /// The directive actually applied (a denied restart reports as `Stop`).
    pub(crate) fn directive(&self) -> Directive {
        match self {
            Outcome::Resume => Directive::Resume,
            Outcome::Restart { .. } => Directive::Restart,
            Outcome::Stop { .. } => Directive::Stop,
            Outcome::Escalate => Directive::Escalate,
        }
    }
}

/// Policy plus per-child restart budgets for one level of the tree.
#[derive(Debug)]
pub(crate) struct Supervision<K> {
    policy: SupervisionPolicy,
    budgets: HashMap<K, RestartBudget>,
}

impl<K: Eq + Hash + Clone> Supervision<K> {
    pub(crate) fn new(policy: SupervisionPolicy) -> Self {
        Self {
            policy,
            budgets: HashMap::new(),
        }
    }

    /// Starts tracking a child; an existing budget is kept.
    pub(crate) fn register(&mut self, child: K) {
        let policy = &self.policy;
        self.budgets.entry(child).or_insert_with(|| policy.budget());
    }

    /// Stops tracking a child.
    pub(crate) fn forget(&mut self, child: &K) {
        self.budgets.remove(child);
    }

    /// Drops every budget (fresh instance of the supervising node).
    pub(crate) fn reset(&mut self) {
        self.budgets.clear();
    }

    /// Evaluates a failure of `child` at `now`.
    pub(crate) fn on_failure(&mut self, child: &K, cause: &WorkerError, now: Instant) -> Outcome {
        match self.policy.decider.decide(cause) {
            Directive::Resume => Outcome::Resume,
            Directive::Stop => Outcome::Stop { exhausted: false },
            Directive::Escalate => Outcome::Escalate,
            Directive::Restart => {
                let policy = &self.policy;
                let budget = self
                    .budgets
                    .entry(child.clone())
                    .or_insert_with(|| policy.budget());
                if budget.allow(now) {
                    let used = budget.used(now).saturating_sub(1);
                    let delay = policy.backoff.next(u32::try_from(used).unwrap_or(u32::MAX));
                    Outcome::Restart { delay }
                } else {
                    Outcome::Stop { exhausted: true }
                }
            }
        }
    }
}
