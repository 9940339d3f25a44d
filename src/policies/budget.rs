//! # Sliding-window restart budget.
//!
//! [`RestartBudget`] bounds how many times one child may be restarted inside a
//! time window. It is the backpressure that keeps a continuously failing child from
//! turning into a restart storm: once the budget denies a request, the owning
//! supervisor downgrades `Restart` to `Stop`.
//!
//! ## Rules
//! - Timestamps older than `window` are pruned **before** counting or recording.
//! - A request is granted iff the remaining count is `< max_retries`.
//! - Granting records `now`; denial records nothing.
//! - `max_retries < 0` → always granted.
//! - `window == 0` → unbounded window, every historical restart counts.
//! - Unlimited and unbounded at once → only a counter is kept.
//!
//! ```text
//! max_retries = 2, window = 10s
//!
//!   t=0   allow → [0]        granted
//!   t=3   allow → [0,3]      granted
//!   t=5   allow → [0,3]      denied (2 in window)
//!   t=11  allow → [3,11]     granted (0 pruned)
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Per-child restart counter over a sliding time window.
#[derive(Clone, Debug)]
pub struct RestartBudget {
    limit: Option<usize>,
    window: Option<Duration>,
    restarts: VecDeque<Instant>,
    /// Grants that need no timestamp (unlimited, unbounded window).
    uncounted: usize,
}

impl RestartBudget {
    /// Creates an empty budget.
    ///
    /// - `max_retries < 0` → unlimited
    /// - `window == Duration::ZERO` → restarts never age out
    pub fn new(max_retries: i32, window: Duration) -> Self {
        let limit = u32::try_from(max_retries).ok();
        let window = (!window.is_zero()).then_some(window);
        Self::with_limits(limit, window)
    }

    /// Creates an empty budget from already decoded limits (`None` = no limit).
    pub fn with_limits(limit: Option<u32>, window: Option<Duration>) -> Self {
        Self {
            limit: limit.map(|n| n as usize),
            window,
            restarts: VecDeque::new(),
            uncounted: 0,
        }
    }

    /// Asks for permission to restart at `now`, recording it when granted.
    pub fn allow(&mut self, now: Instant) -> bool {
        self.prune(now);

        match (self.limit, self.window) {
            (None, None) => {
                self.uncounted = self.uncounted.saturating_add(1);
                true
            }
            (Some(max), _) if self.restarts.len() >= max => false,
            _ => {
                self.restarts.push_back(now);
                true
            }
        }
    }

    /// Number of recorded restarts still inside the window at `now`.
    pub fn used(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.restarts.len().saturating_add(self.uncounted)
    }

    /// Drops timestamps that fell out of the window.
    fn prune(&mut self, now: Instant) {
        let Some(window) = self.window else {
            return;
        };
        while let Some(&oldest) = self.restarts.front() {
            if now.saturating_duration_since(oldest) > window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
    }
}
