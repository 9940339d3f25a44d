//! # Restart backoff.
//!
//! [`BackoffPolicy`] decides how long a freshly restarted child waits before it
//! starts working. The wait is spent inside the new child, never in the supervisor,
//! so a slow backoff does not hold up the supervisor's mailbox.
//!
//! The delay for the `n`-th restart inside the current budget window is
//! `first × factor^n`, clamped to `max`, then jittered. The base is derived from
//! `n` alone, so jitter never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use treevisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(50),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//! assert_eq!(backoff.next(0), Duration::from_millis(50));
//! assert_eq!(backoff.next(2), Duration::from_millis(200));
//! assert_eq!(backoff.next(10), Duration::from_secs(1));
//!
//! assert_eq!(BackoffPolicy::immediate().next(7), Duration::ZERO);
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Delay applied before a restarted child runs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first restart in a window.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth per restart (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl BackoffPolicy {
    /// Restart without waiting.
    pub const fn immediate() -> Self {
        Self {
            first: Duration::ZERO,
            max: Duration::ZERO,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay for the `restarts`-th restart (0-indexed) in the current window.
    pub fn next(&self, restarts: u32) -> Duration {
        if self.first.is_zero() {
            return Duration::ZERO;
        }
        let exp = restarts.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

impl Default for BackoffPolicy {
    /// Returns [`BackoffPolicy::immediate`].
    fn default() -> Self {
        Self::immediate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exp(first_ms: u64, max_ms: u64, jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_immediate_is_always_zero() {
        let b = BackoffPolicy::default();
        for n in [0, 1, 5, u32::MAX] {
            assert_eq!(b.next(n), Duration::ZERO);
        }
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let b = exp(100, 1_000, JitterPolicy::None);
        assert_eq!(b.next(0), Duration::from_millis(100));
        assert_eq!(b.next(1), Duration::from_millis(200));
        assert_eq!(b.next(3), Duration::from_millis(800));
        assert_eq!(b.next(4), Duration::from_millis(1_000));
        assert_eq!(b.next(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_first_above_max_is_clamped() {
        let b = exp(5_000, 1_000, JitterPolicy::None);
        assert_eq!(b.next(0), Duration::from_millis(1_000));
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let b = exp(400, 10_000, JitterPolicy::Equal);
        for _ in 0..50 {
            let d = b.next(1);
            assert!(d >= Duration::from_millis(400) && d <= Duration::from_millis(800));
        }
    }
}
