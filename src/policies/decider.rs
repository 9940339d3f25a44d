//! # Failure classification and directives.
//!
//! A [`Decider`] maps a failure cause to a [`Directive`]. It is a small data-driven
//! table keyed by [`FaultKind`] with a fallback for everything else, so it is total,
//! side-effect-free and can be built, compared and tested on its own.
//!
//! ## Example
//! ```rust
//! use treevisor::{Decider, Directive, FaultKind, WorkerError};
//!
//! let decider = Decider::new(Directive::Restart)
//!     .on(FaultKind::Ignorable, Directive::Resume)
//!     .on(FaultKind::Unsupported, Directive::Stop);
//!
//! assert_eq!(decider.decide(&WorkerError::ignorable("overflow")), Directive::Resume);
//! assert_eq!(decider.decide(&WorkerError::unsupported("no such file")), Directive::Stop);
//! assert_eq!(decider.decide(&WorkerError::fail("io")), Directive::Restart);
//! ```

use std::fmt;

use crate::error::WorkerError;

/// Action a supervisor takes in response to a child's failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Directive {
    /// Swallow the failure; the existing instance keeps its state and continues.
    Resume,
    /// Discard the instance and create a fresh one (subject to the restart budget).
    Restart,
    /// Terminate the child permanently.
    Stop,
    /// Re-raise as a failure of the supervisor itself, one level up.
    Escalate,
}

impl Directive {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Directive::Resume => "resume",
            Directive::Restart => "restart",
            Directive::Stop => "stop",
            Directive::Escalate => "escalate",
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Classification of a failure cause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Generic failure, assumed transient.
    Transient,
    /// Non-critical failure.
    Ignorable,
    /// Unrecoverable request.
    Unsupported,
    /// Run exceeded its time limit.
    Timeout,
    /// Run panicked.
    Panic,
    /// A child supervisor escalated.
    Escalated,
    /// Cooperative exit after cancellation.
    Canceled,
}

/// Pure mapping from a failure cause to a [`Directive`].
///
/// The first matching rule wins; unmatched kinds get the fallback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decider {
    rules: Vec<(FaultKind, Directive)>,
    fallback: Directive,
}

impl Decider {
    /// Creates a decider that answers `fallback` for every cause.
    pub fn new(fallback: Directive) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Adds a rule for `kind`.
    #[must_use]
    pub fn on(mut self, kind: FaultKind, directive: Directive) -> Self {
        self.rules.push((kind, directive));
        self
    }

    /// The reference table shared by both tree levels:
    /// `Ignorable → Resume`, `Unsupported → Stop`, everything else → `fallback`.
    pub fn reference(fallback: Directive) -> Self {
        Self::new(fallback)
            .on(FaultKind::Ignorable, Directive::Resume)
            .on(FaultKind::Unsupported, Directive::Stop)
    }

    /// Decides what to do about `cause`.
    pub fn decide(&self, cause: &WorkerError) -> Directive {
        self.decide_kind(cause.kind())
    }

    /// Decides by classification alone.
    pub fn decide_kind(&self, kind: FaultKind) -> Directive {
        self.rules
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| *d)
            .unwrap_or(self.fallback)
    }

    /// Returns the directive used for unmatched causes.
    pub fn fallback(&self) -> Directive {
        self.fallback
    }
}

impl Default for Decider {
    /// Returns [`Decider::reference`] with a `Restart` fallback.
    fn default() -> Self {
        Self::reference(Directive::Restart)
    }
}
