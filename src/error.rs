//! Error types used by the treevisor runtime and units of work.
//!
//! This module defines three error enums:
//!
//! - [`WorkerError`] — failure causes raised by individual units of work (and by
//!   supervisors that escalate). These are what a [`Decider`](crate::Decider) classifies.
//! - [`CommandError`] — synchronous errors returned to the issuer of a coordinator command.
//! - [`RuntimeError`] — errors raised by the tree runtime itself.
//!
//! All types provide an `as_label` helper for logs/metrics.

use std::time::Duration;
use thiserror::Error;

use crate::policies::FaultKind;
use crate::tasks::TaskId;

/// # Errors produced by the tree runtime.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some task subtrees did not stop in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Task ids whose supervisors did not finish in time.
        stuck: Vec<TaskId>,
    },

    /// The coordinator failed and its root policy decided it must not continue.
    #[error("coordinator stopped: {cause}")]
    CoordinatorStopped {
        /// The failure that brought the coordinator down.
        cause: WorkerError,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use treevisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::CoordinatorStopped { .. } => "runtime_coordinator_stopped",
        }
    }
}

/// # Errors returned synchronously to the issuer of a command.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// A task with this id is already active.
    #[error("task {id} is already active")]
    DuplicateTask {
        /// The rejected id.
        id: TaskId,
    },

    /// No active task with this id.
    #[error("task {id} is unknown")]
    UnknownTask {
        /// The id that was not found.
        id: TaskId,
    },

    /// The coordinator is no longer running.
    #[error("coordinator is closed")]
    Closed,
}

impl CommandError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CommandError::DuplicateTask { .. } => "command_duplicate_task",
            CommandError::UnknownTask { .. } => "command_unknown_task",
            CommandError::Closed => "command_closed",
        }
    }
}

/// # Failure causes produced by a unit of work.
///
/// Each variant belongs to exactly one [`FaultKind`], which is what deciders match on.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Generic failure; may succeed if the work is retried.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Non-critical failure the work can keep going after.
    #[error("ignorable failure: {error}")]
    Ignorable {
        /// The underlying error message.
        error: String,
    },

    /// The work was asked to do something it cannot do; retrying is pointless.
    #[error("unsupported: {error}")]
    Unsupported {
        /// The underlying error message.
        error: String,
    },

    /// The work exceeded the configured per-run limit.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The limit that was exceeded.
        timeout: Duration,
    },

    /// The work panicked.
    #[error("panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// A supervisor re-raised itself as failed after one of its children failed.
    #[error("supervisor for {task} escalated: {cause}")]
    Escalated {
        /// Task the escalating supervisor was serving.
        task: TaskId,
        /// The child failure that triggered the escalation.
        cause: Box<WorkerError>,
    },

    /// The work observed cancellation and exited cooperatively.
    #[error("context cancelled")]
    Canceled,
}

impl WorkerError {
    /// Shorthand for [`WorkerError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        WorkerError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for [`WorkerError::Ignorable`].
    pub fn ignorable(error: impl Into<String>) -> Self {
        WorkerError::Ignorable {
            error: error.into(),
        }
    }

    /// Shorthand for [`WorkerError::Unsupported`].
    pub fn unsupported(error: impl Into<String>) -> Self {
        WorkerError::Unsupported {
            error: error.into(),
        }
    }

    /// Returns the classification used by deciders.
    ///
    /// # Example
    /// ```
    /// use treevisor::{FaultKind, WorkerError};
    ///
    /// assert_eq!(WorkerError::ignorable("div by zero").kind(), FaultKind::Ignorable);
    /// assert_eq!(WorkerError::fail("boom").kind(), FaultKind::Transient);
    /// ```
    pub fn kind(&self) -> FaultKind {
        match self {
            WorkerError::Fail { .. } => FaultKind::Transient,
            WorkerError::Ignorable { .. } => FaultKind::Ignorable,
            WorkerError::Unsupported { .. } => FaultKind::Unsupported,
            WorkerError::Timeout { .. } => FaultKind::Timeout,
            WorkerError::Panicked { .. } => FaultKind::Panic,
            WorkerError::Escalated { .. } => FaultKind::Escalated,
            WorkerError::Canceled => FaultKind::Canceled,
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Fail { .. } => "worker_failed",
            WorkerError::Ignorable { .. } => "worker_ignorable",
            WorkerError::Unsupported { .. } => "worker_unsupported",
            WorkerError::Timeout { .. } => "worker_timeout",
            WorkerError::Panicked { .. } => "worker_panicked",
            WorkerError::Escalated { .. } => "supervisor_escalated",
            WorkerError::Canceled => "worker_canceled",
        }
    }

    /// Returns the innermost child failure behind a chain of escalations.
    pub fn root_cause(&self) -> &WorkerError {
        let mut cur = self;
        while let WorkerError::Escalated { cause, .. } = cur {
            cur = cause;
        }
        cur
    }
}
