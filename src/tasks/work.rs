//! # Unit-of-work abstraction.
//!
//! A [`Work`] instance is what a worker node runs. The instance *is* the worker's
//! state: a `Resume` runs the same instance again (state kept), a `Restart` asks the
//! [`WorkFactory`] for a brand-new instance (state discarded).
//!
//! A run receives a [`WorkContext`] whose [`CancellationToken`] is cancelled when the
//! supervisor wants the work to stop; implementations should check it and return
//! [`WorkerError::Canceled`] (or a result) promptly. Nothing interrupts a run
//! forcibly.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::tasks::{Payload, TaskId};

/// Per-run context handed to [`Work::run`].
#[derive(Clone, Debug)]
pub struct WorkContext {
    /// Task this work belongs to.
    pub task: TaskId,
    /// The task payload.
    pub payload: Payload,
    /// Incarnation of the worker instance (1-based, +1 per restart).
    pub incarnation: u64,
    /// Run of this instance (1-based, +1 per resume).
    pub run: u32,
    /// Cooperative stop signal.
    pub token: CancellationToken,
}

/// # Asynchronous, resumable unit of work.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use treevisor::{Work, WorkContext, WorkerError};
///
/// struct Echo { seen: u32 }
///
/// #[async_trait]
/// impl Work for Echo {
///     async fn run(&mut self, ctx: WorkContext) -> Result<String, WorkerError> {
///         self.seen += 1;
///         if ctx.token.is_cancelled() {
///             return Err(WorkerError::Canceled);
///         }
///         Ok(ctx.payload.to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait Work: Send + 'static {
    /// Performs the work once.
    async fn run(&mut self, ctx: WorkContext) -> Result<String, WorkerError>;
}

/// Owned, type-erased work instance.
pub type BoxWork = Box<dyn Work>;

/// Creates fresh [`Work`] instances from a task's configuration.
///
/// Any `Fn(&TaskId, &Payload) -> BoxWork` closure is a factory.
pub trait WorkFactory: Send + Sync + 'static {
    /// Builds a new instance for `task`.
    fn create(&self, task: &TaskId, payload: &Payload) -> BoxWork;
}

impl<F> WorkFactory for F
where
    F: Fn(&TaskId, &Payload) -> BoxWork + Send + Sync + 'static,
{
    fn create(&self, task: &TaskId, payload: &Payload) -> BoxWork {
        self(task, payload)
    }
}
