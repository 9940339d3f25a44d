//! # Function-backed work (`WorkFn`)
//!
//! [`WorkFn`] wraps an `FnMut(WorkContext) -> Fut` closure. Anything the closure
//! captures by move lives as long as the instance: it survives a `Resume` and is
//! rebuilt from scratch by the factory on `Restart`.
//!
//! ## Example
//! ```rust
//! use treevisor::{BoxWork, Payload, TaskId, WorkContext, WorkFn, WorkerError};
//!
//! let factory = |_id: &TaskId, _payload: &Payload| -> BoxWork {
//!     let mut runs = 0u32;
//!     WorkFn::boxed(move |ctx: WorkContext| {
//!         runs += 1;
//!         let seen = runs;
//!         async move {
//!             if seen == 1 {
//!                 return Err(WorkerError::ignorable("first run"));
//!             }
//!             Ok(format!("{} after {seen} runs", ctx.payload))
//!         }
//!     })
//! };
//! # let _ = factory;
//! ```

use std::future::Future;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::tasks::work::{BoxWork, Work, WorkContext};

/// Function-backed [`Work`].
pub struct WorkFn<F> {
    f: F,
}

impl<F> WorkFn<F> {
    /// Wraps a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> WorkFn<F>
where
    F: FnMut(WorkContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<String, WorkerError>> + Send + 'static,
{
    /// Wraps a closure and erases its type.
    pub fn boxed(f: F) -> BoxWork {
        Box::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Work for WorkFn<F>
where
    F: FnMut(WorkContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<String, WorkerError>> + Send + 'static,
{
    async fn run(&mut self, ctx: WorkContext) -> Result<String, WorkerError> {
        (self.f)(ctx).await
    }
}
