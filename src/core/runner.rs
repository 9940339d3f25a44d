//! # Run a unit of work once.
//!
//! Executes one run of a [`Work`] instance, converting the two ways a run can go
//! wrong outside of its own `Result` into ordinary failure causes:
//!
//! ```text
//! work.run(ctx) ─► Ok(value)            → Ok(value)
//!               ─► Err(cause)           → Err(cause)
//!               ─► panic                → Err(Panicked{info})
//!               ─► limit exceeded       → cancel run token, publish TimeoutHit,
//!                                         wait for the run to return
//!                                         → Err(Timeout{limit})
//! ```
//!
//! ## Rules
//! - Each run gets its **own child token**; cancelling it on timeout does not
//!   touch the worker's token, so a resumed instance starts clean.
//! - A run is never interrupted: past the limit it is only asked to stop, and
//!   whatever it returns afterwards is replaced by `Timeout`.

use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::time::Duration;

use futures::FutureExt;
use tokio::time;

use crate::core::panic_message;
use crate::error::WorkerError;
use crate::events::{Bus, Event, EventKind};
use crate::tasks::{Work, WorkContext};

/// Executes a single run of `work` with optional time limit.
pub(crate) async fn run_once(
    work: &mut dyn Work,
    mut ctx: WorkContext,
    limit: Option<Duration>,
    bus: &Bus,
) -> Result<String, WorkerError> {
    let run_token = ctx.token.child_token();
    ctx.token = run_token.clone();
    let task = ctx.task.clone();
    let incarnation = ctx.incarnation;

    let mut fut = pin!(AssertUnwindSafe(work.run(ctx)).catch_unwind());
    let res = match limit.filter(|d| !d.is_zero()) {
        Some(dur) => match time::timeout(dur, &mut fut).await {
            Ok(r) => r,
            Err(_elapsed) => {
                run_token.cancel();
                bus.publish(
                    Event::new(EventKind::TimeoutHit)
                        .with_task(&task)
                        .with_incarnation(incarnation)
                        .with_timeout(dur),
                );
                let _ = fut.await;
                return Err(WorkerError::Timeout { timeout: dur });
            }
        },
        None => fut.await,
    };

    match res {
        Ok(r) => r,
        Err(panic) => Err(WorkerError::Panicked {
            info: panic_message(panic.as_ref()),
        }),
    }
}
