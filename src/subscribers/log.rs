//! # LogWriter: renders tree events through `tracing`.
//!
//! Failures and terminal outcomes are logged at `warn`, everything else at `info`
//! or `debug`. Install any `tracing` subscriber to see the output.
//!
//! ## Example output
//! ```text
//! INFO  worker starting task="tail-1" incarnation=1 run=1
//! WARN  worker failed task="tail-1" incarnation=1 directive=restart reason="execution failed: io"
//! INFO  worker restarted task="tail-1" incarnation=2 delay_ms=0
//! WARN  restart budget exhausted task="tail-1" incarnation=2
//! WARN  task failed permanently task="tail-1" reason="execution failed: io"
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::WorkerStarting => {
                info!(task, incarnation = ?e.incarnation, run = ?e.run, "worker starting")
            }
            EventKind::WorkerSucceeded => info!(task, incarnation = ?e.incarnation, "worker succeeded"),
            EventKind::WorkerFailed => warn!(
                task,
                incarnation = ?e.incarnation,
                directive = ?e.directive,
                reason,
                "worker failed"
            ),
            EventKind::TimeoutHit => warn!(task, timeout_ms = ?e.timeout_ms, "worker timed out"),
            EventKind::WorkerResumed => info!(task, incarnation = ?e.incarnation, "worker resumed"),
            EventKind::WorkerRestarted => {
                info!(task, incarnation = ?e.incarnation, delay_ms = ?e.delay_ms, "worker restarted")
            }
            EventKind::WorkerStopped => debug!(task, incarnation = ?e.incarnation, "worker stopped"),
            EventKind::BudgetExhausted => {
                warn!(task, incarnation = ?e.incarnation, "restart budget exhausted")
            }
            EventKind::SupervisorStarted => {
                debug!(task, incarnation = ?e.incarnation, "supervisor started")
            }
            EventKind::SupervisorEscalated => warn!(task, reason, "supervisor escalated"),
            EventKind::SupervisorResumed => info!(task, "supervisor resumed"),
            EventKind::SupervisorRestarted => {
                info!(task, incarnation = ?e.incarnation, "supervisor restarted")
            }
            EventKind::SupervisorStopped => debug!(task, reason, "supervisor stopped"),
            EventKind::SinkLost => warn!(task, "result sink lost"),
            EventKind::TaskAccepted => info!(task, "task accepted"),
            EventKind::TaskRejected => warn!(task, reason, "task command rejected"),
            EventKind::TaskStopRequested => info!(task, "task stop requested"),
            EventKind::TaskRemoved => debug!(task, "task removed"),
            EventKind::TaskFailedPermanently => warn!(task, reason, "task failed permanently"),
            EventKind::CoordinatorFailed => warn!(reason, "coordinator failed"),
            EventKind::CoordinatorResumed => info!("coordinator resumed"),
            EventKind::CoordinatorRestarted => info!("coordinator restarted"),
            EventKind::CoordinatorStopped => warn!(reason, "coordinator stopped"),
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::AllStoppedWithin => info!("all tasks stopped within grace"),
            EventKind::GraceExceeded => warn!(reason, "grace exceeded"),
            EventKind::SubscriberOverflow => warn!(subscriber = task, reason, "subscriber overflow"),
            EventKind::SubscriberPanicked => warn!(subscriber = task, reason, "subscriber panicked"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
