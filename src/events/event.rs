//! # Runtime events emitted by the tree.
//!
//! [`EventKind`] classifies what happened; [`Event`] carries it with optional
//! metadata (task, incarnation, directive, reason, delays). Events are purely
//! observational: nothing in the tree reacts to them, control flow travels
//! through node mailboxes.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically; use it to restore order across subscribers.
//!
//! ## Example
//! ```rust
//! use treevisor::{Directive, Event, EventKind};
//!
//! let ev = Event::new(EventKind::WorkerFailed)
//!     .with_task("tail-1")
//!     .with_incarnation(2)
//!     .with_directive(Directive::Restart)
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::WorkerFailed);
//! assert_eq!(ev.task.as_deref(), Some("tail-1"));
//! assert_eq!(ev.incarnation, Some(2));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::policies::Directive;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked while handling an event. `task` = subscriber name.
    SubscriberPanicked,
    /// Subscriber queue was full or closed; the event was dropped for it.
    SubscriberOverflow,

    // === Shutdown events ===
    /// `Coordinator::shutdown` was called.
    ShutdownRequested,
    /// Every subtree stopped within the grace period.
    AllStoppedWithin,
    /// Grace period exceeded; `reason` lists the stuck tasks.
    GraceExceeded,

    // === Coordinator commands ===
    /// `start_task` accepted; a supervisor is being created.
    TaskAccepted,
    /// `start_task` or `stop_task` rejected. `reason` = error label.
    TaskRejected,
    /// `stop_task` accepted; cooperative stop in progress.
    TaskStopRequested,
    /// Task record removed from the coordinator.
    TaskRemoved,
    /// Task stopped for good; `reason` = last cause.
    TaskFailedPermanently,

    // === Worker lifecycle ===
    /// Worker is starting a run. Sets `incarnation`, `run`.
    WorkerStarting,
    /// Worker produced its result.
    WorkerSucceeded,
    /// Worker run failed. Sets `reason` and the `directive` the supervisor chose.
    WorkerFailed,
    /// Worker run exceeded the configured limit (followed by `WorkerFailed`).
    TimeoutHit,
    /// Existing worker instance told to continue.
    WorkerResumed,
    /// Fresh worker instance created. Sets new `incarnation`, `delay_ms`.
    WorkerRestarted,
    /// Worker reclaimed by its supervisor.
    WorkerStopped,
    /// A `Restart` was denied by the restart budget and downgraded to `Stop`.
    BudgetExhausted,

    // === Supervisor lifecycle ===
    /// Task supervisor created. Sets `incarnation`.
    SupervisorStarted,
    /// Task supervisor stopped its children and re-raised itself as failed.
    SupervisorEscalated,
    /// Escalated supervisor told to continue by the coordinator.
    SupervisorResumed,
    /// Escalated supervisor replaced by a fresh one. Sets new `incarnation`.
    SupervisorRestarted,
    /// Task supervisor terminated. `reason` = completion label.
    SupervisorStopped,
    /// Watched result sink disappeared.
    SinkLost,

    // === Coordinator lifecycle ===
    /// Coordinator escalated a child failure into its own failure.
    CoordinatorFailed,
    /// Root policy resumed the coordinator.
    CoordinatorResumed,
    /// Root policy restarted the coordinator (budgets cleared).
    CoordinatorRestarted,
    /// Coordinator stopped permanently.
    CoordinatorStopped,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Task the event is about, if any.
    pub task: Option<Arc<str>>,
    /// Incarnation of the node the event is about.
    pub incarnation: Option<u64>,
    /// Run number of a worker instance.
    pub run: Option<u32>,
    /// Directive chosen by a supervisor.
    pub directive: Option<Directive>,
    /// Human-readable reason (errors, labels, overflow details).
    pub reason: Option<Arc<str>>,
    /// Restart delay in milliseconds.
    pub delay_ms: Option<u32>,
    /// Run limit in milliseconds.
    pub timeout_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            incarnation: None,
            run: None,
            directive: None,
            reason: None,
            delay_ms: None,
            timeout_ms: None,
        }
    }

    /// Attaches a task id.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches an incarnation number.
    #[inline]
    pub fn with_incarnation(mut self, n: u64) -> Self {
        self.incarnation = Some(n);
        self
    }

    /// Attaches a run number.
    #[inline]
    pub fn with_run(mut self, n: u32) -> Self {
        self.run = Some(n);
        self
    }

    /// Attaches the chosen directive.
    #[inline]
    pub fn with_directive(mut self, d: Directive) -> Self {
        self.directive = Some(d);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a restart delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(clamp_ms(d));
        self
    }

    /// Attaches a run limit (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(clamp_ms(d));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }
}

fn clamp_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
