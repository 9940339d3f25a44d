//! # Result sink: the outbound edge of the tree.
//!
//! A [`ResultSink`] is the caller-owned endpoint that receives [`TaskEvent`]s for the
//! tasks it started. It is the external party the task supervisor keeps a liveness
//! watch on: once the receiving half is dropped, the supervisor serving that task
//! winds its subtree down.
//!
//! ```text
//! let (sink, mut rx) = ResultSink::channel();
//! coordinator.start_task("a", payload, sink).await?;
//! while let Some(ev) = rx.recv().await { ... }
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::sync::mpsc;

use crate::error::WorkerError;
use crate::tasks::TaskId;

static SINK_SEQ: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a sink, used as the key of the liveness-watch table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

/// Notification delivered to a [`ResultSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskEvent {
    /// The task was accepted and its supervisor created.
    Accepted {
        /// Task id.
        id: TaskId,
    },
    /// The worker finished and produced a value.
    Result {
        /// Task id.
        id: TaskId,
        /// The produced value.
        value: String,
    },
    /// The task was stopped and no level of the tree will restart it.
    FailedPermanently {
        /// Task id.
        id: TaskId,
        /// The failure that led to the stop.
        last_cause: WorkerError,
    },
    /// A cooperative `stop_task` finished tearing the task down.
    Stopped {
        /// Task id.
        id: TaskId,
    },
}

impl TaskEvent {
    /// Returns the id of the task this event is about.
    pub fn id(&self) -> &TaskId {
        match self {
            TaskEvent::Accepted { id }
            | TaskEvent::Result { id, .. }
            | TaskEvent::FailedPermanently { id, .. }
            | TaskEvent::Stopped { id } => id,
        }
    }
}

/// Sending half of a caller-owned event stream.
#[derive(Clone, Debug)]
pub struct ResultSink {
    id: SinkId,
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl ResultSink {
    /// Creates a sink and the receiver the caller reads events from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::from_sender(tx), rx)
    }

    /// Wraps an existing sender; each call yields a sink with a fresh identity.
    pub fn from_sender(tx: mpsc::UnboundedSender<TaskEvent>) -> Self {
        Self {
            id: SinkId(SINK_SEQ.fetch_add(1, AtomicOrdering::Relaxed)),
            tx,
        }
    }

    /// Returns the sink identity.
    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Delivers an event. Returns `false` if the receiver is gone.
    pub fn deliver(&self, ev: TaskEvent) -> bool {
        self.tx.send(ev).is_ok()
    }

    /// Returns true once the receiving half has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Completes when the receiving half is dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
