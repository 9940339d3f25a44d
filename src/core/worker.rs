//! # Worker node: runs one unit of work under a task supervisor.
//!
//! ```text
//! spawn ──► [restart backoff] ──► run ──┬─ Ok(value)  ─► sink ◄ Result, report Succeeded, exit
//!                                       ├─ Canceled   ─► report Canceled, exit
//!                                       └─ Err(cause) ─► report Failed, park
//!                                                          ├─ Resume ─► run again (same instance)
//!                                                          └─ Stop / parent gone ─► exit
//! ```
//!
//! ## Rules
//! - A worker starts working as soon as it is spawned; there is no start message.
//! - After a failure it does nothing until its supervisor answers.
//! - `Resume` reuses the same [`Work`](crate::Work) instance and incarnation;
//!   restarts are done by the supervisor spawning a new worker.
//! - Every report carries the incarnation so the supervisor can drop stale ones.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::runner::run_once;
use crate::core::supervisor::SupervisorMsg;
use crate::error::WorkerError;
use crate::events::{Bus, Event, EventKind};
use crate::tasks::{BoxWork, Payload, ResultSink, SinkId, TaskEvent, TaskId, WorkContext};

/// Index of a child inside its supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ChildId(pub(crate) u32);

/// What a supervisor knows about one of its workers.
#[derive(Clone, Debug)]
pub(crate) struct WorkerRecord {
    pub(crate) id: ChildId,
    pub(crate) parent: TaskId,
    pub(crate) incarnation: u64,
    pub(crate) watching: Option<SinkId>,
}

/// Supervisor → worker control messages.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Resume,
    Stop,
}

/// Worker → supervisor report.
#[derive(Debug)]
pub(crate) struct WorkerReport {
    pub(crate) child: ChildId,
    pub(crate) incarnation: u64,
    pub(crate) outcome: RunOutcome,
}

#[derive(Debug)]
pub(crate) enum RunOutcome {
    Succeeded,
    Failed(WorkerError),
    Canceled,
}

/// Everything a worker needs to run.
pub(crate) struct WorkerParams {
    pub(crate) record: WorkerRecord,
    pub(crate) payload: Payload,
    pub(crate) work: BoxWork,
    pub(crate) sink: ResultSink,
    pub(crate) parent: mpsc::UnboundedSender<SupervisorMsg>,
    pub(crate) token: CancellationToken,
    pub(crate) limit: Option<Duration>,
    pub(crate) delay: Duration,
    pub(crate) bus: Bus,
}

/// Supervisor-side handle to a running worker.
pub(crate) struct WorkerHandle {
    pub(crate) record: WorkerRecord,
    control: mpsc::UnboundedSender<WorkerCommand>,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Lets a parked worker run its instance again.
    pub(crate) fn resume(&self) {
        let _ = self.control.send(WorkerCommand::Resume);
    }

    /// Asks the worker to stop cooperatively (token + command).
    pub(crate) fn request_stop(&self) {
        self.token.cancel();
        let _ = self.control.send(WorkerCommand::Stop);
    }

    /// Stops the worker and waits for its task to end.
    pub(crate) async fn reclaim(self) {
        self.request_stop();
        if let Err(e) = self.join.await {
            tracing::warn!(task = %self.record.parent, error = %e, "worker task ended abnormally");
        }
    }
}

/// Spawns a worker node.
pub(crate) fn spawn(params: WorkerParams) -> WorkerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let record = params.record.clone();
    let token = params.token.clone();
    let join = tokio::spawn(Worker { p: params }.run(rx));
    WorkerHandle {
        record,
        control: tx,
        token,
        join,
    }
}

struct Worker {
    p: WorkerParams,
}

impl Worker {
    async fn run(mut self, mut control: mpsc::UnboundedReceiver<WorkerCommand>) {
        if !self.p.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.p.delay) => {}
                _ = self.p.token.cancelled() => {
                    self.report(RunOutcome::Canceled);
                    return;
                }
            }
        }

        let mut run: u32 = 0;
        loop {
            run += 1;
            let record = &self.p.record;
            self.p.bus.publish(
                Event::new(EventKind::WorkerStarting)
                    .with_task(&record.parent)
                    .with_incarnation(record.incarnation)
                    .with_run(run),
            );
            let ctx = WorkContext {
                task: record.parent.clone(),
                payload: self.p.payload.clone(),
                incarnation: record.incarnation,
                run,
                token: self.p.token.clone(),
            };

            match run_once(self.p.work.as_mut(), ctx, self.p.limit, &self.p.bus).await {
                Ok(value) => {
                    self.p.sink.deliver(TaskEvent::Result {
                        id: self.p.record.parent.clone(),
                        value,
                    });
                    self.report(RunOutcome::Succeeded);
                    return;
                }
                Err(WorkerError::Canceled) if self.p.token.is_cancelled() => {
                    self.report(RunOutcome::Canceled);
                    return;
                }
                Err(cause) => {
                    self.report(RunOutcome::Failed(cause));
                    match control.recv().await {
                        Some(WorkerCommand::Resume) => continue,
                        Some(WorkerCommand::Stop) | None => return,
                    }
                }
            }
        }
    }

    fn report(&self, outcome: RunOutcome) {
        let _ = self.p.parent.send(SupervisorMsg::Child(WorkerReport {
            child: self.p.record.id,
            incarnation: self.p.record.incarnation,
            outcome,
        }));
    }
}
