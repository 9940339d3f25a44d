//! # Task supervisor: owns the worker serving one task.
//!
//! One `TaskSupervisor` is created by the coordinator per accepted task. It creates
//! the worker, watches the task's result sink, applies the task-level
//! [`SupervisionPolicy`](crate::SupervisionPolicy) to worker failures and reports
//! its own completion or failure to the coordinator.
//!
//! ## Per-child state machine
//! ```text
//! Active ──failure──► decide(cause) + budget
//!   ▲                   ├─ Resume   ─► same instance runs again        (Active)
//!   └─────────────────  ├─ Restart  ─► old reclaimed, incarnation + 1  (Active)
//!                       ├─ Stop     ─► reclaimed, sink ◄ FailedPermanently, supervisor finishes
//!                       └─ Escalate ─► children reclaimed, coordinator ◄ Failed, park
//! ```
//!
//! ## Supervisor phases
//! ```text
//! Active ──Stop / sink lost──► Stopping ──last child reports──► finished
//! Active ──Escalate─────────► Escalated ──Resume──► Active (budgets kept, workers respawned)
//!                                        ──Stop────► finished (sink ◄ Stopped)
//!                                        ──Abandon─► exit, nothing reported
//! ```
//!
//! ## Rules
//! - All state is touched only from this node's loop; children and the sink
//!   watch talk to it through its mailbox.
//! - Reports from a discarded incarnation are ignored.
//! - A worker is only awaited (`reclaim`) after it has reported, so the loop never
//!   blocks on work that is still running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::coordinator::CoordinatorMsg;
use crate::core::supervision::{Outcome, Supervision};
use crate::core::watch::{WatchId, WatchTable};
use crate::core::worker::{
    self, ChildId, RunOutcome, WorkerHandle, WorkerParams, WorkerRecord, WorkerReport,
};
use crate::error::WorkerError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::SupervisionPolicy;
use crate::tasks::{Payload, ResultSink, TaskEvent, TaskId, WorkFactory};

/// Messages processed by a task supervisor, in arrival order.
#[derive(Debug)]
pub(crate) enum SupervisorMsg {
    Command(SupervisorCommand),
    Child(WorkerReport),
    SinkLost { tag: Arc<str> },
}

/// Coordinator → supervisor control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SupervisorCommand {
    /// Cooperative stop requested by the command issuer.
    Stop,
    /// Parent is tearing this subtree down; stop children, report nothing.
    Abandon,
    /// Parent swallowed this supervisor's escalation.
    Resume,
}

/// Supervisor → coordinator report.
#[derive(Debug)]
pub(crate) struct SupervisorReport {
    pub(crate) task: TaskId,
    pub(crate) epoch: u64,
    pub(crate) kind: ReportKind,
}

#[derive(Debug)]
pub(crate) enum ReportKind {
    Finished(Completion),
    Failed(WorkerError),
}

/// How a supervisor ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    Succeeded,
    FailedPermanently(WorkerError),
    Stopped,
    SinkLost,
    Abandoned,
}

impl Completion {
    pub(crate) fn as_label(&self) -> &'static str {
        match self {
            Completion::Succeeded => "succeeded",
            Completion::FailedPermanently(_) => "failed_permanently",
            Completion::Stopped => "stopped",
            Completion::SinkLost => "sink_lost",
            Completion::Abandoned => "abandoned",
        }
    }
}

/// Everything needed to create a task supervisor.
pub(crate) struct SupervisorParams {
    pub(crate) task: TaskId,
    pub(crate) payload: Payload,
    pub(crate) sink: ResultSink,
    /// Coordinator-wide unique id of this supervisor instance.
    pub(crate) epoch: u64,
    /// Per-task instance number (1-based, +1 per coordinator-level restart).
    pub(crate) incarnation: u64,
    /// Restart backoff imposed by the coordinator; spent by the first worker.
    pub(crate) start_delay: Duration,
    pub(crate) policy: SupervisionPolicy,
    pub(crate) limit: Option<Duration>,
    pub(crate) factory: Arc<dyn WorkFactory>,
    pub(crate) parent: mpsc::UnboundedSender<CoordinatorMsg>,
    pub(crate) watch: WatchTable,
    pub(crate) bus: Bus,
    pub(crate) token: CancellationToken,
}

/// Coordinator-side handle to a task supervisor.
pub(crate) struct SupervisorHandle {
    tx: mpsc::UnboundedSender<SupervisorMsg>,
    pub(crate) join: JoinHandle<()>,
}

impl SupervisorHandle {
    pub(crate) fn send(&self, cmd: SupervisorCommand) {
        let _ = self.tx.send(SupervisorMsg::Command(cmd));
    }

    /// Handle to nothing, for tables that never talk to their supervisors.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            tx,
            join: tokio::spawn(async {}),
        }
    }
}

/// Spawns a task supervisor, which immediately creates its worker.
pub(crate) fn spawn(p: SupervisorParams) -> SupervisorHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let node = TaskSupervisor {
        supervision: Supervision::new(p.policy.clone()),
        p,
        tx: tx.clone(),
        rx,
        children: HashMap::new(),
        abandoned: Vec::new(),
        next_child: 0,
        watch_id: None,
        phase: Phase::Active,
    };
    SupervisorHandle {
        tx,
        join: tokio::spawn(node.run()),
    }
}

#[derive(Debug)]
enum Phase {
    Active,
    Stopping(Completion),
    Escalated,
}

enum Flow {
    Continue,
    Exit,
}

struct TaskSupervisor {
    p: SupervisorParams,
    tx: mpsc::UnboundedSender<SupervisorMsg>,
    rx: mpsc::UnboundedReceiver<SupervisorMsg>,
    supervision: Supervision<ChildId>,
    children: HashMap<ChildId, WorkerHandle>,
    /// Records of children torn down by an escalation, respawned on `Resume`.
    abandoned: Vec<WorkerRecord>,
    next_child: u32,
    watch_id: Option<WatchId>,
    phase: Phase,
}

impl TaskSupervisor {
    async fn run(mut self) {
        let tag: Arc<str> = (&self.p.task).into();
        let id = self
            .p
            .watch
            .watch(&self.p.sink, tag, self.tx.clone(), |tag| {
                SupervisorMsg::SinkLost { tag }
            })
            .await;
        self.watch_id = Some(id);

        self.publish(Event::new(EventKind::SupervisorStarted).with_incarnation(self.p.incarnation));
        self.create_child(self.p.start_delay);

        while let Some(msg) = self.rx.recv().await {
            let flow = match msg {
                SupervisorMsg::Command(cmd) => self.on_command(cmd).await,
                SupervisorMsg::Child(report) => self.on_child_report(report).await,
                SupervisorMsg::SinkLost { tag } => self.on_sink_lost(tag).await,
            };
            if let Flow::Exit = flow {
                break;
            }
        }

        if let Some(id) = self.watch_id.take() {
            self.p.watch.unwatch(self.p.sink.id(), id).await;
        }
    }

    /// Instantiates a new worker under this supervisor.
    fn create_child(&mut self, delay: Duration) -> WorkerRecord {
        let id = ChildId(self.next_child);
        self.next_child += 1;
        self.supervision.register(id);
        self.spawn_incarnation(id, 1, delay)
    }

    fn spawn_incarnation(&mut self, id: ChildId, incarnation: u64, delay: Duration) -> WorkerRecord {
        let record = WorkerRecord {
            id,
            parent: self.p.task.clone(),
            incarnation,
            watching: Some(self.p.sink.id()),
        };
        let work = self.p.factory.create(&self.p.task, &self.p.payload);
        let handle = worker::spawn(WorkerParams {
            record: record.clone(),
            payload: self.p.payload.clone(),
            work,
            sink: self.p.sink.clone(),
            parent: self.tx.clone(),
            token: self.p.token.child_token(),
            limit: self.p.limit,
            delay,
            bus: self.p.bus.clone(),
        });
        self.children.insert(id, handle);
        record
    }

    async fn on_command(&mut self, cmd: SupervisorCommand) -> Flow {
        let escalated = matches!(self.phase, Phase::Escalated);
        match cmd {
            SupervisorCommand::Resume if escalated => {
                self.phase = Phase::Active;
                if self.p.sink.is_closed() {
                    return self.finish(Completion::SinkLost);
                }
                for record in std::mem::take(&mut self.abandoned) {
                    self.spawn_incarnation(record.id, record.incarnation + 1, Duration::ZERO);
                }
                Flow::Continue
            }
            SupervisorCommand::Resume => Flow::Continue,

            SupervisorCommand::Abandon if escalated => self.finish(Completion::Abandoned),
            SupervisorCommand::Abandon => self.begin_stop(Completion::Abandoned),

            SupervisorCommand::Stop if escalated => self.finish(Completion::Stopped),
            SupervisorCommand::Stop => match self.phase {
                Phase::Active => self.begin_stop(Completion::Stopped),
                _ => Flow::Continue,
            },
        }
    }

    async fn on_sink_lost(&mut self, tag: Arc<str>) -> Flow {
        tracing::debug!(task = %self.p.task, %tag, "watched sink lost");
        match self.phase {
            Phase::Active => {
                self.publish(Event::new(EventKind::SinkLost));
                self.begin_stop(Completion::SinkLost)
            }
            // Escalated: checked on Resume. Stopping: already winding down.
            _ => Flow::Continue,
        }
    }

    async fn on_child_report(&mut self, report: WorkerReport) -> Flow {
        let current = self
            .children
            .get(&report.child)
            .map(|h| h.record.incarnation);
        if current != Some(report.incarnation) {
            tracing::debug!(
                task = %self.p.task,
                incarnation = report.incarnation,
                "ignoring report from discarded worker"
            );
            return Flow::Continue;
        }

        if let Phase::Stopping(_) = self.phase {
            self.reclaim(report.child).await;
            if self.children.is_empty() {
                let completion = match std::mem::replace(&mut self.phase, Phase::Active) {
                    Phase::Stopping(c) => c,
                    _ => Completion::Stopped,
                };
                return self.finish(completion);
            }
            return Flow::Continue;
        }

        match report.outcome {
            RunOutcome::Succeeded => {
                self.publish(
                    Event::new(EventKind::WorkerSucceeded).with_incarnation(report.incarnation),
                );
                self.on_child_terminal_stop(report.child, Completion::Succeeded)
                    .await
            }
            RunOutcome::Canceled => {
                self.on_child_terminal_stop(report.child, Completion::Stopped)
                    .await
            }
            RunOutcome::Failed(cause) => self.on_child_failure(report.child, report.incarnation, cause).await,
        }
    }

    /// Applies the task-level policy to a worker failure.
    async fn on_child_failure(&mut self, child: ChildId, incarnation: u64, cause: WorkerError) -> Flow {
        let outcome = self.supervision.on_failure(&child, &cause, Instant::now());
        self.publish(
            Event::new(EventKind::WorkerFailed)
                .with_incarnation(incarnation)
                .with_directive(outcome.directive())
                .with_reason(cause.to_string()),
        );

        match outcome {
            Outcome::Resume => {
                if let Some(h) = self.children.get(&child) {
                    h.resume();
                }
                self.publish(Event::new(EventKind::WorkerResumed).with_incarnation(incarnation));
                Flow::Continue
            }
            Outcome::Restart { delay } => {
                self.reclaim(child).await;
                let record = self.spawn_incarnation(child, incarnation + 1, delay);
                self.publish(
                    Event::new(EventKind::WorkerRestarted)
                        .with_incarnation(record.incarnation)
                        .with_delay(delay),
                );
                Flow::Continue
            }
            Outcome::Stop { exhausted } => {
                if exhausted {
                    self.publish(Event::new(EventKind::BudgetExhausted).with_incarnation(incarnation));
                }
                self.p.sink.deliver(TaskEvent::FailedPermanently {
                    id: self.p.task.clone(),
                    last_cause: cause.clone(),
                });
                self.publish(Event::new(EventKind::TaskFailedPermanently).with_reason(cause.to_string()));
                self.on_child_terminal_stop(child, Completion::FailedPermanently(cause))
                    .await
            }
            Outcome::Escalate => {
                let ids: Vec<ChildId> = self.children.keys().copied().collect();
                for id in ids {
                    if let Some(record) = self.reclaim(id).await {
                        self.abandoned.push(record);
                    }
                }
                self.phase = Phase::Escalated;
                self.publish(Event::new(EventKind::SupervisorEscalated).with_reason(cause.to_string()));
                self.report(ReportKind::Failed(WorkerError::Escalated {
                    task: self.p.task.clone(),
                    cause: Box::new(cause),
                }));
                Flow::Continue
            }
        }
    }

    /// Removes a finished child; a single-task supervisor with no children left finishes.
    async fn on_child_terminal_stop(&mut self, child: ChildId, completion: Completion) -> Flow {
        self.reclaim(child).await;
        self.supervision.forget(&child);
        if self.children.is_empty() {
            self.finish(completion)
        } else {
            Flow::Continue
        }
    }

    /// Asks every child to stop; finishes at once if there are none.
    fn begin_stop(&mut self, completion: Completion) -> Flow {
        if self.children.is_empty() {
            return self.finish(completion);
        }
        for h in self.children.values() {
            h.request_stop();
        }
        self.phase = Phase::Stopping(completion);
        Flow::Continue
    }

    /// Stops and awaits one child; only called once the child has reported.
    async fn reclaim(&mut self, child: ChildId) -> Option<WorkerRecord> {
        let handle = self.children.remove(&child)?;
        let record = handle.record.clone();
        handle.reclaim().await;
        tracing::debug!(
            task = %record.parent,
            incarnation = record.incarnation,
            sink = ?record.watching,
            "worker reclaimed"
        );
        self.publish(Event::new(EventKind::WorkerStopped).with_incarnation(record.incarnation));
        Some(record)
    }

    fn finish(&mut self, completion: Completion) -> Flow {
        if completion == Completion::Stopped {
            self.p.sink.deliver(TaskEvent::Stopped {
                id: self.p.task.clone(),
            });
        }
        self.publish(Event::new(EventKind::SupervisorStopped).with_reason(completion.as_label()));
        if completion != Completion::Abandoned {
            self.report(ReportKind::Finished(completion));
        }
        Flow::Exit
    }

    fn report(&self, kind: ReportKind) {
        let _ = self.p.parent.send(CoordinatorMsg::Child(SupervisorReport {
            task: self.p.task.clone(),
            epoch: self.p.epoch,
            kind,
        }));
    }

    fn publish(&self, ev: Event) {
        self.p.bus.publish(ev.with_task(&self.p.task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::{Decider, Directive};
    use crate::tasks::{BoxWork, WorkContext, WorkFn};

    struct Harness {
        handle: SupervisorHandle,
        parent: mpsc::UnboundedReceiver<CoordinatorMsg>,
        sink: mpsc::UnboundedReceiver<TaskEvent>,
        bus: tokio::sync::broadcast::Receiver<Event>,
    }

    fn start(policy: SupervisionPolicy, factory: impl WorkFactory) -> Harness {
        let (parent_tx, parent) = mpsc::unbounded_channel();
        let (sink, sink_rx) = ResultSink::channel();
        let bus = Bus::new(256);
        let events = bus.subscribe();
        let handle = spawn(SupervisorParams {
            task: TaskId::from("t"),
            payload: "p".into(),
            sink,
            epoch: 1,
            incarnation: 1,
            start_delay: Duration::ZERO,
            policy,
            limit: None,
            factory: Arc::new(factory),
            parent: parent_tx,
            watch: WatchTable::new(),
            bus,
            token: CancellationToken::new(),
        });
        Harness {
            handle,
            parent,
            sink: sink_rx,
            bus: events,
        }
    }

    async fn next_report(rx: &mut mpsc::UnboundedReceiver<CoordinatorMsg>) -> SupervisorReport {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match msg {
            CoordinatorMsg::Child(report) => report,
            other => panic!("unexpected message: {other:?}"),
        }
    }

    fn until_cancelled() -> BoxWork {
        WorkFn::boxed(|ctx: WorkContext| async move {
            ctx.token.cancelled().await;
            Err(WorkerError::Canceled)
        })
    }

    #[tokio::test]
    async fn test_reports_from_other_incarnations_are_ignored() {
        let policy = SupervisionPolicy::new(0, Duration::from_secs(30), Decider::new(Directive::Stop));
        let mut h = start(policy, |_: &TaskId, _: &Payload| until_cancelled());

        h.handle
            .tx
            .send(SupervisorMsg::Child(WorkerReport {
                child: ChildId(0),
                incarnation: 9,
                outcome: RunOutcome::Failed(WorkerError::fail("stale")),
            }))
            .unwrap();
        h.handle.send(SupervisorCommand::Stop);

        let report = next_report(&mut h.parent).await;
        assert!(matches!(report.kind, ReportKind::Finished(Completion::Stopped)));
        assert_eq!(h.sink.recv().await, Some(TaskEvent::Stopped { id: "t".into() }));
        while let Ok(ev) = h.bus.try_recv() {
            assert_ne!(ev.kind, EventKind::WorkerFailed, "stale report was applied");
        }
    }

    #[tokio::test]
    async fn test_stop_while_escalated_finishes_stopped() {
        let policy = SupervisionPolicy::new(0, Duration::from_secs(30), Decider::new(Directive::Escalate));
        let mut h = start(policy, |_: &TaskId, _: &Payload| -> BoxWork {
            WorkFn::boxed(|_ctx: WorkContext| async move { Err(WorkerError::fail("boom")) })
        });

        let report = next_report(&mut h.parent).await;
        match report.kind {
            ReportKind::Failed(cause) => assert_eq!(cause.root_cause(), &WorkerError::fail("boom")),
            other => panic!("unexpected report: {other:?}"),
        }

        h.handle.send(SupervisorCommand::Stop);
        let report = next_report(&mut h.parent).await;
        assert!(matches!(report.kind, ReportKind::Finished(Completion::Stopped)));
        assert_eq!(h.sink.recv().await, Some(TaskEvent::Stopped { id: "t".into() }));
    }
}
