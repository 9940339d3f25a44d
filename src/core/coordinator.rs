//! # Coordinator: the root of the supervision tree.
//!
//! The [`Coordinator`] accepts `start_task` / `stop_task` commands and owns one
//! task supervisor per active [`TaskId`]. It applies the coordinator-level
//! [`SupervisionPolicy`](crate::SupervisionPolicy) to supervisors that escalate, and
//! the root policy to its own failures.
//!
//! ## Architecture
//! ```text
//! Coordinator (handle, Clone) ──► mailbox ──► node loop
//!                                               ├─ Start{id}  ─► duplicate? ─► Err(DuplicateTask)
//!                                               │               else sink ◄ Accepted, spawn supervisor
//!                                               ├─ Stop{id}   ─► unknown?   ─► Err(UnknownTask)
//!                                               │               else supervisor ◄ Stop
//!                                               ├─ List       ─► sorted ids
//!                                               ├─ Shutdown   ─► stop all, wait ≤ grace
//!                                               └─ Child(report from supervisor, epoch-checked)
//!                                                    ├─ Finished ─► remove entry
//!                                                    └─ Failed   ─► coordinator policy:
//!                                                         ├─ Resume   ─► supervisor ◄ Resume
//!                                                         ├─ Restart  ─► fresh supervisor (incarnation + 1)
//!                                                         ├─ Stop     ─► sink ◄ FailedPermanently, remove
//!                                                         └─ Escalate ─► coordinator failed:
//!                                                              tear down every task, root policy:
//!                                                              ├─ Resume  ─► keep budgets
//!                                                              ├─ Restart ─► clear budgets; tasks started
//!                                                              │             during the backoff wait it out
//!                                                              └─ Stop / Escalate ─► closed, CoordinatorStopped
//! ```
//!
//! ## Example
//! ```rust
//! use treevisor::{Config, Coordinator, ResultSink, TaskEvent, WorkFn, WorkContext, TaskId, Payload};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coord = Coordinator::builder(Config::default()).build(|_: &TaskId, _: &Payload| {
//!         WorkFn::boxed(|ctx: WorkContext| async move { Ok(ctx.payload.to_uppercase()) })
//!     });
//!
//!     let (sink, mut rx) = ResultSink::channel();
//!     coord.start_task("greet", "hello", sink).await?;
//!
//!     assert!(matches!(rx.recv().await, Some(TaskEvent::Accepted { .. })));
//!     match rx.recv().await {
//!         Some(TaskEvent::Result { value, .. }) => assert_eq!(value, "HELLO"),
//!         other => panic!("unexpected: {other:?}"),
//!     }
//!
//!     coord.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;

use crate::core::config::Config;
use crate::core::builder::CoordinatorBuilder;
use crate::core::registry::{Entry, Registry};
use crate::core::supervision::{Outcome, Supervision};
use crate::core::supervisor::{
    self, ReportKind, SupervisorCommand, SupervisorParams, SupervisorReport,
};
use crate::core::watch::WatchTable;
use crate::error::{CommandError, RuntimeError, WorkerError};
use crate::events::{Bus, Event, EventKind};
use crate::tasks::{Payload, ResultSink, TaskEvent, TaskId, WorkFactory};

type Reply<T> = oneshot::Sender<T>;

/// Messages processed by the coordinator node, in arrival order.
#[derive(Debug)]
pub(crate) enum CoordinatorMsg {
    Start {
        id: TaskId,
        payload: Payload,
        sink: ResultSink,
        reply: Reply<Result<(), CommandError>>,
    },
    Stop {
        id: TaskId,
        reply: Reply<Result<(), CommandError>>,
    },
    List {
        reply: Reply<Vec<TaskId>>,
    },
    Shutdown {
        reply: Reply<Result<(), RuntimeError>>,
    },
    Child(SupervisorReport),
}

/// Terminal state of the coordinator node; `None` while running.
pub(crate) type ClosedState = Option<Result<(), RuntimeError>>;

/// Handle to a running supervision tree.
///
/// Cheap to clone; every clone talks to the same coordinator.
#[derive(Clone)]
pub struct Coordinator {
    tx: mpsc::UnboundedSender<CoordinatorMsg>,
    bus: Bus,
    closed: watch::Receiver<ClosedState>,
}

impl Coordinator {
    /// Returns a builder for a coordinator with the given configuration.
    pub fn builder(cfg: Config) -> CoordinatorBuilder {
        CoordinatorBuilder::new(cfg)
    }

    pub(crate) fn from_parts(
        tx: mpsc::UnboundedSender<CoordinatorMsg>,
        bus: Bus,
        closed: watch::Receiver<ClosedState>,
    ) -> Self {
        Self { tx, bus, closed }
    }

    /// Starts a new task and creates its supervisor.
    ///
    /// The sink receives [`TaskEvent::Accepted`] before anything else for this task.
    ///
    /// # Errors
    /// - [`CommandError::DuplicateTask`] if a task with this id is still active
    ///   (no second supervisor is created).
    /// - [`CommandError::Closed`] if the coordinator is no longer running.
    pub async fn start_task(
        &self,
        id: impl Into<TaskId>,
        payload: impl Into<Payload>,
        sink: ResultSink,
    ) -> Result<(), CommandError> {
        let id = id.into();
        let payload = payload.into();
        self.request(|reply| CoordinatorMsg::Start {
            id,
            payload,
            sink,
            reply,
        })
        .await?
    }

    /// Requests a cooperative stop of a task.
    ///
    /// Returns once the request is accepted; the sink gets [`TaskEvent::Stopped`]
    /// when the subtree is gone.
    ///
    /// # Errors
    /// - [`CommandError::UnknownTask`] if no such task is active (nothing happens).
    /// - [`CommandError::Closed`] if the coordinator is no longer running.
    pub async fn stop_task(&self, id: impl Into<TaskId>) -> Result<(), CommandError> {
        let id = id.into();
        self.request(|reply| CoordinatorMsg::Stop { id, reply })
            .await?
    }

    /// Returns the sorted ids of all active tasks.
    pub async fn list(&self) -> Result<Vec<TaskId>, CommandError> {
        self.request(|reply| CoordinatorMsg::List { reply }).await
    }

    /// Subscribes to runtime events published by every node of the tree.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Stops every task and waits up to [`Config::grace`] for the tree to wind down.
    ///
    /// Calling it on an already closed coordinator returns how it ended.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        match self.request(|reply| CoordinatorMsg::Shutdown { reply }).await {
            Ok(res) => res,
            Err(_) => self.join().await,
        }
    }

    /// Waits until the coordinator stops and returns how it ended.
    pub async fn join(&self) -> Result<(), RuntimeError> {
        let mut rx = self.closed.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(state) => match &*state {
                Some(res) => res.clone(),
                None => Ok(()),
            },
            Err(_) => Err(RuntimeError::CoordinatorStopped {
                cause: WorkerError::Panicked {
                    info: "coordinator task ended without a result".into(),
                },
            }),
        }
    }

    /// Returns true once the coordinator no longer accepts commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.closed.borrow().is_some()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> CoordinatorMsg,
    ) -> Result<T, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| CommandError::Closed)?;
        rx.await.map_err(|_| CommandError::Closed)
    }
}

/// Everything the coordinator node needs.
pub(crate) struct NodeParams {
    pub(crate) cfg: Config,
    pub(crate) factory: Arc<dyn WorkFactory>,
    pub(crate) bus: Bus,
    pub(crate) tx: mpsc::UnboundedSender<CoordinatorMsg>,
    pub(crate) rx: mpsc::UnboundedReceiver<CoordinatorMsg>,
    pub(crate) closed: watch::Sender<ClosedState>,
}

/// Spawns the coordinator node.
pub(crate) fn spawn(p: NodeParams) -> JoinHandle<()> {
    let mut root = Supervision::new(p.cfg.root.clone());
    root.register(());
    let node = CoordinatorNode {
        supervision: Supervision::new(p.cfg.coordinator.clone()),
        root,
        me: p.tx.downgrade(),
        rx: p.rx,
        closed: p.closed,
        factory: p.factory,
        bus: p.bus,
        cfg: p.cfg,
        registry: Registry::default(),
        watch: WatchTable::new(),
        token: CancellationToken::new(),
        next_epoch: 0,
        restarting_until: None,
    };
    drop(p.tx);
    tokio::spawn(node.run())
}

enum Flow {
    Continue,
    Exit(Result<(), RuntimeError>),
}

struct CoordinatorNode {
    cfg: Config,
    /// Weak, so the node ends once every handle and supervisor is gone.
    me: mpsc::WeakUnboundedSender<CoordinatorMsg>,
    rx: mpsc::UnboundedReceiver<CoordinatorMsg>,
    closed: watch::Sender<ClosedState>,
    registry: Registry,
    supervision: Supervision<TaskId>,
    root: Supervision<()>,
    factory: Arc<dyn WorkFactory>,
    watch: WatchTable,
    bus: Bus,
    token: CancellationToken,
    next_epoch: u64,
    /// End of the backoff of a root restart still in progress.
    restarting_until: Option<TokioInstant>,
}

impl CoordinatorNode {
    async fn run(mut self) {
        let result = loop {
            let Some(msg) = self.rx.recv().await else {
                break Ok(());
            };
            let flow = match msg {
                CoordinatorMsg::Start {
                    id,
                    payload,
                    sink,
                    reply,
                } => {
                    let _ = reply.send(self.on_start(id, payload, sink));
                    Flow::Continue
                }
                CoordinatorMsg::Stop { id, reply } => {
                    let _ = reply.send(self.on_stop(id));
                    Flow::Continue
                }
                CoordinatorMsg::List { reply } => {
                    let _ = reply.send(self.registry.list());
                    Flow::Continue
                }
                CoordinatorMsg::Shutdown { reply } => {
                    let res = self.on_shutdown().await;
                    self.close(res.clone());
                    let _ = reply.send(res);
                    return;
                }
                CoordinatorMsg::Child(report) => self.on_child(report).await,
            };
            if let Flow::Exit(res) = flow {
                break res;
            }
        };
        self.close(result);
    }

    fn close(&mut self, result: Result<(), RuntimeError>) {
        self.rx.close();
        self.closed.send_replace(Some(result));
    }

    fn on_start(&mut self, id: TaskId, payload: Payload, sink: ResultSink) -> Result<(), CommandError> {
        if self.registry.contains(&id) {
            let err = CommandError::DuplicateTask { id: id.clone() };
            self.publish(&id, Event::new(EventKind::TaskRejected).with_reason(err.as_label()));
            return Err(err);
        }

        let parent = self.me.upgrade().ok_or(CommandError::Closed)?;

        sink.deliver(TaskEvent::Accepted { id: id.clone() });
        self.publish(&id, Event::new(EventKind::TaskAccepted));
        let delay = self.restart_remaining();
        let entry = self.spawn_supervisor(parent, &id, payload, sink, 1, delay);
        self.supervision.register(id.clone());
        self.registry.insert(id, entry);
        Ok(())
    }

    fn on_stop(&mut self, id: TaskId) -> Result<(), CommandError> {
        let Some(entry) = self.registry.get_mut(&id) else {
            let err = CommandError::UnknownTask { id: id.clone() };
            self.publish(&id, Event::new(EventKind::TaskRejected).with_reason(err.as_label()));
            return Err(err);
        };
        if !entry.stopping {
            entry.stopping = true;
            entry.handle.send(SupervisorCommand::Stop);
            self.publish(&id, Event::new(EventKind::TaskStopRequested));
        }
        Ok(())
    }

    async fn on_child(&mut self, report: SupervisorReport) -> Flow {
        let SupervisorReport { task, epoch, kind } = report;
        let Some(stopping) = self.registry.current(&task, epoch).map(|e| e.stopping) else {
            tracing::debug!(%task, epoch, "ignoring report from discarded supervisor");
            return Flow::Continue;
        };

        match kind {
            ReportKind::Finished(completion) => {
                if let Some(entry) = self.registry.remove(&task) {
                    if let Err(e) = entry.handle.join.await {
                        tracing::warn!(%task, error = %e, "supervisor task ended abnormally");
                    }
                }
                self.supervision.forget(&task);
                self.publish(&task, Event::new(EventKind::TaskRemoved).with_reason(completion.as_label()));
                Flow::Continue
            }
            // The pending Stop finishes the escalated supervisor.
            ReportKind::Failed(_) if stopping => Flow::Continue,
            ReportKind::Failed(cause) => self.on_supervisor_failure(task, cause).await,
        }
    }

    /// Applies the coordinator-level policy to an escalating supervisor.
    async fn on_supervisor_failure(&mut self, task: TaskId, cause: WorkerError) -> Flow {
        let outcome = self.supervision.on_failure(&task, &cause, Instant::now());
        tracing::debug!(%task, directive = %outcome.directive(), cause = %cause, "supervisor failed");

        match outcome {
            Outcome::Resume => {
                if let Some(entry) = self.registry.get_mut(&task) {
                    entry.handle.send(SupervisorCommand::Resume);
                }
                self.publish(&task, Event::new(EventKind::SupervisorResumed).with_reason(cause.to_string()));
                Flow::Continue
            }
            Outcome::Restart { delay } => {
                let Some(old) = self.registry.remove(&task) else {
                    return Flow::Continue;
                };
                old.handle.send(SupervisorCommand::Abandon);
                let incarnation = old.incarnation + 1;
                if let Some(parent) = self.me.upgrade() {
                    let entry =
                        self.spawn_supervisor(parent, &task, old.payload, old.sink, incarnation, delay);
                    self.registry.insert(task.clone(), entry);
                }
                self.publish(
                    &task,
                    Event::new(EventKind::SupervisorRestarted)
                        .with_incarnation(incarnation)
                        .with_delay(delay)
                        .with_reason(cause.to_string()),
                );
                Flow::Continue
            }
            Outcome::Stop { exhausted } => {
                if exhausted {
                    self.publish(&task, Event::new(EventKind::BudgetExhausted));
                }
                if let Some(entry) = self.registry.remove(&task) {
                    entry.handle.send(SupervisorCommand::Abandon);
                    entry.sink.deliver(TaskEvent::FailedPermanently {
                        id: task.clone(),
                        last_cause: cause.clone(),
                    });
                    self.publish(
                        &task,
                        Event::new(EventKind::TaskFailedPermanently).with_reason(cause.to_string()),
                    );
                    self.reap(vec![(task.clone(), entry.handle.join)]).await;
                }
                self.supervision.forget(&task);
                self.publish(&task, Event::new(EventKind::TaskRemoved).with_reason("failed_permanently"));
                Flow::Continue
            }
            Outcome::Escalate => self.on_own_failure(cause).await,
        }
    }

    /// The coordinator itself failed: tear every task down, then ask the root policy.
    async fn on_own_failure(&mut self, cause: WorkerError) -> Flow {
        self.bus
            .publish(Event::new(EventKind::CoordinatorFailed).with_reason(cause.to_string()));

        let mut joins = Vec::new();
        for (id, entry) in self.registry.drain() {
            entry.handle.send(SupervisorCommand::Abandon);
            entry.sink.deliver(TaskEvent::FailedPermanently {
                id: id.clone(),
                last_cause: cause.clone(),
            });
            self.publish(&id, Event::new(EventKind::TaskFailedPermanently).with_reason(cause.to_string()));
            joins.push((id, entry.handle.join));
        }
        let stuck = self.reap(joins).await;
        if !stuck.is_empty() {
            tracing::warn!(?stuck, "task subtrees outlived the grace period during coordinator failure");
        }

        match self.root.on_failure(&(), &cause, Instant::now()) {
            Outcome::Resume => {
                self.bus.publish(Event::new(EventKind::CoordinatorResumed));
                Flow::Continue
            }
            Outcome::Restart { delay } => {
                self.supervision.reset();
                self.restarting_until = (!delay.is_zero()).then(|| TokioInstant::now() + delay);
                self.bus
                    .publish(Event::new(EventKind::CoordinatorRestarted).with_delay(delay));
                Flow::Continue
            }
            Outcome::Stop { .. } | Outcome::Escalate => {
                self.bus
                    .publish(Event::new(EventKind::CoordinatorStopped).with_reason(cause.to_string()));
                Flow::Exit(Err(RuntimeError::CoordinatorStopped { cause }))
            }
        }
    }

    async fn on_shutdown(&mut self) -> Result<(), RuntimeError> {
        self.bus.publish(Event::new(EventKind::ShutdownRequested));

        let mut joins = Vec::new();
        for (id, entry) in self.registry.drain() {
            if !entry.stopping {
                entry.handle.send(SupervisorCommand::Stop);
            }
            joins.push((id, entry.handle.join));
        }

        let stuck = self.reap(joins).await;
        if stuck.is_empty() {
            self.bus.publish(Event::new(EventKind::AllStoppedWithin));
            Ok(())
        } else {
            let names: Vec<&str> = stuck.iter().map(TaskId::as_str).collect();
            self.bus
                .publish(Event::new(EventKind::GraceExceeded).with_reason(names.join(",")));
            Err(RuntimeError::GraceExceeded {
                grace: self.cfg.grace,
                stuck,
            })
        }
    }

    /// Waits up to `grace` for supervisors to end; returns (and cancels) the stragglers.
    async fn reap(&mut self, mut joins: Vec<(TaskId, JoinHandle<()>)>) -> Vec<TaskId> {
        let grace = self.cfg.grace;
        let done = async {
            for (_, join) in joins.iter_mut() {
                let _ = join.await;
            }
        };
        if tokio::time::timeout(grace, done).await.is_ok() {
            return Vec::new();
        }

        let stuck: Vec<TaskId> = joins
            .iter()
            .filter(|(_, join)| !join.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        // Cancel whatever work still runs; a fresh token serves later tasks.
        std::mem::take(&mut self.token).cancel();
        for (_, join) in &joins {
            join.abort();
        }
        stuck
    }

    /// Time left of a root restart backoff; tasks accepted meanwhile start after it.
    fn restart_remaining(&mut self) -> Duration {
        let Some(until) = self.restarting_until else {
            return Duration::ZERO;
        };
        let left = until.saturating_duration_since(TokioInstant::now());
        if left.is_zero() {
            self.restarting_until = None;
        }
        left
    }

    fn spawn_supervisor(
        &mut self,
        parent: mpsc::UnboundedSender<CoordinatorMsg>,
        id: &TaskId,
        payload: Payload,
        sink: ResultSink,
        incarnation: u64,
        start_delay: Duration,
    ) -> Entry {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let handle = supervisor::spawn(SupervisorParams {
            task: id.clone(),
            payload: payload.clone(),
            sink: sink.clone(),
            epoch,
            incarnation,
            start_delay,
            policy: self.cfg.task.clone(),
            limit: self.cfg.run_timeout(),
            factory: Arc::clone(&self.factory),
            parent,
            watch: self.watch.clone(),
            bus: self.bus.clone(),
            token: self.token.child_token(),
        });
        Entry {
            payload,
            sink,
            epoch,
            incarnation,
            handle,
            stopping: false,
        }
    }

    fn publish(&self, task: &TaskId, ev: Event) {
        self.bus.publish(ev.with_task(task));
    }
}
