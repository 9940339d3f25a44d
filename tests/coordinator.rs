use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use treevisor::{
    BackoffPolicy, BoxWork, CommandError, Config, Coordinator, Decider, Directive, Event,
    EventKind, JitterPolicy, Payload, ResultSink, RuntimeError, SupervisionPolicy, TaskEvent,
    TaskId, WorkContext, WorkFn, WorkerError,
};

const WAIT: Duration = Duration::from_secs(5);

async fn next(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> TaskEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for sink event")
        .expect("sink closed")
}

/// Waits for the first event of `kind` about `task` and returns it.
async fn next_event(rx: &mut broadcast::Receiver<Event>, task: &str, kind: EventKind) -> Event {
    tokio::time::timeout(WAIT, async {
        loop {
            let ev = rx.recv().await.expect("bus closed");
            if ev.kind == kind && ev.task.as_deref() == Some(task) {
                return ev;
            }
        }
    })
    .await
    .expect("timed out waiting for bus event")
}

/// Waits for the first tree-wide event of `kind`.
async fn next_tree_event(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
    tokio::time::timeout(WAIT, async {
        loop {
            let ev = rx.recv().await.expect("bus closed");
            if ev.kind == kind {
                return ev;
            }
        }
    })
    .await
    .expect("timed out waiting for bus event")
}

async fn wait_until_idle(coord: &Coordinator) {
    tokio::time::timeout(WAIT, async {
        while !coord.list().await.expect("coordinator closed").is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("tasks still listed");
}

fn until_cancelled() -> BoxWork {
    WorkFn::boxed(|ctx: WorkContext| async move {
        ctx.token.cancelled().await;
        Err(WorkerError::Canceled)
    })
}

fn escalating(coordinator: Decider) -> Config {
    let mut cfg = Config::default();
    cfg.task = SupervisionPolicy::new(1, Duration::from_secs(30), Decider::new(Directive::Escalate));
    cfg.coordinator = SupervisionPolicy::new(5, Duration::from_secs(30), coordinator);
    cfg
}

/// Tasks named `boom*` always fail; the rest echo their payload.
fn booms(id: &TaskId, _: &Payload) -> BoxWork {
    let fails = id.as_str().starts_with("boom");
    WorkFn::boxed(move |ctx: WorkContext| async move {
        if fails {
            return Err(WorkerError::fail("boom"));
        }
        Ok(ctx.payload.to_string())
    })
}

async fn assert_fails_permanently(coord: &Coordinator, id: &str) {
    let (sink, mut rx) = ResultSink::channel();
    coord.start_task(id, "x", sink).await.unwrap();
    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: id.into() });
    match next(&mut rx).await {
        TaskEvent::FailedPermanently { last_cause, .. } => {
            assert!(matches!(last_cause, WorkerError::Escalated { .. }));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

async fn assert_echoes(coord: &Coordinator, id: &str) {
    let (sink, mut rx) = ResultSink::channel();
    coord.start_task(id, "echo", sink).await.unwrap();
    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: id.into() });
    assert_eq!(
        next(&mut rx).await,
        TaskEvent::Result {
            id: id.into(),
            value: "echo".into()
        }
    );
}

/// Fails on its first instance, succeeds on every later one.
fn fails_first_instance(instances: Arc<AtomicU32>, seen: Arc<Mutex<Vec<u64>>>) -> impl Fn(&TaskId, &Payload) -> BoxWork + Send + Sync + 'static {
    move |_: &TaskId, _: &Payload| -> BoxWork {
        let n = instances.fetch_add(1, Ordering::SeqCst);
        let seen = Arc::clone(&seen);
        WorkFn::boxed(move |ctx: WorkContext| {
            seen.lock().unwrap().push(ctx.incarnation);
            async move {
                if n == 0 {
                    Err(WorkerError::fail("first instance"))
                } else {
                    Ok("recovered".to_string())
                }
            }
        })
    }
}

#[tokio::test]
async fn test_resume_then_restart_then_budget_exhausted() {
    let runs: Arc<Mutex<Vec<(u64, u32)>>> = Arc::default();
    let log = Arc::clone(&runs);
    let coord = Coordinator::builder(Config::default()).build(move |_: &TaskId, _: &Payload| -> BoxWork {
        let log = Arc::clone(&log);
        WorkFn::boxed(move |ctx: WorkContext| {
            log.lock().unwrap().push((ctx.incarnation, ctx.run));
            async move {
                match (ctx.incarnation, ctx.run) {
                    (1, 1) => Err(WorkerError::ignorable("overflow")),
                    (1, _) => Err(WorkerError::fail("io 1")),
                    _ => Err(WorkerError::fail("io 2")),
                }
            }
        })
    });

    let (sink, mut rx) = ResultSink::channel();
    coord.start_task("t", "file.log", sink).await.unwrap();

    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: "t".into() });
    assert_eq!(
        next(&mut rx).await,
        TaskEvent::FailedPermanently {
            id: "t".into(),
            last_cause: WorkerError::fail("io 2"),
        }
    );
    // Resume kept incarnation 1 and ran it again; Restart created incarnation 2.
    assert_eq!(*runs.lock().unwrap(), vec![(1, 1), (1, 2), (2, 1)]);
    wait_until_idle(&coord).await;
}

#[tokio::test]
async fn test_result_is_delivered_and_id_becomes_free() {
    let coord = Coordinator::builder(Config::default()).build(|_: &TaskId, _: &Payload| {
        WorkFn::boxed(|ctx: WorkContext| async move { Ok(ctx.payload.to_uppercase()) })
    });

    let (sink, mut rx) = ResultSink::channel();
    coord.start_task("a", "hello", sink).await.unwrap();
    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: "a".into() });
    assert_eq!(
        next(&mut rx).await,
        TaskEvent::Result {
            id: "a".into(),
            value: "HELLO".into()
        }
    );
    wait_until_idle(&coord).await;

    let (sink, mut rx) = ResultSink::channel();
    coord.start_task("a", "again", sink).await.unwrap();
    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: "a".into() });
}

#[tokio::test]
async fn test_duplicate_start_is_rejected() {
    let created = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&created);
    let coord = Coordinator::builder(Config::default()).build(move |_: &TaskId, _: &Payload| {
        counter.fetch_add(1, Ordering::SeqCst);
        until_cancelled()
    });

    let (sink, _rx) = ResultSink::channel();
    coord.start_task("a", "x", sink).await.unwrap();
    let (sink2, mut rx2) = ResultSink::channel();
    let err = coord.start_task("a", "y", sink2).await.unwrap_err();

    assert_eq!(err, CommandError::DuplicateTask { id: "a".into() });
    assert_eq!(coord.list().await.unwrap(), vec![TaskId::from("a")]);
    assert!(rx2.try_recv().is_err());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_stop_has_no_side_effect() {
    let coord = Coordinator::builder(Config::default()).build(|_: &TaskId, _: &Payload| until_cancelled());

    let (sink, mut rx) = ResultSink::channel();
    coord.start_task("a", "x", sink).await.unwrap();
    let err = coord.stop_task("nope").await.unwrap_err();

    assert_eq!(err, CommandError::UnknownTask { id: "nope".into() });
    assert_eq!(coord.list().await.unwrap(), vec![TaskId::from("a")]);
    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: "a".into() });
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_cooperative_stop_notifies_sink() {
    let coord = Coordinator::builder(Config::default()).build(|_: &TaskId, _: &Payload| until_cancelled());

    let (sink, mut rx) = ResultSink::channel();
    coord.start_task("a", "x", sink).await.unwrap();
    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: "a".into() });

    coord.stop_task("a").await.unwrap();
    assert_eq!(next(&mut rx).await, TaskEvent::Stopped { id: "a".into() });
    wait_until_idle(&coord).await;
}

#[tokio::test]
async fn test_sink_loss_tears_the_task_down() {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    let coord = Coordinator::builder(Config::default()).build(move |_: &TaskId, _: &Payload| {
        let flag = Arc::clone(&flag);
        WorkFn::boxed(move |ctx: WorkContext| {
            let flag = Arc::clone(&flag);
            async move {
                ctx.token.cancelled().await;
                flag.store(true, Ordering::SeqCst);
                Err(WorkerError::Canceled)
            }
        })
    });
    let mut bus = coord.subscribe();

    let (sink, rx) = ResultSink::channel();
    coord.start_task("a", "x", sink).await.unwrap();
    drop(rx);

    next_event(&mut bus, "a", EventKind::SinkLost).await;
    wait_until_idle(&coord).await;
    assert!(cancelled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_escalation_stops_children_before_parent_acts() {
    let instances = Arc::new(AtomicU32::new(0));
    let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
    let coord = Coordinator::builder(escalating(Decider::new(Directive::Restart)))
        .build(fails_first_instance(Arc::clone(&instances), Arc::clone(&seen)));
    let mut bus = coord.subscribe();

    let (sink, mut rx) = ResultSink::channel();
    coord.start_task("a", "x", sink).await.unwrap();
    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: "a".into() });
    assert_eq!(
        next(&mut rx).await,
        TaskEvent::Result {
            id: "a".into(),
            value: "recovered".into()
        }
    );

    let stopped = next_event(&mut bus, "a", EventKind::WorkerStopped).await;
    let escalated = next_event(&mut bus, "a", EventKind::SupervisorEscalated).await;
    let restarted = next_event(&mut bus, "a", EventKind::SupervisorRestarted).await;
    assert!(stopped.seq < escalated.seq);
    assert!(escalated.seq < restarted.seq);
    assert_eq!(restarted.incarnation, Some(2));
    // A fresh supervisor starts its worker from incarnation 1 again.
    assert_eq!(*seen.lock().unwrap(), vec![1, 1]);
}

#[tokio::test]
async fn test_resumed_supervisor_recreates_its_worker() {
    let instances = Arc::new(AtomicU32::new(0));
    let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
    let coord = Coordinator::builder(escalating(Decider::new(Directive::Resume)))
        .build(fails_first_instance(Arc::clone(&instances), Arc::clone(&seen)));
    let mut bus = coord.subscribe();

    let (sink, mut rx) = ResultSink::channel();
    coord.start_task("a", "x", sink).await.unwrap();
    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: "a".into() });
    assert!(matches!(next(&mut rx).await, TaskEvent::Result { .. }));

    next_event(&mut bus, "a", EventKind::SupervisorResumed).await;
    // Same supervisor, so the worker keeps counting incarnations.
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_coordinator_stop_fails_task_permanently() {
    let coord = Coordinator::builder(escalating(Decider::new(Directive::Stop))).build(
        |_: &TaskId, _: &Payload| WorkFn::boxed(|_ctx: WorkContext| async move { Err(WorkerError::fail("boom")) }),
    );

    let (sink, mut rx) = ResultSink::channel();
    coord.start_task("a", "x", sink).await.unwrap();
    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: "a".into() });
    match next(&mut rx).await {
        TaskEvent::FailedPermanently { id, last_cause } => {
            assert_eq!(id, TaskId::from("a"));
            assert!(matches!(last_cause, WorkerError::Escalated { .. }));
            assert_eq!(last_cause.root_cause(), &WorkerError::fail("boom"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    wait_until_idle(&coord).await;
    assert!(!coord.is_closed());
}

#[tokio::test]
async fn test_root_stop_closes_the_coordinator() {
    let mut cfg = escalating(Decider::new(Directive::Escalate));
    cfg.root = SupervisionPolicy::new(0, Duration::from_secs(30), Decider::new(Directive::Stop));
    let coord = Coordinator::builder(cfg).build(|id: &TaskId, _: &Payload| {
        if id.as_str() == "b" {
            return until_cancelled();
        }
        WorkFn::boxed(|_ctx: WorkContext| async move { Err(WorkerError::fail("boom")) })
    });

    let (bystander, mut bystander_rx) = ResultSink::channel();
    coord.start_task("b", "x", bystander).await.unwrap();
    let (sink, mut rx) = ResultSink::channel();
    coord.start_task("a", "x", sink).await.unwrap();

    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: "a".into() });
    assert!(matches!(next(&mut rx).await, TaskEvent::FailedPermanently { .. }));
    assert_eq!(next(&mut bystander_rx).await, TaskEvent::Accepted { id: "b".into() });
    assert!(matches!(
        next(&mut bystander_rx).await,
        TaskEvent::FailedPermanently { .. }
    ));

    let err = tokio::time::timeout(WAIT, coord.join()).await.unwrap().unwrap_err();
    assert!(matches!(err, RuntimeError::CoordinatorStopped { .. }));
    assert!(coord.is_closed());

    let (sink, _rx) = ResultSink::channel();
    assert_eq!(coord.start_task("c", "x", sink).await, Err(CommandError::Closed));
    assert_eq!(coord.stop_task("a").await, Err(CommandError::Closed));
}

#[tokio::test]
async fn test_shutdown_stops_everything_within_grace() {
    let coord = Coordinator::builder(Config::default()).build(|_: &TaskId, _: &Payload| until_cancelled());

    let (sink_a, mut rx_a) = ResultSink::channel();
    let (sink_b, mut rx_b) = ResultSink::channel();
    coord.start_task("a", "x", sink_a).await.unwrap();
    coord.start_task("b", "y", sink_b).await.unwrap();
    assert_eq!(coord.list().await.unwrap(), vec![TaskId::from("a"), TaskId::from("b")]);

    coord.shutdown().await.unwrap();

    assert_eq!(next(&mut rx_a).await, TaskEvent::Accepted { id: "a".into() });
    assert_eq!(next(&mut rx_a).await, TaskEvent::Stopped { id: "a".into() });
    assert_eq!(next(&mut rx_b).await, TaskEvent::Accepted { id: "b".into() });
    assert_eq!(next(&mut rx_b).await, TaskEvent::Stopped { id: "b".into() });

    let (sink, _rx) = ResultSink::channel();
    assert_eq!(coord.start_task("c", "x", sink).await, Err(CommandError::Closed));
    assert!(coord.shutdown().await.is_ok());
}

#[tokio::test]
async fn test_shutdown_reports_stuck_tasks() {
    let mut cfg = Config::default();
    cfg.grace = Duration::from_millis(50);
    let coord = Coordinator::builder(cfg).build(|_: &TaskId, _: &Payload| {
        WorkFn::boxed(|_ctx: WorkContext| async move {
            std::future::pending::<()>().await;
            Ok(String::new())
        })
    });

    let (sink, _rx) = ResultSink::channel();
    coord.start_task("stuck", "x", sink).await.unwrap();

    let err = coord.shutdown().await.unwrap_err();
    assert_eq!(
        err,
        RuntimeError::GraceExceeded {
            grace: Duration::from_millis(50),
            stuck: vec![TaskId::from("stuck")],
        }
    );
}

#[tokio::test]
async fn test_timeout_is_classified_like_any_failure() {
    let mut cfg = Config::default();
    cfg.worker_timeout = Duration::from_millis(20);
    cfg.task = SupervisionPolicy::new(0, Duration::from_secs(30), Decider::default());
    let coord = Coordinator::builder(cfg).build(|_: &TaskId, _: &Payload| {
        WorkFn::boxed(|ctx: WorkContext| async move {
            ctx.token.cancelled().await;
            Err(WorkerError::Canceled)
        })
    });

    let (sink, mut rx) = ResultSink::channel();
    coord.start_task("slow", "x", sink).await.unwrap();
    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: "slow".into() });
    assert_eq!(
        next(&mut rx).await,
        TaskEvent::FailedPermanently {
            id: "slow".into(),
            last_cause: WorkerError::Timeout {
                timeout: Duration::from_millis(20)
            },
        }
    );
}

#[tokio::test]
async fn test_panics_are_captured() {
    let coord = Coordinator::builder(Config::default()).build(|_: &TaskId, _: &Payload| {
        WorkFn::boxed(|_ctx: WorkContext| async move {
            if true {
                panic!("kaboom");
            }
            Ok(String::new())
        })
    });
    let mut bus = coord.subscribe();

    let (sink, mut rx) = ResultSink::channel();
    coord.start_task("p", "x", sink).await.unwrap();
    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: "p".into() });
    assert_eq!(
        next(&mut rx).await,
        TaskEvent::FailedPermanently {
            id: "p".into(),
            last_cause: WorkerError::Panicked {
                info: "kaboom".into()
            },
        }
    );
    let restarted = next_event(&mut bus, "p", EventKind::WorkerRestarted).await;
    assert_eq!(restarted.incarnation, Some(2));
}

#[tokio::test]
async fn test_coordinator_budget_exhaustion_fails_task_permanently() {
    let mut cfg = escalating(Decider::new(Directive::Restart));
    cfg.coordinator = SupervisionPolicy::new(1, Duration::from_secs(30), Decider::new(Directive::Restart));
    let coord = Coordinator::builder(cfg).build(booms);
    let mut bus = coord.subscribe();

    assert_fails_permanently(&coord, "boom").await;

    let restarted = next_event(&mut bus, "boom", EventKind::SupervisorRestarted).await;
    let exhausted = next_event(&mut bus, "boom", EventKind::BudgetExhausted).await;
    assert_eq!(restarted.incarnation, Some(2));
    assert!(restarted.seq < exhausted.seq);
    wait_until_idle(&coord).await;
    assert!(!coord.is_closed());
}

#[tokio::test]
async fn test_root_resume_keeps_accepting_tasks() {
    let mut cfg = escalating(Decider::new(Directive::Escalate));
    cfg.root = SupervisionPolicy::new(0, Duration::from_secs(30), Decider::new(Directive::Resume));
    let coord = Coordinator::builder(cfg).build(booms);
    let mut bus = coord.subscribe();

    assert_fails_permanently(&coord, "boom").await;
    next_tree_event(&mut bus, EventKind::CoordinatorResumed).await;

    assert_echoes(&coord, "ok").await;
    assert!(!coord.is_closed());
}

#[tokio::test]
async fn test_root_restart_until_its_budget_runs_out() {
    let mut cfg = escalating(Decider::new(Directive::Escalate));
    cfg.root = SupervisionPolicy::new(1, Duration::from_secs(30), Decider::new(Directive::Restart));
    let coord = Coordinator::builder(cfg).build(booms);
    let mut bus = coord.subscribe();

    assert_fails_permanently(&coord, "boom-1").await;
    next_tree_event(&mut bus, EventKind::CoordinatorRestarted).await;
    assert_echoes(&coord, "ok").await;
    wait_until_idle(&coord).await;

    assert_fails_permanently(&coord, "boom-2").await;
    next_tree_event(&mut bus, EventKind::CoordinatorStopped).await;
    let err = tokio::time::timeout(WAIT, coord.join()).await.unwrap().unwrap_err();
    assert!(matches!(err, RuntimeError::CoordinatorStopped { .. }));

    let (sink, _rx) = ResultSink::channel();
    assert_eq!(coord.start_task("late", "x", sink).await, Err(CommandError::Closed));
}

#[tokio::test]
async fn test_root_restart_backoff_does_not_block_commands() {
    let backoff = BackoffPolicy {
        first: Duration::from_millis(300),
        max: Duration::from_millis(300),
        factor: 1.0,
        jitter: JitterPolicy::None,
    };
    let mut cfg = escalating(Decider::new(Directive::Escalate));
    cfg.root = SupervisionPolicy::new(1, Duration::from_secs(30), Decider::new(Directive::Restart))
        .with_backoff(backoff);
    let coord = Coordinator::builder(cfg).build(booms);
    let mut bus = coord.subscribe();

    assert_fails_permanently(&coord, "boom").await;
    let restarted = next_tree_event(&mut bus, EventKind::CoordinatorRestarted).await;
    assert_eq!(restarted.delay_ms, Some(300));
    let since = std::time::Instant::now();

    let listed = tokio::time::timeout(Duration::from_millis(100), coord.list())
        .await
        .expect("list stalled during restart backoff");
    assert_eq!(listed, Ok(vec![]));

    let (sink, mut rx) = ResultSink::channel();
    tokio::time::timeout(Duration::from_millis(100), coord.start_task("ok", "echo", sink))
        .await
        .expect("start stalled during restart backoff")
        .unwrap();
    assert_eq!(next(&mut rx).await, TaskEvent::Accepted { id: "ok".into() });
    assert!(matches!(next(&mut rx).await, TaskEvent::Result { .. }));
    assert!(since.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_start_that_cannot_be_served_delivers_nothing() {
    let coord = Coordinator::builder(Config::default()).build(|_: &TaskId, _: &Payload| until_cancelled());
    let (sink, mut rx) = ResultSink::channel();

    // Queue the start, then drop the last handle before the coordinator sees it.
    let _ = tokio::time::timeout(Duration::ZERO, async move { coord.start_task("a", "x", sink).await }).await;

    let first = tokio::time::timeout(WAIT, rx.recv()).await.expect("sink never closed");
    assert_eq!(first, None);
}
