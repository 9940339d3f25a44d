use std::sync::Arc;
use std::time::Duration;

use treevisor::{
    BoxWork, Config, Coordinator, EventKind, LogWriter, Payload, ResultSink, Subscribe, TaskEvent,
    TaskId, WorkContext, WorkFn, WorkerError,
};

#[tokio::test]
async fn test_log_writer_sees_the_whole_lifecycle() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let coord = Coordinator::builder(Config::default())
        .with_subscribers(subs)
        .build(|_: &TaskId, _: &Payload| -> BoxWork {
            WorkFn::boxed(|ctx: WorkContext| async move {
                if ctx.run == 1 {
                    return Err(WorkerError::ignorable("first run"));
                }
                Ok(ctx.payload.to_string())
            })
        });
    let mut bus = coord.subscribe();

    let (sink, mut rx) = ResultSink::channel();
    coord.start_task("logged", "value", sink).await.unwrap();
    assert!(matches!(rx.recv().await, Some(TaskEvent::Accepted { .. })));
    assert!(matches!(rx.recv().await, Some(TaskEvent::Result { .. })));

    let resumed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let ev = bus.recv().await.unwrap();
            if ev.kind == EventKind::WorkerResumed {
                return ev;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(resumed.task.as_deref(), Some("logged"));
    assert_eq!(LogWriter::new().name(), "LogWriter");

    coord.shutdown().await.unwrap();
}
