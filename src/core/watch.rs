//! # Liveness watch on result sinks.
//!
//! An explicit subscription table: `sink id → { watch id → notifier }`. A node
//! that cares whether a [`ResultSink`] is still there registers a notifier that
//! builds a message for **its own mailbox**; when the sink's receiver is dropped,
//! every notifier fires once, so loss of the sink arrives as an ordinary message
//! carrying the watcher's correlation tag.
//!
//! ```text
//! watch(sink, tag, mailbox)          monitor task (one per sink id)
//!   └─► table[sink][id] = notifier     └─► sink.closed().await
//!                                          └─► take table[sink], fire all → mailbox ◄ SinkLost{tag}
//! unwatch(sink, id)
//!   └─► remove; last watcher gone → monitor cancelled
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::tasks::{ResultSink, SinkId};

/// Handle to one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct WatchId(u64);

type Notify = Box<dyn FnOnce() + Send>;

struct Watched {
    watchers: HashMap<WatchId, Notify>,
    monitor: CancellationToken,
}

/// Subscription table shared by every node of one tree.
#[derive(Clone, Default)]
pub(crate) struct WatchTable {
    inner: Arc<Mutex<HashMap<SinkId, Watched>>>,
    next: Arc<AtomicU64>,
}

impl WatchTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `sink`; `make(tag)` is sent to `mailbox` when it goes away.
    pub(crate) async fn watch<M, F>(
        &self,
        sink: &ResultSink,
        tag: Arc<str>,
        mailbox: mpsc::UnboundedSender<M>,
        make: F,
    ) -> WatchId
    where
        M: Send + 'static,
        F: FnOnce(Arc<str>) -> M + Send + 'static,
    {
        let id = WatchId(self.next.fetch_add(1, AtomicOrdering::Relaxed));
        let notify: Notify = Box::new(move || {
            let _ = mailbox.send(make(tag));
        });

        let mut table = self.inner.lock().await;
        match table.entry(sink.id()) {
            Entry::Occupied(mut e) => {
                e.get_mut().watchers.insert(id, notify);
            }
            Entry::Vacant(v) => {
                let monitor = CancellationToken::new();
                v.insert(Watched {
                    watchers: HashMap::from([(id, notify)]),
                    monitor: monitor.clone(),
                });
                tokio::spawn(monitor_sink(sink.clone(), Arc::clone(&self.inner), monitor));
            }
        }
        id
    }

    /// Removes a registration. Unknown ids are ignored.
    pub(crate) async fn unwatch(&self, sink: SinkId, id: WatchId) {
        let mut table = self.inner.lock().await;
        if let Entry::Occupied(mut e) = table.entry(sink) {
            e.get_mut().watchers.remove(&id);
            if e.get().watchers.is_empty() {
                e.remove().monitor.cancel();
            }
        }
    }

    /// Number of live registrations for `sink`.
    #[cfg(test)]
    pub(crate) async fn watchers(&self, sink: SinkId) -> usize {
        self.inner
            .lock()
            .await
            .get(&sink)
            .map(|w| w.watchers.len())
            .unwrap_or(0)
    }
}

async fn monitor_sink(
    sink: ResultSink,
    table: Arc<Mutex<HashMap<SinkId, Watched>>>,
    stop: CancellationToken,
) {
    tokio::select! {
        _ = sink.closed() => {}
        _ = stop.cancelled() => return,
    }
    let fired = table.lock().await.remove(&sink.id());
    if let Some(watched) = fired {
        tracing::debug!(sink = ?sink.id(), watchers = watched.watchers.len(), "result sink lost");
        for (_, notify) in watched.watchers {
            notify();
        }
    }
}
