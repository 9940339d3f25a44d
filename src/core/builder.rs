use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::coordinator::{self, Coordinator, NodeParams};
use crate::{
    core::config::Config,
    events::Bus,
    subscribers::{Subscribe, SubscriberSet},
    tasks::WorkFactory,
};

/// Builder for constructing a [`Coordinator`] with optional subscribers.
pub struct CoordinatorBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl CoordinatorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (task lifecycle, failures, escalations)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the tree and starts the coordinator.
    ///
    /// `factory` creates a fresh unit of work for every worker incarnation.
    /// Must be called from within a tokio runtime.
    pub fn build(self, factory: impl WorkFactory) -> Coordinator {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers, bus.clone());
        let done = CancellationToken::new();
        subscriber_listener(&bus, subs, done.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(None);
        let node = coordinator::spawn(NodeParams {
            cfg: self.cfg,
            factory: Arc::new(factory),
            bus: bus.clone(),
            tx: tx.clone(),
            rx,
            closed: closed_tx,
        });
        tokio::spawn(async move {
            let _ = node.await;
            done.cancel();
        });

        Coordinator::from_parts(tx, bus, closed_rx)
    }
}

/// Forwards bus events to the subscriber set until the coordinator ends.
fn subscriber_listener(bus: &Bus, subs: SubscriberSet, done: CancellationToken) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Ok(ev) => subs.emit(Arc::new(ev)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "subscriber listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = done.cancelled() => {
                    while let Ok(ev) = rx.try_recv() {
                        subs.emit(Arc::new(ev));
                    }
                    break;
                }
            }
        }
        subs.shutdown().await;
    });
}
