//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for observing the tree: logging, metrics,
//! audit trails. Each subscriber is driven by its own worker loop fed by a bounded
//! queue owned by the [`SubscriberSet`](crate::SubscriberSet), so a slow subscriber
//! never holds up a supervisor.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use treevisor::{Event, EventKind, Subscribe};
//!
//! struct RestartCounter(std::sync::atomic::AtomicU64);
//!
//! #[async_trait]
//! impl Subscribe for RestartCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::WorkerRestarted {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "restart-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles a single event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs/metrics).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    ///
    /// On overflow, events for this subscriber are **dropped**.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
