//! Runtime events: types and broadcast bus.
//!
//! - [`EventKind`], [`Event`] event classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! Publishers are the coordinator, task supervisors, workers and subscriber workers
//! (overflow/panic). The coordinator's listener fans events out to the
//! [`SubscriberSet`](crate::SubscriberSet).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
