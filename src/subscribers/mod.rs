//! # Event subscribers.
//!
//! ```text
//! node ── publish(Event) ──► Bus ──► coordinator listener ──► SubscriberSet
//!                                                               ├──► LogWriter
//!                                                               └──► custom ...
//! ```
//!
//! Implement [`Subscribe`] for metrics, alerting or audit; enable the `logging`
//! feature for the built-in `tracing`-backed `LogWriter`.

#[cfg(feature = "logging")]
mod log;
mod subscribe;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use subscribe::Subscribe;
pub use subscriber_set::SubscriberSet;
