//! # Task identifiers and payloads.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Opaque identifier of one unit of work submitted to the coordinator.
///
/// Cheap to clone. The coordinator rejects an id while a task with the same id is
/// still active, so an id is never reused while any record of the task exists.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Arc<str>);

impl TaskId {
    /// Creates an id from anything string-like.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&TaskId> for Arc<str> {
    fn from(id: &TaskId) -> Self {
        Arc::clone(&id.0)
    }
}

/// Input handed to the work factory for a task. Shared, immutable, cheap to clone.
pub type Payload = Arc<str>;
