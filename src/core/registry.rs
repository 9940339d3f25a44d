//! # Task registry: the coordinator's table of active task subtrees.
//!
//! Owned exclusively by the coordinator loop, so it is a plain map with no locking.
//!
//! ## Rules
//! - At most one entry per [`TaskId`]; the id is free again once the entry is removed.
//! - `epoch` identifies the supervisor instance currently serving the entry; it
//!   changes on every coordinator-level restart and is used to drop stale reports.
//! - `incarnation` counts supervisor instances for this task (1-based).

use std::collections::HashMap;

use crate::core::supervisor::SupervisorHandle;
use crate::tasks::{Payload, ResultSink, TaskId};

/// One active task.
pub(crate) struct Entry {
    pub(crate) payload: Payload,
    pub(crate) sink: ResultSink,
    pub(crate) epoch: u64,
    pub(crate) incarnation: u64,
    pub(crate) handle: SupervisorHandle,
    /// A cooperative stop was requested; escalations are ignored from now on.
    pub(crate) stopping: bool,
}

#[derive(Default)]
pub(crate) struct Registry {
    tasks: HashMap<TaskId, Entry>,
}

impl Registry {
    pub(crate) fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub(crate) fn insert(&mut self, id: TaskId, entry: Entry) {
        self.tasks.insert(id, entry);
    }

    pub(crate) fn get_mut(&mut self, id: &TaskId) -> Option<&mut Entry> {
        self.tasks.get_mut(id)
    }

    pub(crate) fn remove(&mut self, id: &TaskId) -> Option<Entry> {
        self.tasks.remove(id)
    }

    /// Returns the entry only if it is served by supervisor `epoch`.
    pub(crate) fn current(&mut self, id: &TaskId, epoch: u64) -> Option<&mut Entry> {
        self.tasks.get_mut(id).filter(|e| e.epoch == epoch)
    }

    /// Returns sorted list of active task ids.
    pub(crate) fn list(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Removes and returns every entry.
    pub(crate) fn drain(&mut self) -> Vec<(TaskId, Entry)> {
        self.tasks.drain().collect()
    }
}
