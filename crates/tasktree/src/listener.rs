//! Observers of task lifecycle events

use crate::{Task, TaskError, TaskStatus};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Receives task lifecycle callbacks.
///
/// Callbacks run synchronously on the thread that changed the task, so they
/// must not block for long. Every method defaults to a no-op.
pub trait TaskListener: Send + Sync {
    /// The task started executing its body
    fn on_started(&self, _task: &Task) {}

    /// Any status change
    fn on_status_changed(&self, _task: &Task, _status: TaskStatus) {}

    /// The task was paused
    fn on_paused(&self, _task: &Task) {}

    /// The task was resumed, explicitly or by its last child finishing
    fn on_resumed(&self, _task: &Task) {}

    /// `stop` was called on the running task
    fn on_stopped(&self, _task: &Task, _reason: Option<&str>) {}

    /// The task reached `terminated`
    fn on_terminated(&self, _task: &Task) {}

    /// The task was canceled before it started
    fn on_canceled(&self, _task: &Task) {}

    /// The task body returned normally
    fn on_finished(&self, _task: &Task) {}

    /// The task body failed or panicked
    fn on_failed(&self, _task: &Task, _error: &TaskError) {}

    /// One of the task's children finished
    fn on_sub_finished(&self, _task: &Task, _sub: &Task) {}
}

/// Ordered listener collection, safe to extend while notifying
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn TaskListener>>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: Arc<dyn TaskListener>) {
        self.listeners.write().push(listener);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Invoke `f` on a snapshot of the listeners, isolating panics
    pub(crate) fn notify<F>(&self, task: &Task, event: &str, f: F)
    where
        F: Fn(&dyn TaskListener),
    {
        let snapshot: Vec<_> = self.listeners.read().clone();
        for listener in snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(listener.as_ref())));
            if result.is_err() {
                tracing::error!(task = %task.id(), event, "task listener panicked");
            }
        }
    }
}
