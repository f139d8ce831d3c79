//! Completion handle for a dispatched task

use crate::{TaskError, TaskId, TaskResult};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// State of a dispatched execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FutureState {
    /// Queued, no worker has picked it up
    Pending,
    /// A worker is executing the task body
    Running,
    /// Canceled before a worker picked it up
    Cancelled,
    /// Execution finished with this outcome
    Done(TaskResult<()>),
}

impl FutureState {
    fn is_settled(&self) -> bool {
        matches!(self, FutureState::Cancelled | FutureState::Done(_))
    }
}

type DoneCallback = Box<dyn FnOnce(&TaskFuture) + Send>;

struct Inner {
    state: FutureState,
    callbacks: Vec<DoneCallback>,
}

/// Result slot shared between the dispatcher, the worker and the task
pub struct TaskFuture {
    task_id: TaskId,
    inner: Mutex<Inner>,
    settled: Condvar,
}

impl TaskFuture {
    /// Create a pending future for `task_id`
    pub fn new(task_id: TaskId) -> Arc<Self> {
        Arc::new(Self {
            task_id,
            inner: Mutex::new(Inner {
                state: FutureState::Pending,
                callbacks: Vec::new(),
            }),
            settled: Condvar::new(),
        })
    }

    /// Id of the task this future belongs to
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Current state
    pub fn state(&self) -> FutureState {
        self.inner.lock().state.clone()
    }

    /// Whether the future is done or canceled
    pub fn is_done(&self) -> bool {
        self.inner.lock().state.is_settled()
    }

    /// Whether the future was canceled
    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().state == FutureState::Cancelled
    }

    /// Whether a worker is executing it right now
    pub fn is_running(&self) -> bool {
        self.inner.lock().state == FutureState::Running
    }

    /// Outcome once done; `None` while pending, running or canceled
    pub fn outcome(&self) -> Option<TaskResult<()>> {
        match &self.inner.lock().state {
            FutureState::Done(result) => Some(result.clone()),
            _ => None,
        }
    }

    /// Cancel the execution if no worker has started it.
    ///
    /// Returns `false` when it is already running or done.
    pub fn cancel(&self) -> bool {
        let callbacks = {
            let mut inner = self.inner.lock();
            match inner.state {
                FutureState::Cancelled => return true,
                FutureState::Running | FutureState::Done(_) => return false,
                FutureState::Pending => {}
            }
            inner.state = FutureState::Cancelled;
            self.settled.notify_all();
            std::mem::take(&mut inner.callbacks)
        };
        self.run_callbacks(callbacks);
        true
    }

    /// Claim the future for execution. Returns `false` if it was canceled.
    pub(crate) fn start(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != FutureState::Pending {
            return false;
        }
        inner.state = FutureState::Running;
        true
    }

    /// Store the outcome and run the done callbacks
    pub(crate) fn complete(&self, result: TaskResult<()>) {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.state.is_settled() {
                return;
            }
            inner.state = FutureState::Done(result);
            self.settled.notify_all();
            std::mem::take(&mut inner.callbacks)
        };
        self.run_callbacks(callbacks);
    }

    /// Run `callback` once the future settles; immediately if it already has
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&TaskFuture) + Send + 'static,
    {
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_settled() {
                inner.callbacks.push(Box::new(callback));
                return;
            }
        }
        self.run_callbacks(vec![Box::new(callback)]);
    }

    /// Block until settled or the timeout elapses, returning the state seen
    pub fn wait(&self, timeout: Option<Duration>) -> FutureState {
        let mut inner = self.inner.lock();
        let deadline =
            timeout.and_then(|timeout| std::time::Instant::now().checked_add(timeout));
        match deadline {
            Some(deadline) => {
                while !inner.state.is_settled() {
                    if self.settled.wait_until(&mut inner, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !inner.state.is_settled() {
                    self.settled.wait(&mut inner);
                }
            }
        }
        inner.state.clone()
    }

    fn run_callbacks(&self, callbacks: Vec<DoneCallback>) {
        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(self))).is_err() {
                tracing::error!(task = %self.task_id, "done callback panicked");
            }
        }
    }
}

impl std::fmt::Debug for TaskFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture")
            .field("task_id", &self.task_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Convert a panic payload into a `Panicked` error
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> TaskError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    TaskError::Panicked(message)
}
