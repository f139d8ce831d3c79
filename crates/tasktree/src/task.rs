//! Task structure and lifecycle
//!
//! A [`Task`] wraps one unit of user work. Its status moves through
//!
//! ```text
//! Unset -> Running -> Finished | Terminated | Failed
//!          Running <-> Paused
//! Unset -> Canceled
//! ```
//!
//! Parents own their children. When the last child finishes while the parent
//! is paused, the parent resumes itself, which is what `wait_sub_finished`
//! relies on.

use crate::future::{panic_message, TaskFuture};
use crate::handle::TaskHandle;
use crate::listener::{ListenerSet, TaskListener};
use crate::schedule::Schedule;
use crate::{TaskError, TaskResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Created, not yet run
    Unset,
    /// Body is executing
    Running,
    /// Paused; the body blocks at its next wait
    Paused,
    /// Stopped while running
    Terminated,
    /// Canceled before it ran
    Canceled,
    /// Body returned normally
    Finished,
    /// Body returned an error or panicked
    Failed,
}

impl TaskStatus {
    /// Whether no further transition can happen
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Terminated | TaskStatus::Canceled | TaskStatus::Finished | TaskStatus::Failed
        )
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Unset => "unset",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Terminated => "terminated",
            TaskStatus::Canceled => "canceled",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type TaskBody = Box<dyn FnOnce(&Task) -> TaskResult<()> + Send>;

struct TaskState {
    status: TaskStatus,
    begin_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
    /// Children were paused by this task's own pause call
    subs_paused: bool,
    finished_subs: usize,
}

struct ParentLink {
    id: TaskId,
    task: Weak<Task>,
}

/// A node in a task tree
pub struct Task {
    /// Unique identifier
    id: TaskId,

    /// Status and timing, changed together
    state: Mutex<TaskState>,

    /// Cooperative pause/stop signal
    handle: TaskHandle,

    /// User work; taken on first run
    body: Mutex<Option<TaskBody>>,

    /// Readiness source
    schedule: RwLock<Option<Arc<dyn Schedule>>>,

    /// Owning task (non-owning back-reference)
    parent: RwLock<Option<ParentLink>>,

    /// Owned sub-tasks, in insertion order
    children: RwLock<Vec<Arc<Task>>>,

    /// Execution handle once dispatched
    future: Mutex<Option<Arc<TaskFuture>>>,

    listeners: ListenerSet,
}

impl Task {
    /// Create a new Task around `body`
    pub fn new<F>(body: F) -> Arc<Self>
    where
        F: FnOnce(&Task) -> TaskResult<()> + Send + 'static,
    {
        Arc::new(Self {
            id: TaskId::new(),
            state: Mutex::new(TaskState {
                status: TaskStatus::Unset,
                begin_time: None,
                finish_time: None,
                subs_paused: false,
                finished_subs: 0,
            }),
            handle: TaskHandle::new(),
            body: Mutex::new(Some(Box::new(body))),
            schedule: RwLock::new(None),
            parent: RwLock::new(None),
            children: RwLock::new(Vec::new()),
            future: Mutex::new(None),
            listeners: ListenerSet::default(),
        })
    }

    /// Create a new Task that becomes ready when `schedule` comes due
    pub fn scheduled<S, F>(schedule: S, body: F) -> Arc<Self>
    where
        S: Schedule + 'static,
        F: FnOnce(&Task) -> TaskResult<()> + Send + 'static,
    {
        let task = Self::new(body);
        task.set_schedule(Some(Arc::new(schedule)));
        task
    }

    /// Get the Task's unique ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the current status
    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    /// When the body first started
    pub fn begin_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().begin_time
    }

    /// When the task finished
    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().finish_time
    }

    /// Elapsed time from start to finish, or to now while still going
    pub fn cost(&self) -> TaskResult<Duration> {
        let state = self.state.lock();
        let begin = state.begin_time.ok_or(TaskError::NotStarted(self.id))?;
        let end = state.finish_time.unwrap_or_else(Utc::now);
        Ok((end - begin).to_std().unwrap_or_default())
    }

    /// The task's cooperative signal
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    /// Block at a pause point; fails once the task has been stopped
    pub fn wait(&self, timeout: Option<Duration>) -> TaskResult<()> {
        self.handle.wait(timeout)
    }

    /// Attach or clear the readiness source
    pub fn set_schedule(&self, schedule: Option<Arc<dyn Schedule>>) {
        *self.schedule.write() = schedule;
    }

    /// Whether the task may run now
    pub fn ready(&self) -> bool {
        match self.schedule.read().as_ref() {
            Some(schedule) => schedule.is_due(Utc::now()),
            None => true,
        }
    }

    /// Register a listener
    pub fn add_listener(&self, listener: Arc<dyn TaskListener>) {
        self.listeners.add(listener);
    }

    /// Adopt `sub` as the last child of this task
    pub fn add_sub(self: &Arc<Self>, sub: Arc<Task>) {
        *sub.parent.write() = Some(ParentLink {
            id: self.id,
            task: Arc::downgrade(self),
        });
        self.children.write().push(sub);
    }

    /// Parent task id (if any)
    pub fn parent_id(&self) -> Option<TaskId> {
        self.parent.read().as_ref().map(|link| link.id)
    }

    /// Parent task, while it is still alive
    pub fn parent(&self) -> Option<Arc<Task>> {
        self.parent.read().as_ref().and_then(|link| link.task.upgrade())
    }

    /// Snapshot of the children
    pub fn children(&self) -> Vec<Arc<Task>> {
        self.children.read().clone()
    }

    /// Number of children
    pub fn sub_count(&self) -> usize {
        self.children.read().len()
    }

    /// Number of children that have finished
    pub fn finished_sub_count(&self) -> usize {
        self.state.lock().finished_subs
    }

    /// Execution handle, once dispatched
    pub fn future(&self) -> Option<Arc<TaskFuture>> {
        self.future.lock().clone()
    }

    /// Whether a dispatch is attached
    pub fn is_dispatched(&self) -> bool {
        self.future.lock().is_some()
    }

    pub(crate) fn attach_future(&self, future: Arc<TaskFuture>) {
        *self.future.lock() = Some(future);
    }

    pub(crate) fn detach_future(&self) {
        *self.future.lock() = None;
    }

    /// Execute the body on the calling thread.
    ///
    /// Does nothing once the status is set. Returns [`TaskError::NotReady`]
    /// before the schedule comes due. A body that returns the termination
    /// signal leaves the task `Terminated`; any other error or panic marks it
    /// `Failed` and is returned.
    pub fn run(&self) -> TaskResult<()> {
        if self.status() != TaskStatus::Unset {
            return Ok(());
        }
        if !self.ready() {
            return Err(TaskError::NotReady(self.id));
        }

        let body = {
            let mut state = self.state.lock();
            if state.status != TaskStatus::Unset {
                return Ok(());
            }
            state.status = TaskStatus::Running;
            state.begin_time.get_or_insert_with(Utc::now);
            self.body.lock().take()
        };
        self.announce(TaskStatus::Running);
        self.listeners.notify(self, "started", |l| l.on_started(self));

        let outcome = match body {
            Some(body) => panic::catch_unwind(AssertUnwindSafe(|| body(self)))
                .unwrap_or_else(|payload| Err(panic_message(payload))),
            None => Ok(()),
        };

        match outcome {
            Ok(()) => {
                self.finish();
                Ok(())
            }
            Err(TaskError::Terminated { .. }) => {
                self.terminate();
                Ok(())
            }
            Err(error) => {
                tracing::error!(task = %self.id, %error, "task body failed");
                self.fail(&error);
                Err(error)
            }
        }
    }

    /// Pause a running task, and its children first when `include_subs`.
    ///
    /// Returns `false` if the task is not running.
    pub fn pause(&self, timeout: Option<Duration>, include_subs: bool) -> bool {
        if self.status() != TaskStatus::Running {
            return false;
        }
        if include_subs {
            for sub in self.children() {
                sub.pause(timeout, true);
            }
        }
        {
            let mut state = self.state.lock();
            if state.status != TaskStatus::Running {
                return false;
            }
            if include_subs {
                state.subs_paused = true;
            }
            self.handle.pause(timeout);
            state.status = TaskStatus::Paused;
        }
        self.announce(TaskStatus::Paused);
        true
    }

    /// Resume a paused task, and the children its own pause call paused.
    ///
    /// Returns `false` if the task is not paused.
    pub fn resume(&self) -> bool {
        let subs_paused = {
            let mut state = self.state.lock();
            if state.status != TaskStatus::Paused {
                return false;
            }
            state.status = TaskStatus::Running;
            self.handle.resume();
            std::mem::take(&mut state.subs_paused)
        };
        if subs_paused {
            for sub in self.children() {
                sub.resume();
            }
        }
        tracing::debug!(task = %self.id, "task resumed");
        self.announce(TaskStatus::Running);
        self.listeners.notify(self, "resumed", |l| l.on_resumed(self));
        true
    }

    /// Stop a running task. The body observes it at its next wait.
    pub fn stop(&self, reason: Option<String>) -> TaskResult<()> {
        {
            let mut state = self.state.lock();
            if state.status != TaskStatus::Running {
                return Err(TaskError::NotRunning {
                    id: self.id,
                    status: state.status,
                });
            }
            state.status = TaskStatus::Terminated;
            self.handle.force_stop(reason.clone());
        }
        self.announce(TaskStatus::Terminated);
        self.listeners
            .notify(self, "stopped", |l| l.on_stopped(self, reason.as_deref()));
        Ok(())
    }

    /// Cancel the task before it runs.
    ///
    /// Fails if an attached dispatch is already executing. Canceling twice
    /// succeeds.
    pub fn cancel(&self) -> bool {
        if let Some(future) = self.future() {
            if !future.cancel() {
                return false;
            }
        }
        {
            let mut state = self.state.lock();
            match state.status {
                TaskStatus::Unset => state.status = TaskStatus::Canceled,
                TaskStatus::Canceled => return true,
                _ => return false,
            }
        }
        self.announce(TaskStatus::Canceled);
        true
    }

    /// Pause this task (not its children) until every child has finished
    pub fn wait_sub_finished(&self) -> TaskResult<()> {
        tracing::debug!(task = %self.id, subs = self.sub_count(), "waiting for sub tasks");
        if self.pause(None, false) {
            let all_done = {
                let state = self.state.lock();
                state.status == TaskStatus::Paused && state.finished_subs >= self.sub_count()
            };
            if all_done {
                self.resume();
            }
        }
        self.handle.wait(None)
    }

    /// Bookkeeping after a dispatch completes; a task still marked running or
    /// paused is treated as finished
    pub(crate) fn settle(&self) {
        if matches!(self.status(), TaskStatus::Running | TaskStatus::Paused) {
            self.finish();
        }
    }

    fn finish(&self) {
        {
            let mut state = self.state.lock();
            if !matches!(state.status, TaskStatus::Running | TaskStatus::Paused) {
                return;
            }
            state.status = TaskStatus::Finished;
            state.finish_time = Some(Utc::now());
        }
        self.announce(TaskStatus::Finished);
    }

    fn terminate(&self) {
        {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = TaskStatus::Terminated;
        }
        self.announce(TaskStatus::Terminated);
    }

    fn fail(&self, error: &TaskError) {
        {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = TaskStatus::Failed;
        }
        self.announce(TaskStatus::Failed);
        self.listeners.notify(self, "failed", |l| l.on_failed(self, error));
    }

    fn sub_finished(&self, sub: &Task) {
        self.listeners
            .notify(self, "sub_finished", |l| l.on_sub_finished(self, sub));
        let resume = {
            let mut state = self.state.lock();
            state.finished_subs += 1;
            state.finished_subs >= self.sub_count() && state.status == TaskStatus::Paused
        };
        if resume {
            tracing::debug!(task = %self.id, "all sub tasks finished");
            self.resume();
        }
    }

    /// Log and deliver a status change; a finish is forwarded to the parent
    fn announce(&self, status: TaskStatus) {
        tracing::debug!(task = %self.id, %status, "task status changed");
        self.listeners
            .notify(self, "status_changed", |l| l.on_status_changed(self, status));
        match status {
            TaskStatus::Paused => self.listeners.notify(self, "paused", |l| l.on_paused(self)),
            TaskStatus::Terminated => self
                .listeners
                .notify(self, "terminated", |l| l.on_terminated(self)),
            TaskStatus::Canceled => self.listeners.notify(self, "canceled", |l| l.on_canceled(self)),
            TaskStatus::Finished => {
                self.listeners.notify(self, "finished", |l| l.on_finished(self));
                if let Some(parent) = self.parent() {
                    parent.sub_finished(self);
                }
            }
            TaskStatus::Unset | TaskStatus::Running | TaskStatus::Failed => {}
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("parent", &self.parent_id())
            .field("subs", &self.sub_count())
            .finish()
    }
}
