//! Task pool: registry, dispatch loop, workers and idle self-stop
//!
//! ```no_run
//! use tasktree::{PoolConfig, TaskPool};
//! use std::time::Duration;
//!
//! let pool = TaskPool::new(PoolConfig::default().with_tick(Duration::from_millis(50)));
//! let task = pool.submit(|task| {
//!     // pause point: blocks while paused, fails once stopped
//!     task.wait(None)?;
//!     Ok(())
//! });
//! pool.wait_all(Duration::from_secs(5));
//! println!("{} -> {}", task.id(), task.status());
//! ```

mod dispatcher;
mod idle;
mod workers;

use crate::config::{ConfigError, PoolConfig};
use crate::future::TaskFuture;
use crate::schedule::Schedule;
use crate::task::{Task, TaskId, TaskStatus};
use crate::{TaskError, TaskResult};
use dashmap::DashMap;
use dispatcher::Dispatcher;
use idle::IdleTimer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use workers::WorkerPool;

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks ever submitted
    pub total: usize,

    /// Tasks per status
    pub unset: usize,
    /// Running tasks
    pub running: usize,
    /// Paused tasks
    pub paused: usize,
    /// Finished tasks
    pub finished: usize,
    /// Terminated tasks
    pub terminated: usize,
    /// Canceled tasks
    pub canceled: usize,
    /// Failed tasks
    pub failed: usize,

    /// Total dispatches handed to workers
    pub dispatched: u64,

    /// Total dispatches that completed
    pub completed: u64,

    /// Worker threads executing a task right now
    pub busy_workers: usize,
}

impl PoolStats {
    /// Tasks not yet in a terminal status
    pub fn unfinished(&self) -> usize {
        self.unset + self.running + self.paused
    }
}

struct PoolInner {
    config: PoolConfig,
    tasks: DashMap<TaskId, Arc<Task>>,
    workers: WorkerPool,
    dispatcher: Arc<Dispatcher>,
    idle: Arc<IdleTimer>,
    dispatched: AtomicU64,
    completed: AtomicU64,
}

impl PoolInner {
    fn register(self: &Arc<Self>, task: Arc<Task>) -> Arc<Task> {
        tracing::debug!(task = %task.id(), parent = ?task.parent_id(), "task submitted");
        self.tasks.insert(task.id(), task.clone());
        self.idle.disarm();
        self.start();
        task
    }

    fn get(&self, id: TaskId) -> TaskResult<Arc<Task>> {
        self.tasks
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(TaskError::NotFound(id))
    }

    fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let started = self
            .dispatcher
            .start(self.config.tick(), &self.config.thread_name, move || {
                match weak.upgrade() {
                    Some(inner) => {
                        inner.dispatch_ready();
                        true
                    }
                    None => false,
                }
            });
        if started {
            tracing::info!(
                max_workers = self.workers.max_workers(),
                tick_ms = self.config.tick_ms,
                "task pool started"
            );
        }
    }

    fn stop(&self) {
        if self.dispatcher.stop() {
            tracing::info!("task pool stopped");
        }
    }

    fn has_unfinished_tasks(&self) -> bool {
        self.tasks
            .iter()
            .any(|entry| !entry.value().status().is_terminal())
    }

    /// One tick: hand every ready, never-dispatched task to the workers in
    /// submission order
    fn dispatch_ready(self: &Arc<Self>) {
        let mut candidates: Vec<Arc<Task>> = self
            .tasks
            .iter()
            .filter(|entry| {
                let task = entry.value();
                task.status() == TaskStatus::Unset && !task.is_dispatched()
            })
            .map(|entry| entry.value().clone())
            .collect();
        candidates.sort_by_key(|task| task.id());

        for task in candidates {
            if task.ready() {
                self.dispatch(task);
            }
        }
    }

    fn dispatch(self: &Arc<Self>, task: Arc<Task>) {
        let future = TaskFuture::new(task.id());
        task.attach_future(future.clone());

        let weak = Arc::downgrade(self);
        future.add_done_callback(move |future| {
            if let Some(inner) = weak.upgrade() {
                inner.on_complete(future);
            }
        });

        let job_future = future.clone();
        let job_task = task.clone();
        let job = Box::new(move || {
            if !job_future.start() {
                return;
            }
            let outcome = job_task.run();
            job_future.complete(outcome);
        });

        match self.workers.execute(job) {
            Ok(()) => {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(task = %task.id(), "task dispatched");
            }
            Err(error) => {
                tracing::error!(task = %task.id(), %error, "failed to dispatch task");
                task.detach_future();
            }
        }
    }

    fn on_complete(self: &Arc<Self>, future: &TaskFuture) {
        if future.is_cancelled() {
            return;
        }
        let Ok(task) = self.get(future.task_id()) else {
            return;
        };

        if let Some(Err(TaskError::NotReady(_))) = future.outcome() {
            // Schedule moved back between the scan and the run; try again later
            task.detach_future();
            return;
        }

        self.completed.fetch_add(1, Ordering::Relaxed);
        task.settle();
        self.check_idle();
    }

    /// Arm the idle timer once nothing is left to do
    fn check_idle(self: &Arc<Self>) {
        if self.has_unfinished_tasks() {
            return;
        }
        let weak = Arc::downgrade(self);
        let timeout = self.config.idle_timeout();
        let armed = self.idle.arm(timeout, &self.config.thread_name, move || {
            if let Some(inner) = weak.upgrade() {
                if !inner.has_unfinished_tasks() {
                    tracing::info!(idle_ms = timeout.as_millis() as u64, "task pool idle, stopping");
                    inner.stop();
                }
            }
        });
        if armed {
            tracing::debug!(idle_ms = timeout.as_millis() as u64, "idle period started");
        }
    }
}

/// In-process task pool.
///
/// Owns the registry, a dispatch loop thread, the worker threads and the idle
/// timer. Dropping the pool stops all of them; bodies already executing run to
/// completion.
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

impl TaskPool {
    /// Create a pool. The dispatch loop starts with the first submission.
    pub fn new(config: PoolConfig) -> Self {
        let workers = WorkerPool::new(config.effective_max_workers(), config.thread_name.clone());
        Self {
            inner: Arc::new(PoolInner {
                config,
                tasks: DashMap::new(),
                workers,
                dispatcher: Dispatcher::new(),
                idle: IdleTimer::new(),
                dispatched: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Create a pool after validating `config`
    pub fn try_new(config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Active configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Worker thread bound
    pub fn max_workers(&self) -> usize {
        self.inner.workers.max_workers()
    }

    /// Whether the dispatch loop is running
    pub fn is_working(&self) -> bool {
        self.inner.dispatcher.is_working()
    }

    /// Wrap `body` in a task and register it
    pub fn submit<F>(&self, body: F) -> Arc<Task>
    where
        F: FnOnce(&Task) -> TaskResult<()> + Send + 'static,
    {
        self.inner.register(Task::new(body))
    }

    /// Register a task that runs once `schedule` comes due
    pub fn submit_scheduled<S, F>(&self, schedule: S, body: F) -> Arc<Task>
    where
        S: Schedule + 'static,
        F: FnOnce(&Task) -> TaskResult<()> + Send + 'static,
    {
        self.inner.register(Task::scheduled(schedule, body))
    }

    /// Register a task as the last child of `parent`
    pub fn submit_sub<F>(&self, parent: TaskId, body: F) -> TaskResult<Arc<Task>>
    where
        F: FnOnce(&Task) -> TaskResult<()> + Send + 'static,
    {
        let parent = self.inner.get(parent)?;
        let sub = Task::new(body);
        parent.add_sub(sub.clone());
        Ok(self.inner.register(sub))
    }

    /// Register an already built task, e.g. one with listeners attached
    pub fn submit_task(&self, task: Arc<Task>) -> Arc<Task> {
        self.inner.register(task)
    }

    /// Look up a task
    pub fn get_task(&self, id: TaskId) -> TaskResult<Arc<Task>> {
        self.inner.get(id)
    }

    /// Every task ever submitted, in submission order
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        let mut tasks: Vec<_> = self
            .inner
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|task| task.id());
        tasks
    }

    /// Pause a task and its children
    pub fn pause_task(&self, id: TaskId, timeout: Option<Duration>) -> TaskResult<bool> {
        Ok(self.inner.get(id)?.pause(timeout, true))
    }

    /// Resume a paused task
    pub fn resume_task(&self, id: TaskId) -> TaskResult<bool> {
        Ok(self.inner.get(id)?.resume())
    }

    /// Stop a running task
    pub fn stop_task(&self, id: TaskId, reason: Option<String>) -> TaskResult<()> {
        self.inner.get(id)?.stop(reason)
    }

    /// Cancel a task; one that is already running is stopped instead.
    ///
    /// Returns whether the cancel itself succeeded.
    pub fn cancel_task(&self, id: TaskId) -> TaskResult<bool> {
        let task = self.inner.get(id)?;
        let canceled = task.cancel();
        if !canceled && task.status() == TaskStatus::Running {
            // Cannot fail: status was just observed as running, or it moved on
            let _ = task.stop(Some("canceled".to_string()));
        }
        self.inner.check_idle();
        Ok(canceled)
    }

    /// Whether any task is not yet terminal
    pub fn has_unfinished_tasks(&self) -> bool {
        self.inner.has_unfinished_tasks()
    }

    /// Block until every task is terminal or `timeout` elapses
    pub fn wait_all(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if !self.has_unfinished_tasks() {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Stop the dispatch loop. In-flight bodies complete; a later submission
    /// starts the loop again.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            busy_workers: self.inner.workers.busy(),
            ..PoolStats::default()
        };
        for entry in self.inner.tasks.iter() {
            stats.total += 1;
            match entry.value().status() {
                TaskStatus::Unset => stats.unset += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Paused => stats.paused += 1,
                TaskStatus::Finished => stats.finished += 1,
                TaskStatus::Terminated => stats.terminated += 1,
                TaskStatus::Canceled => stats.canceled += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.inner.stop();
        self.inner.idle.disarm();
        self.inner.workers.shutdown();
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("working", &self.is_working())
            .field("tasks", &self.inner.tasks.len())
            .field("max_workers", &self.max_workers())
            .field("idle_pending", &self.inner.idle.is_armed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::At;
    use chrono::Utc;
    use std::thread;

    fn fast_config() -> PoolConfig {
        PoolConfig::default()
            .with_max_workers(4)
            .with_tick(Duration::from_millis(10))
            .with_idle_timeout(Duration::from_millis(100))
    }

    fn eventually(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_submit_runs_task() {
        let pool = TaskPool::new(fast_config());
        assert!(!pool.is_working());

        let task = pool.submit(|_| Ok(()));
        assert!(pool.is_working());
        assert!(eventually(|| task.status() == TaskStatus::Finished));
        assert!(task.future().is_some_and(|f| f.is_done()));
    }

    #[test]
    fn test_get_task_not_found() {
        let pool = TaskPool::new(fast_config());
        let missing = TaskId::from_u64(u64::MAX);
        assert_eq!(pool.get_task(missing).unwrap_err(), TaskError::NotFound(missing));
        assert_eq!(pool.pause_task(missing, None), Err(TaskError::NotFound(missing)));
        assert_eq!(pool.resume_task(missing), Err(TaskError::NotFound(missing)));
        assert_eq!(pool.stop_task(missing, None), Err(TaskError::NotFound(missing)));
        assert_eq!(pool.cancel_task(missing), Err(TaskError::NotFound(missing)));
        assert!(pool.submit_sub(missing, |_| Ok(())).is_err());
    }

    #[test]
    fn test_tasks_in_submission_order() {
        let pool = TaskPool::new(fast_config());
        let ids: Vec<_> = (0..5).map(|_| pool.submit(|_| Ok(())).id()).collect();
        let listed: Vec<_> = pool.tasks().iter().map(|t| t.id()).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_ready_tasks_dispatch_in_submission_order() {
        let pool = TaskPool::new(fast_config().with_max_workers(1));
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let due = Utc::now() + chrono::Duration::milliseconds(80);

        let ids: Vec<_> = (0..8)
            .map(|_| {
                let order = order.clone();
                pool.submit_scheduled(At(due), move |task| {
                    order.lock().push(task.id());
                    Ok(())
                })
                .id()
            })
            .collect();

        assert!(pool.wait_all(Duration::from_secs(5)));
        assert_eq!(*order.lock(), ids);
    }

    #[test]
    fn test_try_new_validates_config() {
        let config = PoolConfig {
            tick_ms: 0,
            ..fast_config()
        };
        assert!(matches!(TaskPool::try_new(config), Err(ConfigError::ValidationError(_))));

        let pool = TaskPool::try_new(fast_config().with_tick(Duration::from_micros(500))).unwrap();
        assert_eq!(pool.config().tick(), Duration::from_millis(1));
        let task = pool.submit(|_| Ok(()));
        assert!(eventually(|| task.status() == TaskStatus::Finished));
    }

    #[test]
    fn test_failed_body_surfaces_in_future() {
        let pool = TaskPool::new(fast_config());
        let task = pool.submit(|_| Err(TaskError::failed("bad input")));

        assert!(eventually(|| task.status() == TaskStatus::Failed));
        let future = task.future().unwrap();
        assert!(eventually(|| future.is_done()));
        assert_eq!(future.outcome(), Some(Err(TaskError::failed("bad input"))));
        assert_eq!(pool.stats().failed, 1);
    }

    #[test]
    fn test_scheduled_task_waits() {
        let pool = TaskPool::new(fast_config());
        let task = pool.submit_scheduled(At(Utc::now() + chrono::Duration::milliseconds(150)), |_| {
            Ok(())
        });

        thread::sleep(Duration::from_millis(60));
        assert_eq!(task.status(), TaskStatus::Unset);
        assert!(!task.is_dispatched());

        assert!(eventually(|| task.status() == TaskStatus::Finished));
    }

    #[test]
    fn test_cancel_scheduled_task() {
        let pool = TaskPool::new(fast_config());
        let task = pool.submit_scheduled(At(Utc::now() + chrono::Duration::hours(1)), |_| Ok(()));

        assert_eq!(pool.cancel_task(task.id()), Ok(true));
        assert_eq!(task.status(), TaskStatus::Canceled);
        assert!(!pool.has_unfinished_tasks());
    }

    #[test]
    fn test_cancel_running_task_stops_it() {
        let pool = TaskPool::new(fast_config());
        let task = pool.submit(|task| loop {
            task.wait(Some(Duration::from_millis(5)))?;
            thread::sleep(Duration::from_millis(2));
        });

        assert!(eventually(|| task.status() == TaskStatus::Running));
        assert_eq!(pool.cancel_task(task.id()), Ok(false));
        assert_eq!(task.status(), TaskStatus::Terminated);
        assert_eq!(task.handle().stop_reason(), Some("canceled".to_string()));
    }

    #[test]
    fn test_submit_sub_links_parent() {
        let pool = TaskPool::new(fast_config());
        let parent = pool.submit(|task| task.wait_sub_finished());
        let sub = pool
            .submit_sub(parent.id(), |_| {
                thread::sleep(Duration::from_millis(30));
                Ok(())
            })
            .unwrap();

        assert_eq!(sub.parent_id(), Some(parent.id()));
        assert!(pool.wait_all(Duration::from_secs(5)));
        assert_eq!(parent.status(), TaskStatus::Finished);
        assert_eq!(sub.status(), TaskStatus::Finished);
    }

    #[test]
    fn test_stats() {
        let pool = TaskPool::new(fast_config());
        for _ in 0..3 {
            pool.submit(|_| Ok(()));
        }
        pool.submit_scheduled(At(Utc::now() + chrono::Duration::hours(1)), |_| Ok(()));

        assert!(eventually(|| pool.stats().finished == 3));
        let stats = pool.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.unset, 1);
        assert_eq!(stats.unfinished(), 1);
        assert_eq!(stats.dispatched, 3);
        assert!(eventually(|| pool.stats().completed == 3));
    }

    #[test]
    fn test_idle_self_stop() {
        let pool = TaskPool::new(fast_config());
        pool.submit(|_| Ok(()));
        assert!(pool.wait_all(Duration::from_secs(5)));

        assert!(eventually(|| !pool.is_working()));

        // A new submission restarts the loop
        let task = pool.submit(|_| Ok(()));
        assert!(pool.is_working());
        assert!(eventually(|| task.status() == TaskStatus::Finished));
    }

    #[test]
    fn test_explicit_stop() {
        let pool = TaskPool::new(fast_config().with_idle_timeout(Duration::from_secs(60)));
        pool.submit(|_| Ok(()));
        assert!(pool.is_working());
        pool.stop();
        assert!(!pool.is_working());
    }
}
