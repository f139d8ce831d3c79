//! Integration tests for task trees and listeners

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tasktree::{PoolConfig, Task, TaskError, TaskListener, TaskPool, TaskStatus};

fn test_pool() -> TaskPool {
    TaskPool::new(
        PoolConfig::default()
            .with_max_workers(16)
            .with_tick(Duration::from_millis(20))
            .with_idle_timeout(Duration::from_secs(60)),
    )
}

fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    fn push(&self, event: String) {
        self.events.lock().push(event);
    }

    fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

impl TaskListener for EventLog {
    fn on_started(&self, task: &Task) {
        self.push(format!("started:{}", task.id()));
    }
    fn on_paused(&self, task: &Task) {
        self.push(format!("paused:{}", task.id()));
    }
    fn on_resumed(&self, task: &Task) {
        self.push(format!("resumed:{}", task.id()));
    }
    fn on_finished(&self, task: &Task) {
        self.push(format!("finished:{}", task.id()));
    }
    fn on_sub_finished(&self, task: &Task, _sub: &Task) {
        self.push(format!("sub_finished:{}", task.id()));
    }
    fn on_failed(&self, task: &Task, _error: &TaskError) {
        self.push(format!("failed:{}", task.id()));
    }
}

#[test]
fn test_parent_resumes_when_children_finish() {
    let pool = test_pool();
    let log = Arc::new(EventLog::default());

    let parent = Task::new(|task| {
        task.wait_sub_finished()?;
        Ok(())
    });
    parent.add_listener(log.clone());

    let children: Vec<_> = (0..3)
        .map(|i| {
            let child = Task::new(move |_| {
                thread::sleep(Duration::from_millis(20 * (i + 1)));
                Ok(())
            });
            parent.add_sub(child.clone());
            child
        })
        .collect();

    pool.submit_task(parent.clone());
    assert!(eventually(|| parent.status() == TaskStatus::Paused));

    for child in &children {
        pool.submit_task(child.clone());
    }

    assert!(pool.wait_all(Duration::from_secs(5)));
    for child in &children {
        assert_eq!(child.status(), TaskStatus::Finished);
        assert_eq!(child.parent_id(), Some(parent.id()));
    }
    assert_eq!(parent.status(), TaskStatus::Finished);
    assert_eq!(parent.finished_sub_count(), 3);

    let id = parent.id();
    assert_eq!(log.count(&format!("sub_finished:{}", id)), 3);
    assert_eq!(log.count(&format!("resumed:{}", id)), 1);
    assert_eq!(log.count(&format!("finished:{}", id)), 1);
}

#[test]
fn test_parent_waits_only_for_last_child() {
    let pool = test_pool();
    let parent = Task::new(|task| task.wait_sub_finished());
    let quick = Task::new(|_| Ok(()));
    let slow = Task::new(|_| {
        thread::sleep(Duration::from_millis(150));
        Ok(())
    });
    parent.add_sub(quick.clone());
    parent.add_sub(slow.clone());

    pool.submit_task(parent.clone());
    pool.submit_task(quick.clone());
    pool.submit_task(slow.clone());

    assert!(eventually(|| quick.status() == TaskStatus::Finished));
    // One child is still sleeping, so the parent cannot be finished yet
    assert_ne!(parent.status(), TaskStatus::Finished);

    assert!(eventually(|| parent.status() == TaskStatus::Finished));
    assert_eq!(slow.status(), TaskStatus::Finished);
}

#[test]
fn test_pause_cascades_through_tree() {
    let pool = test_pool();
    let progress = Arc::new(AtomicUsize::new(0));

    let looping = |progress: Arc<AtomicUsize>| {
        move |task: &Task| -> Result<(), TaskError> {
            loop {
                task.wait(None)?;
                progress.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(2));
            }
        }
    };

    let root = pool.submit(looping(progress.clone()));
    let child = pool.submit_sub(root.id(), looping(progress.clone())).unwrap();
    let grandchild = pool
        .submit_sub(child.id(), looping(progress.clone()))
        .unwrap();

    let all = [root.clone(), child.clone(), grandchild.clone()];
    assert!(eventually(|| all
        .iter()
        .all(|t| t.status() == TaskStatus::Running)));

    assert_eq!(pool.pause_task(root.id(), None), Ok(true));
    for task in &all {
        assert_eq!(task.status(), TaskStatus::Paused);
    }

    thread::sleep(Duration::from_millis(30));
    let frozen = progress.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(progress.load(Ordering::SeqCst), frozen);

    assert_eq!(pool.resume_task(root.id()), Ok(true));
    for task in &all {
        assert_eq!(task.status(), TaskStatus::Running);
    }
    assert!(eventually(|| progress.load(Ordering::SeqCst) > frozen));

    for task in &all {
        pool.stop_task(task.id(), None).unwrap();
    }
    assert!(pool.wait_all(Duration::from_secs(5)));
    for task in &all {
        assert_eq!(task.status(), TaskStatus::Terminated);
    }
}

#[test]
fn test_faulty_listener_does_not_break_task() {
    struct Faulty;

    impl TaskListener for Faulty {
        fn on_started(&self, _task: &Task) {
            panic!("listener bug");
        }
    }

    let pool = test_pool();
    let log = Arc::new(EventLog::default());
    let task = Task::new(|_| Ok(()));
    task.add_listener(Arc::new(Faulty));
    task.add_listener(log.clone());
    pool.submit_task(task.clone());

    assert!(eventually(|| task.status() == TaskStatus::Finished));
    assert_eq!(log.count(&format!("started:{}", task.id())), 1);
    assert_eq!(log.count(&format!("finished:{}", task.id())), 1);
}

#[test]
fn test_failed_child_does_not_resume_parent() {
    let pool = test_pool();
    let parent = Task::new(|task| task.wait_sub_finished());
    let child = Task::new(|_| Err(TaskError::failed("child broke")));
    parent.add_sub(child.clone());

    pool.submit_task(parent.clone());
    assert!(eventually(|| parent.status() == TaskStatus::Paused));
    pool.submit_task(child.clone());

    assert!(eventually(|| child.status() == TaskStatus::Failed));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(parent.status(), TaskStatus::Paused);
    assert_eq!(parent.finished_sub_count(), 0);

    // An explicit resume still releases it
    assert_eq!(pool.resume_task(parent.id()), Ok(true));
    assert!(eventually(|| parent.status() == TaskStatus::Finished));
}
