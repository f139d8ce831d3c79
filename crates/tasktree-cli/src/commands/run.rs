//! `tasktree run` — demonstration workload.
//!
//! A parent task waits on its children while a scheduled task comes due.
//! Progress is printed by a listener attached to every task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tasktree::{At, PoolConfig, PoolStats, Task, TaskError, TaskListener, TaskPool, TaskStatus};

pub struct RunOptions {
    pub children: usize,
    pub steps: u32,
    pub step: Duration,
    pub delay: Duration,
    pub timeout: Duration,
}

/// Prints one line per lifecycle event and counts finishes
#[derive(Default)]
struct Progress {
    finished: AtomicUsize,
}

impl TaskListener for Progress {
    fn on_started(&self, task: &Task) {
        println!("[{}] started", label(task));
    }

    fn on_paused(&self, task: &Task) {
        println!("[{}] paused", label(task));
    }

    fn on_resumed(&self, task: &Task) {
        println!("[{}] resumed", label(task));
    }

    fn on_sub_finished(&self, task: &Task, sub: &Task) {
        println!(
            "[{}] child {} finished ({}/{})",
            label(task),
            sub.id(),
            task.finished_sub_count() + 1,
            task.sub_count()
        );
    }

    fn on_finished(&self, task: &Task) {
        self.finished.fetch_add(1, Ordering::SeqCst);
        let cost = task.cost().map(|c| c.as_millis()).unwrap_or_default();
        println!("[{}] finished in {} ms", label(task), cost);
    }

    fn on_failed(&self, task: &Task, error: &TaskError) {
        println!("[{}] failed: {}", label(task), error);
    }
}

fn label(task: &Task) -> String {
    match task.parent_id() {
        Some(parent) => format!("{}<{}", task.id(), parent),
        None => task.id().to_string(),
    }
}

pub fn execute(config: PoolConfig, options: RunOptions) -> anyhow::Result<PoolStats> {
    let pool = TaskPool::new(config);
    let progress = Arc::new(Progress::default());

    let parent = Task::new(|task| task.wait_sub_finished());
    parent.add_listener(progress.clone());

    let children: Vec<_> = (0..options.children)
        .map(|_| {
            let steps = options.steps;
            let step = options.step;
            let child = Task::new(move |task| {
                for _ in 0..steps {
                    task.wait(None)?;
                    thread::sleep(step);
                }
                Ok(())
            });
            child.add_listener(progress.clone());
            parent.add_sub(child.clone());
            child
        })
        .collect();

    let scheduled = Task::scheduled(At::after(options.delay), |_| Ok(()));
    scheduled.add_listener(progress.clone());

    println!(
        "Running {} children under task {} ({} workers, tick {} ms)",
        options.children,
        parent.id(),
        pool.max_workers(),
        pool.config().tick_ms
    );

    pool.submit_task(parent.clone());
    for child in children {
        pool.submit_task(child);
    }
    pool.submit_task(scheduled);

    if !pool.wait_all(options.timeout) {
        anyhow::bail!(
            "tasks still running after {} s: {:?}",
            options.timeout.as_secs(),
            pool.stats()
        );
    }

    let stats = pool.stats();
    println!();
    println!("Tasks:     {}", stats.total);
    println!("Finished:  {}", stats.finished);
    println!("Failed:    {}", stats.failed);
    if parent.status() != TaskStatus::Finished {
        anyhow::bail!("parent task ended as {}", parent.status());
    }
    tracing::debug!(
        finished = progress.finished.load(Ordering::SeqCst),
        "run complete"
    );
    Ok(stats)
}
