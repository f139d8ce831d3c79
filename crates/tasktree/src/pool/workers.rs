//! Bounded worker threads fed by a channel
//!
//! Threads are spawned lazily: a new worker starts only when a job arrives,
//! no worker is idle and the bound has not been reached.

use crate::{TaskError, TaskResult};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Counters {
    spawned: AtomicUsize,
    /// Workers that finished a job and have not been claimed by a new one
    idle: AtomicUsize,
    /// Workers inside a job right now
    busy: AtomicUsize,
}

impl Counters {
    fn claim_idle(&self) -> bool {
        self.idle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |idle| idle.checked_sub(1))
            .is_ok()
    }
}

pub(crate) struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    max_workers: usize,
    counters: Arc<Counters>,
    thread_name: String,
}

impl WorkerPool {
    pub(crate) fn new(max_workers: usize, thread_name: impl Into<String>) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            max_workers: max_workers.max(1),
            counters: Arc::new(Counters::default()),
            thread_name: thread_name.into(),
        }
    }

    pub(crate) fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Threads started so far
    pub(crate) fn spawned(&self) -> usize {
        self.counters.spawned.load(Ordering::Acquire)
    }

    /// Threads currently executing a job
    pub(crate) fn busy(&self) -> usize {
        self.counters.busy.load(Ordering::Acquire)
    }

    /// Queue `job`, claiming an idle worker or starting a new one
    pub(crate) fn execute(&self, job: Job) -> TaskResult<()> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(TaskError::PoolShutdown)?;

        if !self.counters.claim_idle() && self.spawned() < self.max_workers {
            self.spawn_worker()?;
        }

        sender.send(job).map_err(|_| TaskError::PoolShutdown)
    }

    /// Stop accepting jobs. Workers drain the queue and exit.
    pub(crate) fn shutdown(&self) {
        self.sender.lock().take();
    }

    fn spawn_worker(&self) -> TaskResult<()> {
        let index = self.counters.spawned.fetch_add(1, Ordering::AcqRel);
        let receiver = self.receiver.clone();
        let counters = self.counters.clone();

        let spawned = thread::Builder::new()
            .name(format!("{}-worker-{}", self.thread_name, index))
            .spawn(move || worker_loop(receiver, counters));

        match spawned {
            Ok(_) => {
                tracing::debug!(worker = index, "worker started");
                Ok(())
            }
            Err(error) => {
                self.counters.spawned.fetch_sub(1, Ordering::AcqRel);
                tracing::error!(%error, "failed to spawn worker thread");
                if self.spawned() == 0 {
                    return Err(TaskError::failed(format!("cannot spawn worker: {}", error)));
                }
                // Existing workers will pick the job up
                Ok(())
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Receiver<Job>, counters: Arc<Counters>) {
    // A new worker is spawned for a job, so it only counts as idle after one
    while let Ok(job) = receiver.recv() {
        counters.busy.fetch_add(1, Ordering::AcqRel);
        job();
        counters.busy.fetch_sub(1, Ordering::AcqRel);
        counters.idle.fetch_add(1, Ordering::AcqRel);
    }
    counters.claim_idle();
    counters.spawned.fetch_sub(1, Ordering::AcqRel);
}
