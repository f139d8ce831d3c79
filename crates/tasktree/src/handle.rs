//! Cooperative pause/resume/stop signal owned by each task
//!
//! A task body calls [`TaskHandle::wait`] at the points where it is willing
//! to be paused or stopped. Other threads close the gate with `pause`, reopen
//! it with `resume`, or make every later wait fail with `force_stop`.

use crate::{TaskError, TaskResult};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Gate state, protected by a single lock so pause and wait never race
#[derive(Debug)]
struct Gate {
    open: bool,
    force_stopped: bool,
    stop_reason: Option<String>,
    /// Default wait timeout recorded by the last `pause`
    pause_timeout: Option<Duration>,
}

/// Per-task cooperative signal
#[derive(Debug)]
pub struct TaskHandle {
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl TaskHandle {
    /// Create a handle with an open gate
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(Gate {
                open: true,
                force_stopped: false,
                stop_reason: None,
                pause_timeout: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// Block until the gate is open or the timeout elapses.
    ///
    /// Without an explicit timeout the one recorded by the last `pause` is
    /// used; with neither, waits until resumed. A force-stopped handle fails
    /// with [`TaskError::Terminated`], including waiters that were already
    /// blocked when `force_stop` was called.
    pub fn wait(&self, timeout: Option<Duration>) -> TaskResult<()> {
        let mut gate = self.gate.lock();
        // A timeout too large to represent waits without a deadline
        let deadline = timeout
            .or(gate.pause_timeout)
            .and_then(|timeout| Instant::now().checked_add(timeout));

        loop {
            if gate.force_stopped {
                return Err(TaskError::Terminated {
                    reason: gate.stop_reason.clone(),
                });
            }
            if gate.open {
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut gate, deadline).timed_out() {
                        // Timed out: let the body carry on unless it was stopped meanwhile
                        if gate.force_stopped {
                            continue;
                        }
                        return Ok(());
                    }
                }
                None => self.changed.wait(&mut gate),
            }
        }
    }

    /// Close the gate
    pub fn pause(&self, timeout: Option<Duration>) {
        let mut gate = self.gate.lock();
        gate.pause_timeout = timeout;
        gate.open = false;
    }

    /// Open the gate and wake every waiter
    pub fn resume(&self) {
        let mut gate = self.gate.lock();
        gate.open = true;
        gate.pause_timeout = None;
        self.changed.notify_all();
    }

    /// Make every current and future wait fail. Irreversible.
    pub fn force_stop(&self, reason: Option<String>) {
        let mut gate = self.gate.lock();
        gate.force_stopped = true;
        gate.stop_reason = reason;
        self.changed.notify_all();
    }

    /// Whether the gate is closed
    pub fn is_paused(&self) -> bool {
        !self.gate.lock().open
    }

    /// Whether `force_stop` has been called
    pub fn is_force_stopped(&self) -> bool {
        self.gate.lock().force_stopped
    }

    /// Reason given to `force_stop`
    pub fn stop_reason(&self) -> Option<String> {
        self.gate.lock().stop_reason.clone()
    }
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}
