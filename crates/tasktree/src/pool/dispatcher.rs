//! Dispatch loop thread
//!
//! Runs a scan once per tick while the pool is working. `stop` wakes the
//! sleeping loop so it exits without waiting out the tick.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct LoopState {
    working: bool,
    /// Bumped on every start so a loop from an earlier start exits
    generation: u64,
}

pub(crate) struct Dispatcher {
    state: Mutex<LoopState>,
    wake: Condvar,
}

impl Dispatcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LoopState {
                working: false,
                generation: 0,
            }),
            wake: Condvar::new(),
        })
    }

    pub(crate) fn is_working(&self) -> bool {
        self.state.lock().working
    }

    /// Start the loop unless it is already working.
    ///
    /// `scan` runs once per tick; returning `false` ends the loop.
    pub(crate) fn start<F>(self: &Arc<Self>, tick: Duration, thread_name: &str, scan: F) -> bool
    where
        F: Fn() -> bool + Send + 'static,
    {
        let generation = {
            let mut state = self.state.lock();
            if state.working {
                return false;
            }
            state.working = true;
            state.generation += 1;
            state.generation
        };

        let dispatcher = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-dispatch", thread_name))
            .spawn(move || dispatcher.run_loop(generation, tick, scan));

        if let Err(error) = spawned {
            tracing::error!(%error, "failed to spawn dispatch thread");
            self.state.lock().working = false;
            return false;
        }
        true
    }

    /// Clear the working flag and wake the loop. Returns whether it was working.
    pub(crate) fn stop(&self) -> bool {
        let mut state = self.state.lock();
        let was_working = state.working;
        state.working = false;
        self.wake.notify_all();
        was_working
    }

    fn current(&self, state: &LoopState, generation: u64) -> bool {
        state.working && state.generation == generation
    }

    fn run_loop<F>(&self, generation: u64, tick: Duration, scan: F)
    where
        F: Fn() -> bool,
    {
        tracing::debug!(generation, "dispatch loop started");
        loop {
            if !self.current(&self.state.lock(), generation) {
                break;
            }
            if !scan() {
                let mut state = self.state.lock();
                if state.generation == generation {
                    state.working = false;
                }
                break;
            }

            let mut state = self.state.lock();
            if !self.current(&state, generation) {
                break;
            }
            self.wake.wait_for(&mut state, tick);
        }
        tracing::debug!(generation, "dispatch loop exited");
    }
}
