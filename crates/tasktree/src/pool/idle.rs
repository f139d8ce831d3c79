//! Idle self-stop timer
//!
//! At most one idle period is pending at a time. The waiting thread sleeps on
//! a condvar so `disarm` can end the period early.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct Slot {
    armed: bool,
    /// Bumped by `disarm` so a sleeping timer knows it was superseded
    generation: u64,
}

pub(crate) struct IdleTimer {
    slot: Mutex<Slot>,
    wake: Condvar,
}

impl IdleTimer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot {
                armed: false,
                generation: 0,
            }),
            wake: Condvar::new(),
        })
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.slot.lock().armed
    }

    /// Start an idle period that calls `on_fire` after `timeout`.
    ///
    /// Returns `false` without doing anything if a period is already pending.
    pub(crate) fn arm<F>(self: &Arc<Self>, timeout: Duration, thread_name: &str, on_fire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = {
            let mut slot = self.slot.lock();
            if slot.armed {
                return false;
            }
            slot.armed = true;
            slot.generation
        };

        let timer = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-idle", thread_name))
            .spawn(move || {
                if timer.sleep(generation, timeout) {
                    on_fire();
                }
            });

        if let Err(error) = spawned {
            tracing::error!(%error, "failed to spawn idle timer thread");
            self.slot.lock().armed = false;
            return false;
        }
        true
    }

    /// End any pending idle period without firing it
    pub(crate) fn disarm(&self) {
        let mut slot = self.slot.lock();
        if slot.armed {
            slot.armed = false;
            slot.generation += 1;
            self.wake.notify_all();
        }
    }

    /// Returns `true` if the period elapsed without being disarmed
    fn sleep(&self, generation: u64, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.slot.lock();
        loop {
            if slot.generation != generation {
                return false;
            }
            let Some(deadline) = deadline else {
                // Unrepresentable deadline: only a disarm ends the period
                self.wake.wait(&mut slot);
                continue;
            };
            if self.wake.wait_until(&mut slot, deadline).timed_out() {
                if slot.generation != generation {
                    return false;
                }
                slot.armed = false;
                return true;
            }
        }
    }
}
