//! The single loss-detection timer.
//!
//! One daemon worker thread waits on a mutex+condvar deadline slot.
//! Cancellation is best-effort: a fired callback can race with a
//! cancel or a re-arm. Each arm therefore records a monotonically
//! increasing generation token, and the callback receives the token it
//! was armed with; the handler compares tokens and ignores stale
//! fires.

use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::trace;

struct TimerState {
    deadline: Option<Instant>,
    generation: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cv: Condvar,
}

/// A single re-armable deadline backed by a named daemon thread.
pub(crate) struct LossDetectionTimer {
    shared: Arc<TimerShared>,
}

impl LossDetectionTimer {
    /// Spawn the worker thread. `on_fire` runs on that thread with the
    /// generation token of the deadline that expired; it must not
    /// block indefinitely.
    pub fn spawn<F>(on_fire: F) -> io::Result<Self>
    where
        F: Fn(u64) + Send + 'static,
    {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                deadline: None,
                generation: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        });

        let worker = shared.clone();
        thread::Builder::new()
            .name("loss-detection".into())
            .spawn(move || Self::run(worker, on_fire))?;

        Ok(Self { shared })
    }

    /// Arm (or re-arm) the timer. Returns the generation token the
    /// eventual fire will carry.
    pub fn schedule(&self, deadline: Instant) -> u64 {
        let mut state = self.shared.state.lock();
        state.generation += 1;
        state.deadline = Some(deadline);
        self.shared.cv.notify_one();
        state.generation
    }

    /// Clear the deadline. A concurrently-firing callback may still
    /// run, but its token is stale from this point on.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();
        state.generation += 1;
        state.deadline = None;
        self.shared.cv.notify_one();
    }

    fn run<F: Fn(u64)>(shared: Arc<TimerShared>, on_fire: F) {
        let mut state = shared.state.lock();
        loop {
            if state.shutdown {
                return;
            }
            match state.deadline {
                None => {
                    shared.cv.wait(&mut state);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let generation = state.generation;
                        state.deadline = None;
                        drop(state);
                        trace!(generation, "loss detection timer fired");
                        on_fire(generation);
                        state = shared.state.lock();
                    } else {
                        shared.cv.wait_until(&mut state, deadline);
                    }
                }
            }
        }
    }
}

impl Drop for LossDetectionTimer {
    fn drop(&mut self) {
        // Signal only; the worker may be inside on_fire, so joining
        // here could self-deadlock.
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        state.deadline = None;
        self.shared.cv.notify_one();
    }
}
