//! Run control: cooperative pause/stop and single-flight model access.

use crate::error::BusyError;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};

/// Returned by [`RunControl::checkpoint`] when a stop was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopRequested;

#[derive(Debug, Default)]
struct ControlState {
    paused: bool,
    stopped: bool,
}

/// Cooperative pause/stop token shared between a running simulation and
/// an operator.
///
/// The simulator calls [`checkpoint`](Self::checkpoint) before every step.
/// A paused token blocks there until resumed or stopped; a stopped token
/// returns [`StopRequested`] so the run ends between steps, never inside one.
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    inner: Arc<(Mutex<ControlState>, Condvar)>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks the next checkpoint until [`resume`](Self::resume) or [`stop`](Self::stop).
    pub fn pause(&self) {
        let (lock, _) = &*self.inner;
        lock_state(lock).paused = true;
    }

    pub fn resume(&self) {
        let (lock, cvar) = &*self.inner;
        lock_state(lock).paused = false;
        cvar.notify_all();
    }

    /// Requests termination at the next checkpoint. Irreversible.
    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        lock_state(lock).stopped = true;
        cvar.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        lock_state(&self.inner.0).paused
    }

    pub fn is_stopped(&self) -> bool {
        lock_state(&self.inner.0).stopped
    }

    /// Waits while paused; returns `Err(StopRequested)` once stopped.
    pub fn checkpoint(&self) -> Result<(), StopRequested> {
        let (lock, cvar) = &*self.inner;
        let mut state = lock_state(lock);
        while state.paused && !state.stopped {
            state = match cvar.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        if state.stopped {
            Err(StopRequested)
        } else {
            Ok(())
        }
    }
}

fn lock_state(lock: &Mutex<ControlState>) -> MutexGuard<'_, ControlState> {
    // The state is two flags; a panic elsewhere cannot leave it inconsistent.
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Exclusive access to a mutable model shared by simulation runs.
///
/// Only one run may hold the model at a time. A second caller gets
/// [`BusyError`] immediately instead of queueing.
#[derive(Debug, Default)]
pub struct SingleFlight<M> {
    model: Mutex<M>,
}

/// Held access to the guarded model; released on drop.
pub type SingleFlightPermit<'a, M> = MutexGuard<'a, M>;

impl<M> SingleFlight<M> {
    pub fn new(model: M) -> Self {
        Self {
            model: Mutex::new(model),
        }
    }

    /// Acquires the model or fails with [`BusyError`] if a run holds it.
    pub fn try_acquire(&self) -> Result<SingleFlightPermit<'_, M>, BusyError> {
        match self.model.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(BusyError),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }

    /// Runs `f` with exclusive access to the model.
    pub fn try_run<R>(&self, f: impl FnOnce(&mut M) -> R) -> Result<R, BusyError> {
        let mut permit = self.try_acquire()?;
        Ok(f(&mut permit))
    }

    pub fn into_inner(self) -> M {
        match self.model.into_inner() {
            Ok(model) => model,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
