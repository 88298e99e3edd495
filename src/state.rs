// src/state.rs

use crate::core::{
    history::HistoryStore,
    tracker::{ProcessToken, ProcessTracker},
};
use crate::models::{HistoryEntry, ShellType};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Everything the manager mutates from more than one place: the process
/// registry, the history ring buffer and the count of background spawns that
/// reserved a concurrency slot but are not registered yet.
#[derive(Debug)]
pub struct SharedState {
    pub tracker: ProcessTracker,
    pub history: HistoryStore,
    pending: usize,
}

impl SharedState {
    pub fn new(tracker: ProcessTracker, history: HistoryStore) -> Self {
        Self {
            tracker,
            history,
            pending: 0,
        }
    }

    /// Running background processes plus reserved slots.
    pub fn active_background(&self) -> usize {
        self.tracker.running_count() + self.pending
    }

    /// Records `entry` if present. Convenience for the tracker's transition results.
    pub fn record(&mut self, entry: Option<HistoryEntry>) {
        if let Some(entry) = entry {
            self.history.record(entry);
        }
    }
}

/// The single serialization point for [`SharedState`].
///
/// All callers (command handlers, output pumps, exit watchers and the zombie
/// sweeper) go through [`StateHandle::lock`]. Critical sections are short and
/// never await.
#[derive(Debug, Clone)]
pub struct StateHandle {
    inner: Arc<Mutex<SharedState>>,
}

/// A locked view of the shared state.
pub struct StateGuard<'a> {
    guard: MutexGuard<'a, SharedState>,
}

impl Deref for StateGuard<'_> {
    type Target = SharedState;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut SharedState {
        &mut self.guard
    }
}

impl StateHandle {
    pub fn new(state: SharedState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Locks the state. A panic in another holder does not leave the data
    /// half-written (every mutation is a single call), so poisoning is ignored.
    pub fn lock(&self) -> StateGuard<'_> {
        StateGuard {
            guard: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Reserves one background slot if fewer than `limit` are in use.
    pub fn reserve(&self, limit: usize) -> Option<Reservation> {
        let mut state = self.lock();
        if state.active_background() >= limit {
            return None;
        }
        state.pending += 1;
        Some(Reservation {
            state: self.clone(),
            armed: true,
        })
    }
}

/// A reserved background slot. Dropping it without registering gives the slot back.
#[derive(Debug)]
pub struct Reservation {
    state: StateHandle,
    armed: bool,
}

impl Reservation {
    /// Turns the reservation into a `Running` tracker entry in one critical section.
    pub fn register(
        mut self,
        pid: u32,
        command: &str,
        shell: ShellType,
        output_cap: Option<usize>,
    ) -> ProcessToken {
        self.armed = false;
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        state.tracker.register(pid, command, shell, output_cap)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            state.pending = state.pending.saturating_sub(1);
        }
    }
}
